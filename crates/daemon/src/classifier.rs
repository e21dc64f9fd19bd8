use std::fmt;
use crate::config::{BitratePair, PipelineConfig};
use crate::ffprobe::MediaInfo;

/// Quality tier of a source, driving bitrate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    /// Standard definition, below the configured height threshold
    Sd,
    /// High definition
    Hd,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Sd => write!(f, "SD"),
            QualityTier::Hd => write!(f, "HD"),
        }
    }
}

/// Bitrate decision for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityDecision {
    pub tier: QualityTier,
    /// False when auto quality is disabled and the default pair applies
    pub auto: bool,
    pub bitrates: BitratePair,
}

/// Classify a height into a tier against `threshold`
pub fn tier_for_height(height: u32, threshold: u32) -> QualityTier {
    if height < threshold {
        QualityTier::Sd
    } else {
        QualityTier::Hd
    }
}

/// Classify probed media into a quality tier
pub fn classify(info: &MediaInfo, cfg: &PipelineConfig) -> QualityTier {
    tier_for_height(info.height, cfg.sd_height_threshold)
}

/// Resolve the bitrate pair to encode `info` with
pub fn decide(info: &MediaInfo, cfg: &PipelineConfig) -> QualityDecision {
    let tier = classify(info, cfg);
    if !cfg.auto_quality {
        return QualityDecision {
            tier,
            auto: false,
            bitrates: cfg.default_bitrates.clone(),
        };
    }

    let bitrates = match tier {
        QualityTier::Sd => cfg.sd_bitrates.clone(),
        QualityTier::Hd => cfg.hd_bitrates.clone(),
    };
    QualityDecision {
        tier,
        auto: true,
        bitrates,
    }
}
