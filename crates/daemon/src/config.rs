use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Video/audio bitrate pair handed to the encoder (ffmpeg notation, e.g. "1500k")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitratePair {
    pub video: String,
    pub audio: String,
}

impl BitratePair {
    pub fn new(video: &str, audio: &str) -> Self {
        Self {
            video: video.to_string(),
            audio: audio.to_string(),
        }
    }
}

/// Configuration for the VOD encoding daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory holding source/, encode/ and target/
    pub root_dir: PathBuf,
    /// Path to the ffmpeg binary (default: <root>/bin/ffmpeg)
    pub ffmpeg_bin: Option<PathBuf>,
    /// Path to the ffprobe binary (default: <root>/bin/ffprobe)
    pub ffprobe_bin: Option<PathBuf>,
    /// Operational log file (default: <root>/encoder.log)
    pub encoder_log: Option<PathBuf>,
    /// Error-only log file (default: <root>/errors.log)
    pub error_log: Option<PathBuf>,
    /// Source media extensions picked up by the watcher (lower case, no dot)
    pub source_extensions: Vec<String>,
    /// Extension of encoded outputs
    pub target_extension: String,
    /// Container format passed to `-f`
    pub target_format: String,
    /// Maximum number of encode jobs running at once
    pub max_jobs: usize,
    /// Remove the staged source after a successful encode
    pub delete_after_encode: bool,
    /// Encoder thread cap per job, 0 = all threads
    pub threads: u32,
    /// Pick SD/HD bitrates from the probed height
    pub auto_quality: bool,
    /// Heights strictly below this are SD
    pub sd_height_threshold: u32,
    pub video_codec: String,
    pub audio_codec: String,
    /// ultrafast, superfast, veryfast, faster, fast, medium, slow, slower, veryslow
    pub preset: String,
    /// baseline, main, high
    pub profile: String,
    pub pixel_format: String,
    pub gop_size: u32,
    pub keyint_min: u32,
    pub force_key_frames: String,
    pub audio_channels: u32,
    /// Apply the yadif deinterlace filter
    pub deinterlace: bool,
    /// Bitrates used when auto quality is disabled
    pub default_bitrates: BitratePair,
    pub sd_bitrates: BitratePair,
    pub hd_bitrates: BitratePair,
    /// Upper bound for a single ffprobe run
    pub probe_timeout_secs: u64,
    /// Value for ffprobe `-analyzeduration` (microseconds)
    pub probe_analyze_duration: u64,
    /// Interval in seconds between source scans
    pub scan_interval_secs: u64,
    /// Delay between the two size reads of the stability check
    pub settle_interval_secs: u64,
    /// Poll timeout on the encoder output stream
    pub progress_poll_ms: u64,
    /// Minimum percentage advance between two progress reports
    pub progress_step: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PipelineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        let root_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_root(root_dir)
    }

    /// Default configuration laid out under `root_dir`
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ffmpeg_bin: None,
            ffprobe_bin: None,
            encoder_log: None,
            error_log: None,
            source_extensions: ["avi", "mkv", "mpg", "mpeg", "vob", "ts", "mp4", "wmv", "mov", "m4v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            target_extension: "mp4".to_string(),
            target_format: "mp4".to_string(),
            max_jobs: 4,
            delete_after_encode: true,
            threads: 0,
            auto_quality: true,
            sd_height_threshold: 700,
            video_codec: "libx264".to_string(),
            audio_codec: "libfdk_aac".to_string(),
            preset: "fast".to_string(),
            profile: "main".to_string(),
            pixel_format: "yuv420p".to_string(),
            gop_size: 200,
            keyint_min: 50,
            force_key_frames: "expr:gte(t,n_forced*2)".to_string(),
            audio_channels: 2,
            deinterlace: false,
            default_bitrates: BitratePair::new("2500k", "96k"),
            sd_bitrates: BitratePair::new("1500k", "96k"),
            hd_bitrates: BitratePair::new("5000k", "256k"),
            probe_timeout_secs: 60,
            probe_analyze_duration: 5_000_000,
            scan_interval_secs: 3,
            settle_interval_secs: 5,
            progress_poll_ms: 1000,
            progress_step: 15,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_jobs == 0 {
            bail!("max_jobs must be at least 1");
        }
        if self.progress_step == 0 {
            bail!("progress_step must be at least 1");
        }
        if self.source_extensions.is_empty() {
            bail!("source_extensions must not be empty");
        }
        Ok(())
    }

    /// Inbound directory watched for uploads
    pub fn source_dir(&self) -> PathBuf {
        self.root_dir.join("source")
    }

    /// Staging directory for renamed files being encoded
    pub fn encode_dir(&self) -> PathBuf {
        self.root_dir.join("encode")
    }

    /// Finished outputs
    pub fn target_dir(&self) -> PathBuf {
        self.root_dir.join("target")
    }

    pub fn ffmpeg_bin(&self) -> PathBuf {
        self.ffmpeg_bin.clone().unwrap_or_else(|| self.root_dir.join("bin").join("ffmpeg"))
    }

    pub fn ffprobe_bin(&self) -> PathBuf {
        self.ffprobe_bin.clone().unwrap_or_else(|| self.root_dir.join("bin").join("ffprobe"))
    }

    pub fn encoder_log(&self) -> PathBuf {
        self.encoder_log.clone().unwrap_or_else(|| self.root_dir.join("encoder.log"))
    }

    pub fn error_log(&self) -> PathBuf {
        self.error_log.clone().unwrap_or_else(|| self.root_dir.join("errors.log"))
    }

    /// Whether `ext` is on the source allow-list (case-insensitive)
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.source_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}
