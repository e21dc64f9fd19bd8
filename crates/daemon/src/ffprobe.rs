use std::fmt;
use std::path::Path;
use std::time::Duration;
use humansize::{format_size, BINARY};
use log::{debug, error, info};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use crate::config::PipelineConfig;

/// Raw ffprobe JSON output for the entries we request
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub streams: Option<Vec<FFProbeStream>>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

/// Stream-level metadata from ffprobe (first video stream only)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub field_order: Option<String>,
    pub r_frame_rate: Option<String>,
}

/// Error payload ffprobe prints with `-show_error`
#[derive(Debug, Deserialize)]
struct FFProbeErrorEnvelope {
    error: FFProbeErrorBody,
}

#[derive(Debug, Deserialize)]
struct FFProbeErrorBody {
    string: String,
}

/// Typed technical metadata for one source file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub format_name: String,
    /// Duration truncated to whole seconds
    pub duration: Duration,
    /// Duration as reported by ffprobe
    pub duration_secs: f64,
    pub size: u64,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub field_order: Option<String>,
    pub frame_rate: Option<String>,
    pub bit_rate: Option<u64>,
}

impl MediaInfo {
    /// Human-scaled size for log output
    pub fn human_size(&self) -> String {
        format_size(self.size, BINARY)
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Format: {} | Codec: {} | Duration: {} | Size: {} | Frame: {}x{} | Fields: {} | FPS: {}",
            self.format_name,
            self.codec_name,
            format_hms(self.duration),
            self.human_size(),
            self.width,
            self.height,
            self.field_order.as_deref().unwrap_or("unknown"),
            self.frame_rate.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Render a span as H:MM:SS
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Why probing a file failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe reported an error ({0})")]
    Diagnostic(String),
    #[error("ffprobe exited with code {code} ({stderr})")]
    Exited { code: i32, stderr: String },
    #[error("media data is not valid JSON ({0})")]
    Malformed(String),
    #[error("no media streams ({0})")]
    NoStreams(String),
    #[error("missing {0} in media data")]
    MissingField(&'static str),
    #[error("invalid {field} in media data ({value})")]
    Invalid { field: &'static str, value: String },
    #[error("ffprobe timed out after {0}s")]
    TimedOut(u64),
    #[error("failed to run ffprobe ({0})")]
    Spawn(#[from] std::io::Error),
}

/// Build the ffprobe argument list for `file_path`
pub fn probe_args(cfg: &PipelineConfig, file_path: &Path) -> Vec<String> {
    vec![
        "-of".to_string(),
        "json".to_string(),
        "-analyzeduration".to_string(),
        cfg.probe_analyze_duration.to_string(),
        "-hide_banner".to_string(),
        "-v".to_string(),
        "quiet".to_string(),
        "-show_error".to_string(),
        "-select_streams".to_string(),
        "v".to_string(),
        "-show_entries".to_string(),
        "format=format_name,bit_rate,duration,size:stream=codec_type,width,height,codec_name,r_frame_rate,field_order"
            .to_string(),
        file_path.to_string_lossy().to_string(),
    ]
}

/// Run ffprobe on `file_path`, bounded by `probe_timeout_secs`
pub async fn probe_file(cfg: &PipelineConfig, file_path: &Path) -> Result<MediaInfo, ProbeError> {
    let label = file_label(file_path);
    let result = run_probe(cfg, file_path).await;

    match &result {
        Ok(info) => info!("[MediaInfo] [{}] {}", label, info),
        Err(e) => error!("[MediaInfo] [{}] {}", label, e),
    }
    result
}

async fn run_probe(cfg: &PipelineConfig, file_path: &Path) -> Result<MediaInfo, ProbeError> {
    let ffprobe_bin = cfg.ffprobe_bin();
    let args = probe_args(cfg, file_path);
    debug!("ffprobe command: {} {}", ffprobe_bin.display(), args.join(" "));

    let mut cmd = Command::new(&ffprobe_bin);
    cmd.args(&args).kill_on_drop(true);

    // kill_on_drop reaps the child when the timeout drops the future
    let output = tokio::time::timeout(Duration::from_secs(cfg.probe_timeout_secs), cmd.output())
        .await
        .map_err(|_| ProbeError::TimedOut(cfg.probe_timeout_secs))??;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if let Ok(envelope) = serde_json::from_str::<FFProbeErrorEnvelope>(&stdout) {
            return Err(ProbeError::Diagnostic(envelope.error.string));
        }
        return Err(ProbeError::Exited {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_probe_output(&stdout)
}

/// Turn ffprobe JSON into `MediaInfo`
pub fn parse_probe_output(json: &str) -> Result<MediaInfo, ProbeError> {
    let data: FFProbeData =
        serde_json::from_str(json).map_err(|e| ProbeError::Malformed(e.to_string()))?;

    let stream = match data.streams.as_deref() {
        Some([first, ..]) => first.clone(),
        _ => return Err(ProbeError::NoStreams(json.trim().to_string())),
    };
    let format = data.format.unwrap_or_default();

    let duration_raw = format.duration.ok_or(ProbeError::MissingField("duration"))?;
    let duration_secs: f64 = duration_raw.trim().parse().map_err(|_| ProbeError::Invalid {
        field: "duration",
        value: duration_raw.clone(),
    })?;
    if !duration_secs.is_finite() || duration_secs < 1.0 {
        return Err(ProbeError::Invalid {
            field: "duration",
            value: duration_raw,
        });
    }

    let height = stream.height.ok_or(ProbeError::MissingField("height"))?;
    if height == 0 {
        return Err(ProbeError::Invalid {
            field: "height",
            value: height.to_string(),
        });
    }

    let size = match format.size {
        Some(s) => s.trim().parse::<u64>().map_err(|_| ProbeError::Invalid {
            field: "size",
            value: s.clone(),
        })?,
        None => 0,
    };

    Ok(MediaInfo {
        format_name: format.format_name.unwrap_or_else(|| "unknown".to_string()),
        duration: Duration::from_secs(duration_secs as u64),
        duration_secs,
        size,
        codec_name: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
        width: stream.width.unwrap_or(0),
        height,
        field_order: stream.field_order,
        frame_rate: stream.r_frame_rate,
        bit_rate: format.bit_rate.and_then(|b| b.trim().parse().ok()),
    })
}

/// File name used to tag log records
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
