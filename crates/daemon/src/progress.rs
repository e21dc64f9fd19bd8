//! Encoder progress parsing and report throttling.
//!
//! ffmpeg prints status lines such as
//! `frame= 1200 fps= 48 q=28.0 size=   10240kB time=00:00:50.04 bitrate=1676.3kbits/s speed=1.92x`.
//! Lines are tokenized into `key=value` pairs; values may be separated from
//! their `=` by whitespace and may themselves span several words.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// A progress line carried a `time=` value that is not HH:MM:SS
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid progress time '{0}'")]
pub struct ProgressTimeError(pub String);

/// Whether a line is an encoder status line worth parsing
pub fn is_stats_line(line: &str) -> bool {
    line.contains("time=") && line.contains("bitrate=")
}

fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Tokenize `key=value` pairs separated by whitespace
pub fn parse_stats(line: &str) -> HashMap<String, String> {
    let mut stats = HashMap::new();
    let mut current: Option<(String, String)> = None;

    let mut tokens = line.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        // "key=value" or "key=" followed by the value
        if let Some((key, value)) = token.split_once('=') {
            if is_key(key) {
                if let Some((k, v)) = current.take() {
                    stats.insert(k, v);
                }
                current = Some((key.to_string(), value.to_string()));
                continue;
            }
        }
        // "key = value" and "key =value"
        if is_key(token) {
            if let Some(next) = tokens.peek() {
                if next.starts_with('=') {
                    let next = tokens.next().unwrap_or_default();
                    if let Some((k, v)) = current.take() {
                        stats.insert(k, v);
                    }
                    current = Some((token.to_string(), next[1..].to_string()));
                    continue;
                }
            }
        }
        if let Some((_, value)) = current.as_mut() {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(token);
        }
    }
    if let Some((k, v)) = current {
        stats.insert(k, v);
    }
    stats
}

/// Parse an encoder `time` value. Sub-second digits are truncated.
///
/// `Ok(None)` means the encoder has no timestamp yet (`N/A`).
pub fn parse_time(value: &str) -> Result<Option<Duration>, ProgressTimeError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("N/A") {
        return Ok(None);
    }

    let whole = value.split('.').next().unwrap_or_default();
    let parts: Vec<&str> = whole.split(':').collect();
    if parts.len() != 3 {
        return Err(ProgressTimeError(value.to_string()));
    }

    let field = |s: &str, max: u64| -> Result<u64, ProgressTimeError> {
        let n = s
            .parse::<u64>()
            .map_err(|_| ProgressTimeError(value.to_string()))?;
        if n > max {
            return Err(ProgressTimeError(value.to_string()));
        }
        Ok(n)
    };
    let hours = field(parts[0], u64::MAX / 3600)?;
    let minutes = field(parts[1], 59)?;
    let seconds = field(parts[2], 59)?;

    Ok(Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds)))
}

/// Percent complete after `elapsed` of `total`, in whole seconds, clamped to 0..=100
pub fn percent_complete(elapsed: Duration, total: Duration) -> u8 {
    let total_secs = total.as_secs() as i64;
    if total_secs <= 0 {
        return 0;
    }
    let left = total_secs - elapsed.as_secs() as i64;
    let pct = 100.0 - (left as f64 / total_secs as f64 * 100.0);
    pct.clamp(0.0, 100.0) as u8
}

/// Limits how often progress is reported for one job
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    last: u8,
}

impl ProgressThrottle {
    pub fn new(step: u8) -> Self {
        Self { step: step.max(1), last: 0 }
    }

    /// Record `percent`; true if it should be reported.
    ///
    /// Reports happen when the value advanced by at least `step` since the
    /// last report, or reached 100, and never twice for the same value.
    pub fn observe(&mut self, percent: u8) -> bool {
        if percent == self.last {
            return false;
        }
        let advanced = percent > self.last && percent - self.last >= self.step;
        if advanced || percent == 100 {
            self.last = percent;
            return true;
        }
        false
    }
}
