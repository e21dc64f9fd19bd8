use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::config::{BitratePair, PipelineConfig};
use crate::ffprobe::{file_label, MediaInfo};
use crate::progress::{self, ProgressThrottle};
use crate::supervisor::JobSlot;

/// Encoder exit code for a failed encode
const EXIT_FAILED: i32 = 1;
/// Encoder exit code after an interrupt (also what a killed ffmpeg reports)
const EXIT_INTERRUPTED: i32 = 255;

/// Terminal state of an encode job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub complete: bool,
    pub reason: String,
    /// Percentages reported while the job ran, in order
    pub progress: Vec<u8>,
}

impl JobOutcome {
    fn ok() -> Self {
        Self {
            complete: true,
            reason: "OK".to_string(),
            progress: Vec::new(),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            complete: false,
            reason: reason.into(),
            progress: Vec::new(),
        }
    }
}

/// Map the encoder's exit code to an outcome
pub fn classify_exit(code: Option<i32>, last_line: &str) -> JobOutcome {
    match code {
        Some(0) => JobOutcome::ok(),
        Some(EXIT_FAILED) => {
            if last_line.trim().is_empty() {
                JobOutcome::failed("Encoder failed without output")
            } else {
                JobOutcome::failed(last_line.trim())
            }
        }
        // No code means the process died from a signal
        Some(EXIT_INTERRUPTED) | None => JobOutcome::failed("User interrupted"),
        Some(other) => JobOutcome::failed(format!("Encoder exited with code {}", other)),
    }
}

/// Build the ffmpeg argument list for one encode
pub fn build_encode_args(
    cfg: &PipelineConfig,
    input: &Path,
    output: &Path,
    bitrates: &BitratePair,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    args.push("-y".to_string());
    args.push("-hide_banner".to_string());
    // "repeat" keeps every status line instead of collapsing repeats
    args.push("-loglevel".to_string());
    args.push("repeat".to_string());
    args.push("-threads".to_string());
    args.push(cfg.threads.to_string());

    args.push("-i".to_string());
    args.push(input.to_string_lossy().to_string());

    // Video
    args.push("-c:v".to_string());
    args.push(cfg.video_codec.clone());
    args.push("-preset:v".to_string());
    args.push(cfg.preset.clone());
    args.push("-profile:v".to_string());
    args.push(cfg.profile.clone());
    args.push("-b:v".to_string());
    args.push(bitrates.video.clone());
    args.push("-pix_fmt".to_string());
    args.push(cfg.pixel_format.clone());
    args.push("-g".to_string());
    args.push(cfg.gop_size.to_string());
    args.push("-keyint_min".to_string());
    args.push(cfg.keyint_min.to_string());
    args.push("-force_key_frames".to_string());
    args.push(cfg.force_key_frames.clone());
    args.push("-strict".to_string());
    args.push("-2".to_string());

    // Audio
    args.push("-c:a".to_string());
    args.push(cfg.audio_codec.clone());
    args.push("-b:a".to_string());
    args.push(bitrates.audio.clone());
    args.push("-ac".to_string());
    args.push(cfg.audio_channels.to_string());

    if cfg.deinterlace {
        args.push("-filter:v".to_string());
        args.push("yadif=0".to_string());
    }

    args.push("-f".to_string());
    args.push(cfg.target_format.clone());
    args.push(output.to_string_lossy().to_string());

    args
}

/// Splits a byte stream into lines on `\n` or `\r`
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).to_string())
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for line in splitter.push(&buf[..n]) {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        let _ = tx.send(line).await;
    }
}

/// One transcode of a staged source file
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub id: Uuid,
    /// Staged (renamed) source
    pub source: PathBuf,
    pub target: PathBuf,
    pub info: MediaInfo,
    pub args: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Running encode job
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    pub name: String,
    handle: JoinHandle<JobOutcome>,
}

impl JobHandle {
    /// Wait for the job's terminal outcome
    pub async fn wait(self) -> JobOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[Encode] {} Encoding task aborted ({})", self.name, e);
                JobOutcome::failed(format!("Encoding task aborted ({})", e))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Per-job progress state while reading encoder output
struct ProgressState {
    throttle: ProgressThrottle,
    reported: Vec<u8>,
    last_line: String,
}

impl EncodeJob {
    pub fn new(
        cfg: &PipelineConfig,
        source: PathBuf,
        target: PathBuf,
        info: MediaInfo,
        bitrates: &BitratePair,
    ) -> Self {
        let args = build_encode_args(cfg, &source, &target, bitrates);
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            info,
            args,
            created_at: Utc::now(),
        }
    }

    /// Name used in log records
    pub fn name(&self) -> String {
        file_label(&self.source)
    }

    /// Spawn the job. `slot` is held until the job reaches a terminal state.
    pub fn start(self, cfg: Arc<PipelineConfig>, slot: JobSlot) -> JobHandle {
        let id = self.id;
        let name = self.name();
        debug!("[Encode] {} job {} created {}", name, id, self.created_at.to_rfc3339());
        let handle = tokio::spawn(async move {
            let outcome = self.run(&cfg).await;
            self.finish(&cfg, &outcome);
            drop(slot);
            outcome
        });
        JobHandle { id, name, handle }
    }

    async fn run(&self, cfg: &PipelineConfig) -> JobOutcome {
        let ffmpeg_bin = cfg.ffmpeg_bin();
        debug!("[Encode] {} ffmpeg command: {} {}", self.name(), ffmpeg_bin.display(), self.args.join(" "));

        let mut child = match Command::new(&ffmpeg_bin)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return JobOutcome::failed(format!(
                    "Failed to start encoder {} ({})",
                    ffmpeg_bin.display(),
                    e
                ))
            }
        };

        let (tx, mut rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut state = ProgressState {
            throttle: ProgressThrottle::new(cfg.progress_step),
            reported: Vec::new(),
            last_line: String::new(),
        };
        let poll = Duration::from_millis(cfg.progress_poll_ms.max(1));

        loop {
            match tokio::time::timeout(poll, rx.recv()).await {
                Ok(Some(line)) => {
                    if let Err(reason) = self.track(&line, &mut state) {
                        return abort(&mut child, reason, state).await;
                    }
                }
                // Both output streams closed
                Ok(None) => break,
                // Quiet for a whole poll interval: stop once the encoder is gone
                Err(_) => {
                    if let Ok(Some(_)) = child.try_wait() {
                        while let Ok(line) = rx.try_recv() {
                            if let Err(reason) = self.track(&line, &mut state) {
                                return abort(&mut child, reason, state).await;
                            }
                        }
                        break;
                    }
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let mut outcome = JobOutcome::failed(format!("Failed to wait for encoder ({})", e));
                outcome.progress = state.reported;
                return outcome;
            }
        };

        let mut outcome = classify_exit(status.code(), &state.last_line);
        outcome.progress = state.reported;
        outcome
    }

    /// Handle one output line; Err carries the failure reason
    fn track(&self, line: &str, state: &mut ProgressState) -> Result<(), String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        state.last_line = line.to_string();

        if !progress::is_stats_line(line) {
            return Ok(());
        }
        let stats = progress::parse_stats(line);
        let elapsed = match stats.get("time") {
            Some(value) => progress::parse_time(value).map_err(|e| e.to_string())?,
            None => None,
        };
        let Some(elapsed) = elapsed else {
            return Ok(());
        };

        let pct = progress::percent_complete(elapsed, self.info.duration);
        if state.throttle.observe(pct) {
            state.reported.push(pct);
            info!(
                "[Encode] {} Complete: {}% | Bitrate: {} | Encoding speed {}",
                self.name(),
                pct,
                stats.get("bitrate").map(String::as_str).unwrap_or("N/A"),
                stats.get("speed").map(String::as_str).unwrap_or("N/A"),
            );
        }
        Ok(())
    }

    /// Log the terminal record and wipe the staged source on success
    fn finish(&self, cfg: &PipelineConfig, outcome: &JobOutcome) {
        let name = self.name();
        if !outcome.complete {
            error!("[Encode] {} Encoding error ({})", name, outcome.reason);
            return;
        }

        if cfg.delete_after_encode {
            match std::fs::remove_file(&self.source) {
                Ok(()) => info!("[Encode] {} Source wiped", name),
                Err(e) => warn!("[Encode] {} Source wipe error ({})", name, e),
            }
        }
        info!("[Encode] {} Encoding complete", name);
    }
}

async fn abort(child: &mut Child, reason: String, state: ProgressState) -> JobOutcome {
    let _ = child.start_kill();
    let _ = child.wait().await;
    let mut outcome = JobOutcome::failed(reason);
    outcome.progress = state.reported;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info(duration_secs: u64, height: u32) -> MediaInfo {
        MediaInfo {
            format_name: "matroska,webm".to_string(),
            duration: Duration::from_secs(duration_secs),
            duration_secs: duration_secs as f64,
            size: 1_000_000,
            codec_name: "h264".to_string(),
            width: 1920,
            height,
            field_order: None,
            frame_rate: Some("25/1".to_string()),
            bit_rate: None,
        }
    }

    #[test]
    fn test_exit_classification() {
        assert!(classify_exit(Some(0), "").complete);

        let failed = classify_exit(Some(1), "Conversion failed!");
        assert!(!failed.complete);
        assert_eq!(failed.reason, "Conversion failed!");

        let interrupted = classify_exit(Some(255), "frame=1");
        assert!(!interrupted.complete);
        assert_eq!(interrupted.reason, "User interrupted");

        assert_eq!(classify_exit(None, "").reason, "User interrupted");

        let other = classify_exit(Some(137), "whatever");
        assert!(!other.complete);
        assert_eq!(other.reason, "Encoder exited with code 137");
    }

    #[test]
    fn test_encode_args() {
        let cfg = PipelineConfig::with_root("/srv/vod");
        let args = build_encode_args(
            &cfg,
            Path::new("/srv/vod/encode/Movie_2019.mkv"),
            Path::new("/srv/vod/target/Movie_2019.mp4"),
            &cfg.hd_bitrates,
        );

        let pair = |flag: &str| {
            args.windows(2)
                .find(|w| w[0] == flag)
                .map(|w| w[1].clone())
        };
        assert_eq!(pair("-i").as_deref(), Some("/srv/vod/encode/Movie_2019.mkv"));
        assert_eq!(pair("-threads").as_deref(), Some("0"));
        assert_eq!(pair("-c:v").as_deref(), Some("libx264"));
        assert_eq!(pair("-b:v").as_deref(), Some("5000k"));
        assert_eq!(pair("-b:a").as_deref(), Some("256k"));
        assert_eq!(pair("-g").as_deref(), Some("200"));
        assert_eq!(pair("-keyint_min").as_deref(), Some("50"));
        assert_eq!(pair("-force_key_frames").as_deref(), Some("expr:gte(t,n_forced*2)"));
        assert_eq!(pair("-ac").as_deref(), Some("2"));
        assert_eq!(pair("-f").as_deref(), Some("mp4"));
        assert!(pair("-filter:v").is_none());
        assert_eq!(args.last().map(String::as_str), Some("/srv/vod/target/Movie_2019.mp4"));
    }

    #[test]
    fn test_deinterlace_filter() {
        let mut cfg = PipelineConfig::with_root("/srv/vod");
        cfg.deinterlace = true;
        let args = build_encode_args(&cfg, Path::new("a.mpg"), Path::new("a.mp4"), &cfg.sd_bitrates);
        assert!(args.windows(2).any(|w| w[0] == "-filter:v" && w[1] == "yadif=0"));
    }

    #[test]
    fn test_line_splitter() {
        let mut splitter = LineSplitter::default();
        let mut lines = splitter.push(b"first\nframe=1 time=00:00:01.00 bitrate=1k\rframe=2 ti");
        lines.extend(splitter.push(b"me=00:00:02.00 bitrate=1k\r\nlast"));
        assert_eq!(
            lines,
            vec![
                "first",
                "frame=1 time=00:00:01.00 bitrate=1k",
                "frame=2 time=00:00:02.00 bitrate=1k",
            ]
        );
        assert_eq!(splitter.finish().as_deref(), Some("last"));
    }

    #[test]
    fn test_track_reports_throttled_progress() {
        let cfg = PipelineConfig::with_root("/srv/vod");
        let job = EncodeJob::new(
            &cfg,
            PathBuf::from("/srv/vod/encode/a.mkv"),
            PathBuf::from("/srv/vod/target/a.mp4"),
            sample_info(100, 1080),
            &cfg.hd_bitrates,
        );
        let mut state = ProgressState {
            throttle: ProgressThrottle::new(cfg.progress_step),
            reported: Vec::new(),
            last_line: String::new(),
        };

        for secs in [5u64, 10, 16, 20, 31, 50, 99, 100] {
            let line = format!(
                "frame=1 fps=25 time=00:{:02}:{:02}.50 bitrate=900.0kbits/s speed=2x",
                secs / 60,
                secs % 60
            );
            job.track(&line, &mut state).unwrap();
        }
        assert_eq!(state.reported, vec![16, 31, 50, 99, 100]);

        job.track("frame=1 time=N/A bitrate=N/A", &mut state).unwrap();
        assert!(job.track("frame=1 time=bogus bitrate=1k", &mut state).is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use super::sample_info;
        use crate::supervisor::JobSupervisor;
        use std::os::unix::fs::PermissionsExt;

        fn fake_ffmpeg(dir: &Path, script: &str) -> PipelineConfig {
            let bin = dir.join("ffmpeg");
            std::fs::write(&bin, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
            let mut cfg = PipelineConfig::with_root(dir);
            cfg.ffmpeg_bin = Some(bin);
            cfg.progress_poll_ms = 50;
            cfg
        }

        fn staged_job(cfg: &PipelineConfig, dir: &Path) -> EncodeJob {
            let source = dir.join("clip.mkv");
            std::fs::write(&source, b"source").unwrap();
            EncodeJob::new(cfg, source, dir.join("clip.mp4"), sample_info(100, 1080), &cfg.hd_bitrates)
        }

        #[tokio::test]
        async fn test_successful_encode_wipes_source() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_ffmpeg(
                dir.path(),
                r#"for t in 00:00:10.00 00:00:20.00 00:00:40.00 00:01:00.00 00:01:20.00 00:01:40.00; do
  printf 'frame=100 fps=25 q=28.0 size=1024kB time=%s bitrate=800kbits/s speed=4x\r' "$t" >&2
done
printf 'video:1kB audio:1kB\n' >&2
exit 0"#,
            );
            let job = staged_job(&cfg, dir.path());
            let source = job.source.clone();
            let supervisor = JobSupervisor::new(1);

            let handle = job.start(Arc::new(cfg), supervisor.try_acquire().unwrap());
            let outcome = handle.wait().await;

            assert!(outcome.complete, "{:?}", outcome);
            assert!(!source.exists());
            assert_eq!(supervisor.active(), 0);
            assert_eq!(outcome.progress, vec![20, 40, 60, 80, 100]);
        }

        #[tokio::test]
        async fn test_exit_one_reports_last_line_and_keeps_source() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_ffmpeg(dir.path(), "echo 'clip.mkv: Invalid data found when processing input' >&2\nexit 1");
            let job = staged_job(&cfg, dir.path());
            let source = job.source.clone();

            let outcome = job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait().await;

            assert!(!outcome.complete);
            assert_eq!(outcome.reason, "clip.mkv: Invalid data found when processing input");
            assert!(source.exists());
        }

        #[tokio::test]
        async fn test_interrupted_encode() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_ffmpeg(dir.path(), "echo 'Exiting normally, received signal 2.' >&2\nexit 255");
            let job = staged_job(&cfg, dir.path());

            let outcome = job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait().await;
            assert_eq!(outcome.reason, "User interrupted");
        }

        #[tokio::test]
        async fn test_unexpected_exit_code_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_ffmpeg(dir.path(), "exit 3");
            let job = staged_job(&cfg, dir.path());
            let source = job.source.clone();

            let outcome = job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait().await;
            assert!(!outcome.complete);
            assert_eq!(outcome.reason, "Encoder exited with code 3");
            assert!(source.exists());
        }

        #[tokio::test]
        async fn test_missing_encoder_binary() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = PipelineConfig::with_root(dir.path());
            cfg.ffmpeg_bin = Some(dir.path().join("no-such-ffmpeg"));
            let job = staged_job(&cfg, dir.path());

            let outcome = job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait().await;
            assert!(!outcome.complete);
            assert!(outcome.reason.starts_with("Failed to start encoder"), "{}", outcome.reason);
        }

        #[tokio::test]
        async fn test_malformed_progress_time_fails_job() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_ffmpeg(
                dir.path(),
                "echo 'frame=1 time=12:xx:00.00 bitrate=1k' >&2\nsleep 5\nexit 0",
            );
            let job = staged_job(&cfg, dir.path());
            let source = job.source.clone();

            let outcome = tokio::time::timeout(
                Duration::from_secs(4),
                job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait(),
            )
            .await
            .expect("job was not aborted");
            assert!(!outcome.complete);
            assert!(outcome.reason.contains("invalid progress time"), "{}", outcome.reason);
            assert!(source.exists());
        }

        #[tokio::test]
        async fn test_wipe_disabled_keeps_source() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = fake_ffmpeg(dir.path(), "exit 0");
            cfg.delete_after_encode = false;
            let job = staged_job(&cfg, dir.path());
            let source = job.source.clone();

            let outcome = job.start(Arc::new(cfg), JobSupervisor::new(1).try_acquire().unwrap()).wait().await;
            assert!(outcome.complete);
            assert!(source.exists());
        }
    }
}
