use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{error, info};
use crate::classifier;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ffprobe;
use crate::job::{EncodeJob, JobHandle};
use crate::normalize::normalize;
use crate::scan::SourceFile;
use crate::supervisor::{JobSlot, JobSupervisor};

/// Output path in the target area for a staged file
pub fn target_path(cfg: &PipelineConfig, staged: &Path) -> PathBuf {
    let stem = staged
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    cfg.target_dir().join(format!("{}.{}", stem, cfg.target_extension))
}

/// Rename `file` into the staging area under its normalized name
pub async fn stage(cfg: &PipelineConfig, file: &SourceFile) -> Result<PathBuf, PipelineError> {
    let staged_name = normalize(&file.name);
    info!("[Rename] {} --> {}", file.name, staged_name);

    let staged = cfg.encode_dir().join(&staged_name);
    if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
        return Err(PipelineError::AlreadyStaged(staged));
    }

    tokio::fs::rename(&file.path, &staged)
        .await
        .map_err(|source| PipelineError::Rename {
            from: file.path.clone(),
            to: staged.clone(),
            source,
        })?;
    Ok(staged)
}

/// Pass a stable source file through rename, probe and classification, then start its encode.
///
/// `slot` is released on every failure path and held by the job otherwise.
pub async fn handoff(
    cfg: &Arc<PipelineConfig>,
    supervisor: &JobSupervisor,
    file: &SourceFile,
    slot: JobSlot,
) -> Result<JobHandle, PipelineError> {
    let staged = match stage(cfg, file).await {
        Ok(path) => path,
        Err(e) => {
            error!("[Rename] [{}] {}", file.name, e);
            return Err(e);
        }
    };
    let target = target_path(cfg, &staged);

    // probe_file logs the failure reason itself
    let info = match ffprobe::probe_file(cfg, &staged).await {
        Ok(info) => info,
        Err(e) => {
            error!("[MediaInfo] [{}] Encoding error", file.name);
            return Err(e.into());
        }
    };

    let decision = classifier::decide(&info, cfg);
    if decision.auto {
        info!("[Encode] [{}] Encoder auto quality enabled", file.name);
        info!("[Encode] [{}] Source has {} quality", file.name, decision.tier);
    }

    let job = EncodeJob::new(cfg, staged, target, info, &decision.bitrates);
    let name = job.name();
    let handle = job.start(Arc::clone(cfg), slot);

    info!(
        "[Encode] [{}] Encoding started (video {}, audio {})",
        name, decision.bitrates.video, decision.bitrates.audio
    );
    info!("[System] Active jobs: {} / {}", supervisor.active(), supervisor.max());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout() -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::with_root(dir.path());
        for d in [cfg.source_dir(), cfg.encode_dir(), cfg.target_dir()] {
            fs::create_dir_all(d).unwrap();
        }
        (dir, cfg)
    }

    #[test]
    fn test_target_path_uses_target_extension() {
        let cfg = PipelineConfig::with_root("/srv/vod");
        assert_eq!(
            target_path(&cfg, Path::new("/srv/vod/encode/Movie_2019.mkv")),
            PathBuf::from("/srv/vod/target/Movie_2019.mp4")
        );
    }

    #[tokio::test]
    async fn test_stage_moves_and_renames() {
        let (_dir, cfg) = layout();
        let path = cfg.source_dir().join("Movie.2019.1080p.BluRay.x264-GROUP.mkv");
        fs::write(&path, b"data").unwrap();
        let file = SourceFile::from_path(&path).unwrap();

        let staged = stage(&cfg, &file).await.unwrap();
        assert_eq!(staged, cfg.encode_dir().join("Movie_2019.mkv"));
        assert!(staged.exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stage_refuses_to_overwrite() {
        let (_dir, cfg) = layout();
        fs::write(cfg.encode_dir().join("Clip.mkv"), b"earlier").unwrap();
        let path = cfg.source_dir().join("Clip.mkv");
        fs::write(&path, b"later").unwrap();
        let file = SourceFile::from_path(&path).unwrap();

        let err = stage(&cfg, &file).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyStaged(_)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_stage_vanished_source_is_rename_failure() {
        let (_dir, cfg) = layout();
        let file = SourceFile::from_path(&cfg.source_dir().join("gone.mkv")).unwrap();

        let err = stage(&cfg, &file).await.unwrap_err();
        assert!(matches!(err, PipelineError::Rename { .. }));
    }
}
