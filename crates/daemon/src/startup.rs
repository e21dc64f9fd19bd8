use std::path::PathBuf;
use log::{info, warn};
use crate::config::PipelineConfig;
use crate::error::StartupError;

/// Create the directory tree and verify the encoder binaries exist
pub fn prepare_layout(cfg: &PipelineConfig) -> Result<(), StartupError> {
    for dir in [cfg.source_dir(), cfg.encode_dir(), cfg.target_dir()] {
        std::fs::create_dir_all(&dir).map_err(|source| StartupError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }

    for bin in [cfg.ffmpeg_bin(), cfg.ffprobe_bin()] {
        if !bin.exists() {
            return Err(StartupError::MissingBinary(bin));
        }
    }

    info!("[System] Startup check OK");
    Ok(())
}

/// Files left in the staging area by a previous run.
///
/// A staged file is only present while its job is in flight, so anything
/// found here at startup belongs to a job that never finished.
pub fn staged_leftovers(cfg: &PipelineConfig) -> Vec<PathBuf> {
    let mut leftovers: Vec<PathBuf> = match std::fs::read_dir(cfg.encode_dir()) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            warn!("[System] Cannot read staging dir {}: {}", cfg.encode_dir().display(), e);
            Vec::new()
        }
    };
    leftovers.sort();

    for path in &leftovers {
        warn!("[System] Incomplete job from a previous run left in staging: {}", path.display());
    }
    leftovers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_prepare_creates_dirs_and_requires_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::with_root(dir.path());

        let err = prepare_layout(&cfg).unwrap_err();
        assert!(matches!(err, StartupError::MissingBinary(ref p) if p == &cfg.ffmpeg_bin()));
        assert!(cfg.source_dir().is_dir());
        assert!(cfg.encode_dir().is_dir());
        assert!(cfg.target_dir().is_dir());

        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(cfg.ffmpeg_bin(), b"").unwrap();
        fs::write(cfg.ffprobe_bin(), b"").unwrap();
        prepare_layout(&cfg).unwrap();
    }

    #[test]
    fn test_directory_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the root should be
        let root = dir.path().join("root");
        fs::write(&root, b"").unwrap();
        let cfg = PipelineConfig::with_root(&root);

        assert!(matches!(prepare_layout(&cfg), Err(StartupError::CreateDir { .. })));
    }

    #[test]
    fn test_staged_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::with_root(dir.path());
        fs::create_dir_all(cfg.encode_dir()).unwrap();
        fs::write(cfg.encode_dir().join("b.mkv"), b"").unwrap();
        fs::write(cfg.encode_dir().join("a.avi"), b"").unwrap();

        let leftovers = staged_leftovers(&cfg);
        assert_eq!(
            leftovers,
            vec![cfg.encode_dir().join("a.avi"), cfg.encode_dir().join("b.mkv")]
        );
    }
}
