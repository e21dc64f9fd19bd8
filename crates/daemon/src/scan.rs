use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::{debug, warn};
use walkdir::WalkDir;
use crate::config::PipelineConfig;

/// One file discovered under the source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Base name including extension
    pub name: String,
    pub extension: String,
}

impl SourceFile {
    /// Build from a path; None if it has no UTF-8 base name or extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let extension = path.extension()?.to_str()?.to_string();
        Some(Self {
            path: path.to_path_buf(),
            name,
            extension,
        })
    }
}

/// Result of the two-read size check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Size unchanged across the settle interval
    Stable(u64),
    /// Still being written
    Changed { before: u64, after: u64 },
}

/// List files under the source tree whose extension is allowed, in walk order
pub fn list_sources(cfg: &PipelineConfig) -> Vec<SourceFile> {
    let root = cfg.source_dir();
    let mut files = Vec::new();

    if !root.exists() {
        warn!("[System] Source dir does not exist: {}", root.display());
        return files;
    }

    let walker = WalkDir::new(&root).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("[System] Error reading source entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(file) = SourceFile::from_path(entry.path()) else {
            continue;
        };
        if !cfg.accepts_extension(&file.extension) {
            continue;
        }

        debug!("[System] Found media file: {}", file.path.display());
        files.push(file);
    }

    files
}

/// Read the size twice, `settle` apart
pub async fn check_stable(path: &Path, settle: Duration) -> io::Result<Stability> {
    let before = tokio::fs::metadata(path).await?.len();
    tokio::time::sleep(settle).await;
    let after = tokio::fs::metadata(path).await?.len();

    if before == after {
        Ok(Stability::Stable(after))
    } else {
        Ok(Stability::Changed { before, after })
    }
}
