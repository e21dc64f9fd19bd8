use std::io;
use std::path::PathBuf;
use thiserror::Error;
use crate::ffprobe::ProbeError;

/// Failures that stop the daemon before the watch loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not found")]
    MissingBinary(PathBuf),
}

/// Failures of a single source file; logged and skipped, never fatal
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("file vanished or became unreadable while checking its size ({0})")]
    Stabilization(#[source] io::Error),
    #[error("failed to move {from} to {to} ({source})")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is already staged")]
    AlreadyStaged(PathBuf),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}
