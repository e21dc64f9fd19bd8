pub mod config;
pub mod normalize;
pub mod ffprobe;
pub mod classifier;
pub mod progress;
pub mod supervisor;
pub mod job;
pub mod scan;
pub mod pipeline;
pub mod startup;
pub mod error;
pub mod watcher;

pub use config::{BitratePair, PipelineConfig};
pub use error::{PipelineError, StartupError};
pub use ffprobe::{MediaInfo, ProbeError};
pub use classifier::{QualityDecision, QualityTier};
pub use job::{EncodeJob, JobHandle, JobOutcome};
pub use supervisor::{JobSlot, JobSupervisor};
pub use watcher::Watcher;
