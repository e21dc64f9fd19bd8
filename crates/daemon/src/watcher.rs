use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{JobHandle, JobOutcome};
use crate::pipeline;
use crate::scan::{self, Stability};
use crate::supervisor::JobSupervisor;

/// Counts from one pass over the source tree
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub unstable: usize,
    pub started: usize,
    pub failed: usize,
    /// Unchanged files whose staged name is still taken
    pub held: usize,
}

/// Polls the source tree and hands stable uploads to the encode pipeline
pub struct Watcher {
    cfg: Arc<PipelineConfig>,
    supervisor: JobSupervisor,
    jobs: Vec<JobHandle>,
    /// Source files refused because their staged name was taken, with their size at the time
    collisions: HashMap<PathBuf, u64>,
    scan_interval: Duration,
    settle_interval: Duration,
}

impl Watcher {
    pub fn new(cfg: Arc<PipelineConfig>) -> Self {
        let supervisor = JobSupervisor::new(cfg.max_jobs);
        let scan_interval = Duration::from_secs(cfg.scan_interval_secs);
        let settle_interval = Duration::from_secs(cfg.settle_interval_secs);
        Self {
            cfg,
            supervisor,
            jobs: Vec::new(),
            collisions: HashMap::new(),
            scan_interval,
            settle_interval,
        }
    }

    /// Override the scan and settle intervals taken from the config
    pub fn with_intervals(mut self, scan: Duration, settle: Duration) -> Self {
        self.scan_interval = scan;
        self.settle_interval = settle;
        self
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        &self.supervisor
    }

    /// Scan forever
    pub async fn run(&mut self) {
        info!("[System] Checking source dir [{}]", self.cfg.source_dir().display());
        loop {
            let summary = self.scan_once().await;
            if summary.found > 0 {
                debug!("[System] Scan summary: {:?}", summary);
            }
            tokio::time::sleep(self.scan_interval).await;
        }
    }

    /// One pass: list, stabilize and hand off every qualifying file
    pub async fn scan_once(&mut self) -> ScanSummary {
        self.reap_finished().await;

        let mut summary = ScanSummary::default();
        let files = scan::list_sources(&self.cfg);
        self.collisions.retain(|path, _| files.iter().any(|f| &f.path == path));

        for file in files {
            summary.found += 1;

            let size = match scan::check_stable(&file.path, self.settle_interval).await {
                Ok(Stability::Stable(size)) => size,
                Ok(Stability::Changed { before, after }) => {
                    debug!("[System] [{}] still uploading ({} -> {} bytes)", file.name, before, after);
                    summary.unstable += 1;
                    continue;
                }
                Err(e) => {
                    error!("[System] [{}] {}", file.name, PipelineError::Stabilization(e));
                    summary.failed += 1;
                    continue;
                }
            };

            if self.collisions.get(&file.path) == Some(&size) {
                debug!("[System] [{}] staged name still taken, skipping", file.name);
                summary.held += 1;
                continue;
            }
            info!("[System] Got new source [{}] ({} bytes)", file.name, size);

            if self.supervisor.is_full() {
                debug!(
                    "[System] All {} job slots busy, waiting before handing off [{}]",
                    self.supervisor.max(),
                    file.name
                );
            }
            let slot = self.supervisor.acquire().await;

            match pipeline::handoff(&self.cfg, &self.supervisor, &file, slot).await {
                Ok(handle) => {
                    summary.started += 1;
                    self.collisions.remove(&file.path);
                    self.jobs.push(handle);
                }
                // handoff already logged the reason
                Err(PipelineError::AlreadyStaged(_)) => {
                    summary.failed += 1;
                    self.collisions.insert(file.path.clone(), size);
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Collect outcomes of jobs that have finished
    async fn reap_finished(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        let mut running = Vec::with_capacity(self.jobs.len());
        for handle in self.jobs.drain(..) {
            if handle.is_finished() {
                debug!("[System] Reaping job {} [{}]", handle.id, handle.name);
                outcomes.push(handle.wait().await);
            } else {
                running.push(handle);
            }
        }
        self.jobs = running;
        outcomes
    }

    /// Wait for every started job to finish
    pub async fn drain(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        for handle in self.jobs.drain(..) {
            outcomes.push(handle.wait().await);
        }
        outcomes
    }
}
