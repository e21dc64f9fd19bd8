use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Bounds the number of encode jobs running at once.
///
/// A job holds a [`JobSlot`] for its whole lifetime; dropping the slot frees it
/// and wakes whoever is waiting in [`JobSupervisor::acquire`].
#[derive(Debug, Clone)]
pub struct JobSupervisor {
    slots: Arc<Semaphore>,
    max: usize,
}

/// Permission to run one encode job
#[derive(Debug)]
pub struct JobSlot {
    _permit: OwnedSemaphorePermit,
}

impl JobSupervisor {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<JobSlot> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Some(JobSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Wait until a slot is free and take it
    pub async fn acquire(&self) -> JobSlot {
        loop {
            // The semaphore is never closed, the retry only guards the type
            if let Ok(permit) = self.slots.clone().acquire_owned().await {
                return JobSlot { _permit: permit };
            }
            tokio::task::yield_now().await;
        }
    }

    /// Jobs currently holding a slot
    pub fn active(&self) -> usize {
        self.max - self.slots.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// True when no slot is free
    pub fn is_full(&self) -> bool {
        self.slots.available_permits() == 0
    }
}
