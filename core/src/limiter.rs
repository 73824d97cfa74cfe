use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds how many units of work run at once and records the highest
/// concurrency actually observed.
pub struct JobLimiter {
    sem: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    limit: usize,
}

impl Clone for JobLimiter {
    fn clone(&self) -> Self {
        JobLimiter {
            sem: self.sem.clone(),
            active: self.active.clone(),
            peak: self.peak.clone(),
            limit: self.limit,
        }
    }
}

impl JobLimiter {
    pub fn new(max_jobs: usize) -> Self {
        let limit = max_jobs.max(1);
        JobLimiter {
            sem: Arc::new(Semaphore::new(limit)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Wait for a free slot. The slot is released when the returned guard drops.
    pub async fn acquire(&self) -> Result<JobSlot, AcquireError> {
        let permit = self.sem.clone().acquire_owned().await?;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(JobSlot { _permit: permit, active: self.active.clone() })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct JobSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
