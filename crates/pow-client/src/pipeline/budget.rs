//! Staging budget.
//!
//! Bytes are reserved when a task is admitted to staging and released when
//! the task reaches a terminal stage, so the sum of bytes in flight never
//! exceeds the budget.

use parking_lot::Mutex;

use super::PipelineError;

/// Thread-safe byte budget shared by every pipeline task.
#[derive(Debug)]
pub struct StagingLimit {
    max: u64,
    cached: Mutex<u64>,
}

impl StagingLimit {
    pub fn new(max_staging_bytes: u64) -> Self {
        Self {
            max: max_staging_bytes,
            cached: Mutex::new(0),
        }
    }

    /// Try to reserve `bytes`.
    ///
    /// `Ok(false)` means retry later. An item larger than the whole budget
    /// is an error. An item exactly the size of the budget is admitted
    /// only when nothing else is reserved.
    pub fn ready(&self, bytes: u64) -> Result<bool, PipelineError> {
        if bytes > self.max {
            return Err(PipelineError::TooLarge {
                bytes,
                max: self.max,
            });
        }
        let mut cached = self.cached.lock();
        if *cached > 0 && *cached + bytes >= self.max {
            return Ok(false);
        }
        *cached += bytes;
        Ok(true)
    }

    /// Reserve `bytes` that are already in flight, such as a resumed task
    /// whose deal is still running. Never waits and may overshoot the budget.
    pub fn hold(&self, bytes: u64) {
        *self.cached.lock() += bytes;
    }

    /// Release a reservation made by [`Self::ready`] or [`Self::hold`].
    pub fn done(&self, bytes: u64) {
        let mut cached = self.cached.lock();
        *cached = cached.saturating_sub(bytes);
    }

    /// Bytes currently reserved.
    pub fn cached(&self) -> u64 {
        *self.cached.lock()
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}
