//! Write-side concurrency primitives: a counting permit pool and an in-flight counter.

use crate::error::DbError;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded pool of write permits.
#[derive(Debug)]
pub struct WritePermits {
    available: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

/// One unit of write capacity; returned to the pool on drop.
#[derive(Debug)]
pub struct WritePermit<'a> {
    pool: &'a WritePermits,
}

impl WritePermits {
    pub fn new(limit: usize) -> Self {
        Self {
            available: Mutex::new(limit),
            released: Condvar::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> Result<usize, DbError> {
        Ok(*self.available.lock()?)
    }

    /// Takes a permit only if one is free right now.
    pub fn try_acquire(&self) -> Result<Option<WritePermit<'_>>, DbError> {
        let mut available = self.available.lock()?;
        if *available == 0 {
            return Ok(None);
        }
        *available -= 1;
        Ok(Some(WritePermit { pool: self }))
    }

    /// Waits up to `timeout` for a permit. `None` means the wait timed out.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<WritePermit<'_>>, DbError> {
        let guard = self.available.lock()?;
        let (mut available, _) = self
            .released
            .wait_timeout_while(guard, timeout, |available| *available == 0)?;
        if *available == 0 {
            return Ok(None);
        }
        *available -= 1;
        Ok(Some(WritePermit { pool: self }))
    }

    fn release(&self) {
        // A poisoned counter is still a valid counter.
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        *available += 1;
        drop(available);
        self.released.notify_one();
    }
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Counts operations in progress so shutdown can wait for them.
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Registration of one in-flight operation; deregisters on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    tracker: &'a InFlight,
}

impl InFlight {
    pub fn enter(&self) -> Result<InFlightGuard<'_>, DbError> {
        *self.count.lock()? += 1;
        Ok(InFlightGuard { tracker: self })
    }

    pub fn count(&self) -> Result<usize, DbError> {
        Ok(*self.count.lock()?)
    }

    /// Blocks until no operation is in flight.
    pub fn wait_idle(&self) -> Result<(), DbError> {
        let guard = self.count.lock()?;
        let _idle = self.idle.wait_while(guard, |count| *count > 0)?;
        Ok(())
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.tracker.count.lock().unwrap_or_else(|e| e.into_inner());
        *count -= 1;
        if *count == 0 {
            self.tracker.idle.notify_all();
        }
    }
}
