//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support. The pending-wake flag lives
//! under the mutex, so setting it and sleeping on it cannot interleave.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::WorkerParking;
use crate::lock;

pub struct FallbackParking {
    /// Wake pending
    pending: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut pending = lock(&self.pending);
        if std::mem::take(&mut *pending) {
            return true;
        }

        self.parked.fetch_add(1, Ordering::Relaxed);
        pending = match timeout {
            Some(t) => match self.condvar.wait_timeout(pending, t) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            },
            None => self
                .condvar
                .wait(pending)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        };
        self.parked.fetch_sub(1, Ordering::Relaxed);
        std::mem::take(&mut *pending)
    }

    fn wake_one(&self) {
        *lock(&self.pending) = true;
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        *lock(&self.pending) = true;
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
