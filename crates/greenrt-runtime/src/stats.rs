//! Process-wide green-thread counters
//!
//! Relaxed atomics; a snapshot is only consistent per field.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static STARTED: AtomicU64 = AtomicU64::new(0);
static COMPLETED: AtomicU64 = AtomicU64::new(0);
static YIELDED: AtomicU64 = AtomicU64::new(0);
static RESUMED: AtomicU64 = AtomicU64::new(0);
static RESUMES_QUEUED: AtomicU64 = AtomicU64::new(0);
static FALLBACKS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub(crate) fn record_started() {
    STARTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_completed() {
    COMPLETED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_yielded() {
    YIELDED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_resumed() {
    RESUMED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_resume_queued() {
    RESUMES_QUEUED.fetch_add(1, Ordering::Relaxed);
}

/// Work that wanted a green thread but ran on a plain thread
#[inline]
pub(crate) fn record_fallback() {
    FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GreenStats {
    pub started: u64,
    pub completed: u64,
    pub yielded: u64,
    pub resumed: u64,
    /// Resumes handed to the pool because they fired on a green thread
    pub resumes_queued: u64,
    pub fallbacks: u64,
}

impl GreenStats {
    /// Green threads started and not yet completed
    pub fn live(&self) -> u64 {
        self.started.saturating_sub(self.completed)
    }
}

impl fmt::Display for GreenStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "started={} completed={} yielded={} resumed={} queued={} fallbacks={}",
            self.started,
            self.completed,
            self.yielded,
            self.resumed,
            self.resumes_queued,
            self.fallbacks
        )
    }
}

pub fn snapshot() -> GreenStats {
    GreenStats {
        started: STARTED.load(Ordering::Relaxed),
        completed: COMPLETED.load(Ordering::Relaxed),
        yielded: YIELDED.load(Ordering::Relaxed),
        resumed: RESUMED.load(Ordering::Relaxed),
        resumes_queued: RESUMES_QUEUED.load(Ordering::Relaxed),
        fallbacks: FALLBACKS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_advance() {
        let before = snapshot();
        record_started();
        record_yielded();
        record_resumed();
        record_completed();
        let after = snapshot();
        assert!(after.started > before.started);
        assert!(after.yielded > before.yielded);
        assert!(after.resumed > before.resumed);
        assert!(after.completed > before.completed);
        assert!(after.to_string().contains("started="));
    }
}
