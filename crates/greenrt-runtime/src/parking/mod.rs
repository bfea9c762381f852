//! Worker parking mechanism
//!
//! Idle pool workers sleep here and are woken when work is queued.
//! Platform-specific implementations use the cheapest primitive available.
//!
//! A wake is never lost: `wake_one` always leaves a pending-wake flag
//! behind, and a worker about to park consumes that flag instead of
//! sleeping. Callers queue the work before waking, so a worker that
//! consumed a wake finds the work on its next poll.

use std::time::Duration;

/// Sleep/wake for idle workers
pub trait WorkerParking: Send + Sync {
    /// Park the calling worker until woken or `timeout` passes
    ///
    /// Returns `true` if a wake was consumed. Workers re-check for work
    /// either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker, or leave a wake pending for the next one
    fn wake_one(&self);

    /// Wake every parked worker (shutdown)
    fn wake_all(&self);

    /// Workers currently parked (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let start = std::time::Instant::now();
        let woken = parking.park(Some(Duration::from_millis(50)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        while parking.parked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        parking.wake_one();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let parking = PlatformParking::new();
        parking.wake_one();
        let start = std::time::Instant::now();
        assert!(parking.park(Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(5));
        // Consumed: the next park times out
        assert!(!parking.park(Some(Duration::from_millis(10))));
    }
}
