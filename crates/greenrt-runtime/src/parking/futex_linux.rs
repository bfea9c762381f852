//! Linux futex-based worker parking
//!
//! Futex word semantics:
//! - 0 = no wake pending
//! - 1 = wake pending
//!
//! Parking registers in `parked`, then tries to consume a pending wake and
//! only sleeps (FUTEX_WAIT on 0) if there was none. Waking sets the word
//! first and issues FUTEX_WAKE only when someone is registered. Both sides
//! use SeqCst, so either the parker sees the flag or the waker sees the
//! parker.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use nix::errno::Errno;

use super::WorkerParking;

pub struct FutexParking {
    futex: AtomicU32,
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        if self.futex.swap(0, Ordering::SeqCst) != 0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Sleeps only while the word is still 0
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };
        let errno = if result == 0 { None } else { Some(Errno::last()) };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        // Whatever woke us (FUTEX_WAKE, EAGAIN because the word changed),
        // a set flag is ours to consume
        let consumed = self.futex.swap(0, Ordering::SeqCst) != 0;
        match errno {
            None => consumed,
            Some(Errno::ETIMEDOUT) | Some(Errno::EINTR) | Some(Errno::EAGAIN) => consumed,
            Some(e) => {
                greenrt_core::kwarn!("futex wait failed: {}", e);
                consumed
            }
        }
    }

    fn wake_one(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) != 0 {
            self.futex_wake(1);
        }
    }

    fn wake_all(&self) {
        self.futex.store(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) != 0 {
            self.futex_wake(i32::MAX);
        }
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
