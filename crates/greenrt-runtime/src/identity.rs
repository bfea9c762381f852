//! Logical thread identity
//!
//! Every OS thread and every green thread gets a small id from one shared
//! pool. Code on a green thread sees the green thread's id, stable across
//! suspensions and migrations; everywhere else the OS thread's id is used.

use std::cell::Cell;
use std::sync::OnceLock;

use greenrt_core::{IdPool, LogicalThreadId, SchedResult};

static IDS: OnceLock<IdPool> = OnceLock::new();

fn ids() -> &'static IdPool {
    IDS.get_or_init(IdPool::unbounded)
}

/// Lazily assigned id of an OS thread, returned to the pool at thread exit
struct OsThreadId(Cell<LogicalThreadId>);

impl OsThreadId {
    fn get_or_acquire(&self) -> LogicalThreadId {
        let id = self.0.get();
        if id.is_some() {
            return id;
        }
        match ids().acquire() {
            Ok(id) => {
                self.0.set(id);
                id
            }
            Err(_) => LogicalThreadId::NONE,
        }
    }
}

impl Drop for OsThreadId {
    fn drop(&mut self) {
        ids().release(self.0.get());
    }
}

thread_local! {
    static OS_THREAD_ID: OsThreadId = const { OsThreadId(Cell::new(LogicalThreadId::NONE)) };
}

/// Id of the logical thread executing the caller
#[inline(never)]
pub fn current_thread_id() -> LogicalThreadId {
    if let Some(id) = crate::switch::current_green_id() {
        return id;
    }
    os_thread_id()
}

/// Id of the OS thread executing the caller, ignoring green threads
#[inline(never)]
pub fn os_thread_id() -> LogicalThreadId {
    OS_THREAD_ID
        .try_with(|id| id.get_or_acquire())
        .unwrap_or(LogicalThreadId::NONE)
}

pub(crate) fn acquire_green_id() -> SchedResult<LogicalThreadId> {
    ids().acquire()
}

pub(crate) fn release_green_id(id: LogicalThreadId) {
    ids().release(id);
}

/// Ids currently held by live OS and green threads
pub fn live_ids() -> u32 {
    ids().live_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_thread_id_is_stable() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(a, os_thread_id());
    }

    #[test]
    fn test_threads_get_distinct_ids() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_exited_thread_releases_id() {
        let before = live_ids();
        let held = std::thread::spawn(|| (current_thread_id(), live_ids()))
            .join()
            .unwrap();
        assert!(held.0.is_some());
        assert!(held.1 >= 1);
        // Other tests run concurrently; the exited thread's id must not pile up
        assert!(live_ids() <= before + 64);
    }
}
