//! Pool of reusable logical thread ids
//!
//! Hands out small integer ids. Released ids go onto a LIFO free stack so
//! the most recently retired id is the next one handed out, which keeps
//! the id space dense.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::constants::THREAD_ID_NONE;
use crate::error::{SchedError, SchedResult};
use crate::id::LogicalThreadId;
use crate::spinlock::SpinLock;

pub struct IdPool {
    /// Retired ids, most recent last
    free: SpinLock<Vec<u32>>,

    /// Next never-used id
    next_fresh: AtomicU32,

    /// Exclusive upper bound on ids
    limit: u32,

    /// Ids currently handed out
    live: AtomicU32,
}

impl IdPool {
    /// Pool handing out ids in `0..limit`
    pub fn new(limit: u32) -> Self {
        Self {
            free: SpinLock::new(Vec::new()),
            next_fresh: AtomicU32::new(0),
            limit: limit.min(THREAD_ID_NONE),
            live: AtomicU32::new(0),
        }
    }

    /// Pool covering the whole id space
    pub fn unbounded() -> Self {
        Self::new(THREAD_ID_NONE)
    }

    /// Take an id, preferring the most recently released one
    pub fn acquire(&self) -> SchedResult<LogicalThreadId> {
        if let Some(id) = self.free.lock().pop() {
            self.live.fetch_add(1, Ordering::Relaxed);
            return Ok(LogicalThreadId::new(id));
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.limit {
                return Err(SchedError::IdsExhausted);
            }
            if self
                .next_fresh
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.live.fetch_add(1, Ordering::Relaxed);
                return Ok(LogicalThreadId::new(current));
            }
        }
    }

    /// Return an id for reuse. The sentinel is ignored.
    pub fn release(&self, id: LogicalThreadId) {
        if id.is_none() {
            return;
        }
        debug_assert!(id.as_u32() < self.next_fresh.load(Ordering::Relaxed));
        self.free.lock().push(id.as_u32());
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::Relaxed)
    }

    /// Number of ids waiting on the free stack
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    #[inline]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for IdPool {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fresh_ids_are_sequential() {
        let pool = IdPool::new(10);
        assert_eq!(pool.acquire().unwrap().as_u32(), 0);
        assert_eq!(pool.acquire().unwrap().as_u32(), 1);
        assert_eq!(pool.acquire().unwrap().as_u32(), 2);
        assert_eq!(pool.live_count(), 3);
    }

    #[test]
    fn test_lifo_reuse() {
        let pool = IdPool::new(10);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.acquire().unwrap(), b);
        assert_eq!(pool.acquire().unwrap(), a);
        assert_eq!(pool.acquire().unwrap().as_u32(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let pool = IdPool::new(2);
        let a = pool.acquire().unwrap();
        pool.acquire().unwrap();
        assert_eq!(pool.acquire(), Err(SchedError::IdsExhausted));
        pool.release(a);
        assert_eq!(pool.acquire().unwrap(), a);
    }

    #[test]
    fn test_release_none_is_ignored() {
        let pool = IdPool::new(4);
        pool.release(LogicalThreadId::NONE);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_concurrent_ids_unique() {
        let pool = Arc::new(IdPool::new(10_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    (0..500).map(|_| pool.acquire().unwrap().as_u32()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id {} handed out twice", id);
            }
        }
        assert_eq!(pool.live_count(), 2000);
    }
}
