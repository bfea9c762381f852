//! Green-thread stack region and pool
//!
//! One virtual region is reserved up front and cut into fixed-size slots:
//!
//! ```text
//! slot i:  [ guard page (PROT_NONE) | stack ............ ]
//!          ^ base + i * slot_size    ^ limit              ^ top
//! ```
//!
//! Stacks grow down, so the guard page sits below `limit` and catches any
//! overflow the cooperative check in `switch::check_stack` missed; the
//! fault handler in [`crate::signal`] reports it and aborts. A slot
//! is made writable the first time it is handed out and stays writable
//! while its index cycles through the free queue.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::UnixMemory as PlatformMemory;
    } else {
        compile_error!("greenrt stacks need a unix memory backend");
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crossbeam_queue::ArrayQueue;
use greenrt_core::constants::{GUARD_SIZE, PAGE_SIZE};
use greenrt_core::error::{MemoryError, SchedError, SchedResult};
use greenrt_core::{kdebug, kwarn, StackBounds, StackMemory};

use crate::{config, signal};

/// One checked-out stack; hand it back with [`StackPool::release`]
#[derive(Debug)]
pub struct StackSlot {
    index: u32,
    bounds: StackBounds,
}

impl StackSlot {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn bounds(&self) -> StackBounds {
        self.bounds
    }
}

pub struct StackPool<M: StackMemory = PlatformMemory> {
    mem: M,
    /// Region base address
    base: usize,
    /// Guard + stack, page multiple
    slot_size: usize,
    /// Usable bytes per slot
    stack_size: usize,
    max_slots: u32,
    /// Indices of activated slots ready for reuse
    free: ArrayQueue<u32>,
    /// Next never-activated slot
    next_fresh: AtomicU32,
    /// Slots currently checked out
    in_use: AtomicU32,
    /// Keep pages resident between uses
    reuse: bool,
}

// Safety: `base` is only turned back into a pointer for slots this pool owns
unsafe impl<M: StackMemory> Send for StackPool<M> {}
unsafe impl<M: StackMemory> Sync for StackPool<M> {}

impl StackPool<PlatformMemory> {
    pub fn new(max_slots: usize, stack_size: usize, reuse: bool) -> SchedResult<Self> {
        Self::with_memory(PlatformMemory, max_slots, stack_size, reuse)
    }
}

impl<M: StackMemory> StackPool<M> {
    /// Reserve the region for `max_slots` stacks of `stack_size` usable bytes
    pub fn with_memory(mem: M, max_slots: usize, stack_size: usize, reuse: bool) -> SchedResult<Self> {
        if max_slots == 0 || max_slots >= u32::MAX as usize {
            return Err(MemoryError::TooManyStacks.into());
        }
        let stack_size = stack_size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let slot_size = stack_size + GUARD_SIZE;
        let total = max_slots
            .checked_mul(slot_size)
            .ok_or(MemoryError::TooManyStacks)?;

        let base = mem.reserve_region(total)? as usize;
        kdebug!(
            "reserved {} stack slots of {} KB at {:#x}",
            max_slots,
            stack_size / 1024,
            base
        );

        Ok(Self {
            mem,
            base,
            slot_size,
            stack_size,
            max_slots: max_slots as u32,
            free: ArrayQueue::new(max_slots),
            next_fresh: AtomicU32::new(0),
            in_use: AtomicU32::new(0),
            reuse,
        })
    }

    fn bounds_of(&self, index: u32) -> StackBounds {
        let slot_base = self.base + index as usize * self.slot_size;
        let limit = slot_base + GUARD_SIZE;
        StackBounds::new(limit, limit + self.stack_size)
    }

    /// Check out a stack, reusing a released slot when one is queued
    pub fn acquire(&self) -> SchedResult<StackSlot> {
        if let Some(index) = self.free.pop() {
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Ok(StackSlot { index, bounds: self.bounds_of(index) });
        }

        let index = loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.max_slots {
                return Err(SchedError::NoStacksAvailable);
            }
            if self
                .next_fresh
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break current;
            }
        };

        let bounds = self.bounds_of(index);
        // On failure the index is retired; it never reaches the free queue
        // because everything there is assumed writable.
        self.mem.protect_rw(bounds.limit as *mut u8, bounds.len())?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(StackSlot { index, bounds })
    }

    /// Return a stack. Nothing may still be running on it.
    pub fn release(&self, slot: StackSlot) {
        debug_assert!(slot.index < self.max_slots);
        if !self.reuse {
            if let Err(e) = self.mem.advise_dontneed(slot.bounds.limit as *mut u8, slot.bounds.len()) {
                kwarn!("could not drop pages of stack {}: {}", slot.index, e);
            }
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        // Capacity equals max_slots, so the push cannot fail
        let _ = self.free.push(slot.index);
    }

    #[inline]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.max_slots
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Slot whose guard page contains `addr`
    pub fn guard_slot(&self, addr: usize) -> Option<u32> {
        let offset = addr.checked_sub(self.base)?;
        let index = offset / self.slot_size;
        (index < self.max_slots as usize && offset % self.slot_size < GUARD_SIZE)
            .then_some(index as u32)
    }
}

impl<M: StackMemory> Drop for StackPool<M> {
    fn drop(&mut self) {
        let total = self.max_slots as usize * self.slot_size;
        let _ = self.mem.release_region(self.base as *mut u8, total);
    }
}

static STACK_POOL: OnceLock<Result<StackPool, SchedError>> = OnceLock::new();

/// Process-wide stack pool, sized from [`config::global`]
pub fn stack_pool() -> SchedResult<&'static StackPool> {
    STACK_POOL
        .get_or_init(|| {
            let cfg = config::global();
            let pool = StackPool::new(cfg.max_green_threads, cfg.stack_size, cfg.reuse_stacks)?;
            signal::install_overflow_handler();
            Ok(pool)
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Guard-page slot of the process-wide pool containing `addr`
///
/// Takes no lock and does not allocate, so fault handlers may call it.
pub fn guard_hit(addr: usize) -> Option<u32> {
    STACK_POOL.get()?.as_ref().ok()?.guard_slot(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_slots_are_disjoint_and_writable() {
        let pool = StackPool::new(4, 64 * 1024, true).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(a.bounds().len(), 64 * 1024);
        assert!(a.bounds().top <= b.bounds().limit || b.bounds().top <= a.bounds().limit);

        for slot in [&a, &b] {
            let bounds = slot.bounds();
            unsafe {
                *(bounds.limit as *mut u64) = 0xdead_beef;
                *((bounds.top - 8) as *mut u64) = 0xfeed_face;
                assert_eq!(*(bounds.limit as *const u64), 0xdead_beef);
            }
        }
        assert_eq!(pool.in_use(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let pool = StackPool::new(2, 64 * 1024, false).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(SchedError::NoStacksAvailable)));

        let index = a.index();
        pool.release(a);
        let c = pool.acquire().unwrap();
        assert_eq!(c.index(), index);
        // Pages were dropped on release; the slot is still mapped RW
        unsafe {
            assert_eq!(*(c.bounds().limit as *const u64), 0);
        }
    }

    #[test]
    fn test_guard_slot_covers_guard_pages_only() {
        let pool = StackPool::new(3, 64 * 1024, true).unwrap();
        let slot = pool.acquire().unwrap();
        let bounds = slot.bounds();
        assert_eq!(pool.guard_slot(bounds.limit - 1), Some(slot.index()));
        assert_eq!(pool.guard_slot(bounds.limit - GUARD_SIZE), Some(slot.index()));
        assert_eq!(pool.guard_slot(bounds.limit), None);
        assert_eq!(pool.guard_slot(bounds.top - 8), None);
        assert_eq!(pool.guard_slot(0), None);
        assert_eq!(pool.guard_slot(usize::MAX), None);
        pool.release(slot);
    }

    #[test]
    fn test_stack_size_rounds_to_pages() {
        let pool = StackPool::new(1, 64 * 1024 + 1, true).unwrap();
        assert_eq!(pool.stack_size(), 64 * 1024 + PAGE_SIZE);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(StackPool::new(8, 64 * 1024, true).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let slot = pool.acquire().unwrap();
                        unsafe { *((slot.bounds().top - 8) as *mut usize) = slot.index() as usize };
                        pool.release(slot);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.in_use(), 0);
    }
}
