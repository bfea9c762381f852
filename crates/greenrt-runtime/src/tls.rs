//! Thread-local scheduler state
//!
//! Green threads migrate between OS threads while suspended. A function
//! that read a thread-local before a yield and again after it may see the
//! old thread's slot if the compiler cached the TLS address across the
//! call. Every accessor here is therefore `#[inline(never)]`: the address
//! is recomputed inside the callee on each use.

use std::cell::Cell;

use crate::switch::ControlBlock;

/// No worker marker
const NO_WORKER: (usize, usize) = (0, usize::MAX);

thread_local! {
    /// (pool key, worker index) for pool worker threads
    static WORKER: Cell<(usize, usize)> = const { Cell::new(NO_WORKER) };

    /// Control block of the green thread running on this OS thread
    static CURRENT_GREEN: Cell<*mut ControlBlock> = const { Cell::new(std::ptr::null_mut()) };
}

/// Mark this OS thread as worker `index` of the pool identified by `pool_key`
#[inline(never)]
pub(crate) fn set_worker(pool_key: usize, index: usize) {
    WORKER.with(|cell| cell.set((pool_key, index)));
}

#[inline(never)]
pub(crate) fn clear_worker() {
    WORKER.with(|cell| cell.set(NO_WORKER));
}

/// Index of this thread within the pool `pool_key`, if it is one of its workers
#[inline(never)]
pub(crate) fn worker_index_in(pool_key: usize) -> Option<usize> {
    let (key, index) = WORKER.try_with(|cell| cell.get()).unwrap_or(NO_WORKER);
    (key == pool_key && index != usize::MAX).then_some(index)
}

/// Worker index of this thread in whatever pool it belongs to
#[inline(never)]
pub fn try_current_worker_id() -> Option<usize> {
    let (_, index) = WORKER.try_with(|cell| cell.get()).unwrap_or(NO_WORKER);
    (index != usize::MAX).then_some(index)
}

#[inline(never)]
pub(crate) fn current_green() -> *mut ControlBlock {
    CURRENT_GREEN
        .try_with(|cell| cell.get())
        .unwrap_or(std::ptr::null_mut())
}

/// Install `cb` as the running green thread, returning the previous one
#[inline(never)]
pub(crate) fn replace_current_green(cb: *mut ControlBlock) -> *mut ControlBlock {
    CURRENT_GREEN.with(|cell| cell.replace(cb))
}

/// Whether the caller is executing on a green thread
#[inline(never)]
pub fn is_green_thread() -> bool {
    !current_green().is_null()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_marking() {
        assert_eq!(try_current_worker_id(), None);
        set_worker(0x1000, 3);
        assert_eq!(try_current_worker_id(), Some(3));
        assert_eq!(worker_index_in(0x1000), Some(3));
        assert_eq!(worker_index_in(0x2000), None);
        clear_worker();
        assert_eq!(worker_index_in(0x1000), None);
    }

    #[test]
    fn test_plain_thread_is_not_green() {
        assert!(!is_green_thread());
        assert!(current_green().is_null());
    }
}
