//! Ready queues for pool work items
//!
//! # Implementations
//! - `SimpleQueue` - Go-like per-worker + global queue with stealing

mod simple;

pub use simple::SimpleQueue;

/// A unit of work queued to the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread-safe queue of jobs shared by a pool's workers
///
/// Parking is separate (see `crate::parking`); a queue only stores work.
pub trait ReadyQueue: Send + Sync {
    /// Queue a job, on `hint_worker`'s local queue when given and not full
    fn push(&self, job: Job, hint_worker: Option<usize>);

    /// Next job for `worker_id`
    ///
    /// Order: periodic global check, local queue, global queue, stealing.
    fn pop(&self, worker_id: usize) -> Option<Job>;

    /// Approximate queued count (for diagnostics)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
