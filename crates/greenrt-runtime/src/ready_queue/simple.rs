//! Simple Go-like ready queue
//!
//! Design:
//! - Per-worker local queue (VecDeque, SpinLock), bounded
//! - Global queue (VecDeque, Mutex), unbounded
//! - Global checked first every 61 pops so it cannot starve
//! - Idle workers steal half of a victim's local queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use greenrt_core::SpinLock;

use super::{Job, ReadyQueue};
use crate::lock;

/// Check global every N pops (Go uses 61)
const GLOBAL_CHECK_INTERVAL: usize = 61;

struct LocalQueue {
    queue: SpinLock<VecDeque<Job>>,
    len: AtomicUsize,
    capacity: usize,
}

impl LocalQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: SpinLock::new(VecDeque::with_capacity(capacity)),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Push to back. Hands the job back if full.
    fn push(&self, job: Job) -> Result<(), Job> {
        let mut q = self.queue.lock();
        if q.len() >= self.capacity {
            return Err(job);
        }
        q.push_back(job);
        self.len.store(q.len(), Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Option<Job> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.queue.lock();
        let job = q.pop_front();
        self.len.store(q.len(), Ordering::Release);
        job
    }

    /// Steal half (rounded up) from the front
    fn steal_half(&self) -> Vec<Job> {
        if self.len.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }
        let mut q = self.queue.lock();
        let n = q.len().div_ceil(2);
        let stolen: Vec<Job> = q.drain(..n).collect();
        self.len.store(q.len(), Ordering::Release);
        stolen
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

struct GlobalQueue {
    queue: Mutex<VecDeque<Job>>,
    len: AtomicUsize,
}

impl GlobalQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            len: AtomicUsize::new(0),
        }
    }

    fn push(&self, job: Job) {
        let mut q = lock(&self.queue);
        q.push_back(job);
        self.len.store(q.len(), Ordering::Release);
    }

    fn pop(&self) -> Option<Job> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = lock(&self.queue);
        let job = q.pop_front();
        self.len.store(q.len(), Ordering::Release);
        job
    }

    /// Pop up to `max` jobs for a worker's local queue
    fn pop_batch(&self, max: usize) -> Vec<Job> {
        if self.len.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }
        let mut q = lock(&self.queue);
        let n = q.len().min(max);
        let batch: Vec<Job> = q.drain(..n).collect();
        self.len.store(q.len(), Ordering::Release);
        batch
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

pub struct SimpleQueue {
    local: Vec<LocalQueue>,
    global: GlobalQueue,
    /// Per-worker pop counter for the periodic global check
    counters: Vec<AtomicUsize>,
    /// Per-worker LCG state for victim selection
    rng: Vec<AtomicUsize>,
}

impl SimpleQueue {
    pub fn new(num_workers: usize, local_capacity: usize, global_capacity: usize) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            local: (0..num_workers).map(|_| LocalQueue::new(local_capacity)).collect(),
            global: GlobalQueue::new(global_capacity),
            counters: (0..num_workers).map(|_| AtomicUsize::new(0)).collect(),
            rng: (0..num_workers)
                .map(|i| AtomicUsize::new(i.wrapping_mul(2654435761) + 1))
                .collect(),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.local.len()
    }

    fn random_start(&self, worker_id: usize) -> usize {
        let rng = &self.rng[worker_id];
        let old = rng.load(Ordering::Relaxed);
        let new = old.wrapping_mul(1103515245).wrapping_add(12345);
        rng.store(new, Ordering::Relaxed);
        new % self.local.len()
    }

    /// Steal from the first non-empty victim, starting at a random one
    fn try_steal(&self, worker_id: usize) -> Option<Job> {
        let num = self.local.len();
        if num <= 1 {
            return None;
        }
        let start = self.random_start(worker_id);
        for offset in 0..num {
            let victim = (start + offset) % num;
            if victim == worker_id {
                continue;
            }
            let mut stolen = self.local[victim].steal_half().into_iter();
            if let Some(first) = stolen.next() {
                for job in stolen {
                    if let Err(job) = self.local[worker_id].push(job) {
                        self.global.push(job);
                    }
                }
                return Some(first);
            }
        }
        None
    }
}

impl ReadyQueue for SimpleQueue {
    fn push(&self, job: Job, hint_worker: Option<usize>) {
        let job = match hint_worker {
            Some(w) if w < self.local.len() => match self.local[w].push(job) {
                Ok(()) => return,
                Err(job) => job,
            },
            _ => job,
        };
        self.global.push(job);
    }

    fn pop(&self, worker_id: usize) -> Option<Job> {
        if worker_id >= self.local.len() {
            return self.global.pop();
        }

        let cnt = self.counters[worker_id].fetch_add(1, Ordering::Relaxed);
        if cnt % GLOBAL_CHECK_INTERVAL == 0 {
            if let Some(job) = self.global.pop() {
                return Some(job);
            }
        }

        if let Some(job) = self.local[worker_id].pop() {
            return Some(job);
        }

        if let Some(job) = self.global.pop() {
            let room = self.local[worker_id].capacity / 2;
            for extra in self.global.pop_batch(room) {
                if let Err(extra) = self.local[worker_id].push(extra) {
                    self.global.push(extra);
                }
            }
            return Some(job);
        }

        self.try_steal(worker_id)
    }

    fn len(&self) -> usize {
        self.global.len() + self.local.iter().map(LocalQueue::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tagged(out: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Job {
        let out = Arc::clone(out);
        Box::new(move || out.lock().unwrap().push(tag))
    }

    #[test]
    fn test_local_queue_fifo_and_capacity() {
        let lq = LocalQueue::new(2);
        let out = Arc::new(Mutex::new(Vec::new()));
        assert!(lq.push(tagged(&out, 1)).is_ok());
        assert!(lq.push(tagged(&out, 2)).is_ok());
        assert!(lq.push(tagged(&out, 3)).is_err());
        assert_eq!(lq.len(), 2);

        while let Some(job) = lq.pop() {
            job();
        }
        assert_eq!(*out.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_global_push_pop() {
        let sq = SimpleQueue::new(2, 16, 16);
        let out = Arc::new(Mutex::new(Vec::new()));
        sq.push(tagged(&out, 1), None);
        sq.push(tagged(&out, 2), None);
        assert_eq!(sq.len(), 2);

        while let Some(job) = sq.pop(0) {
            job();
        }
        assert_eq!(*out.lock().unwrap(), vec![1, 2]);
        assert!(sq.is_empty());
    }

    #[test]
    fn test_local_hint() {
        let sq = SimpleQueue::new(2, 16, 16);
        let out = Arc::new(Mutex::new(Vec::new()));
        sq.push(tagged(&out, 10), Some(0));
        sq.push(tagged(&out, 20), Some(1));

        // First pop of each worker checks the (empty) global queue first
        sq.pop(1).unwrap()();
        assert_eq!(*out.lock().unwrap(), vec![20]);
        sq.pop(0).unwrap()();
        assert_eq!(*out.lock().unwrap(), vec![20, 10]);
    }

    #[test]
    fn test_single_item_can_be_stolen() {
        let sq = SimpleQueue::new(2, 16, 16);
        let out = Arc::new(Mutex::new(Vec::new()));
        sq.push(tagged(&out, 7), Some(0));
        sq.pop(1).unwrap()();
        assert_eq!(*out.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_work_stealing_takes_half() {
        let sq = SimpleQueue::new(2, 64, 16);
        let out = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            sq.push(tagged(&out, i), Some(0));
        }
        assert!(sq.pop(1).is_some());
        assert_eq!(sq.local[0].len(), 5);
        assert_eq!(sq.local[1].len(), 4);
    }

    #[test]
    fn test_full_local_spills_to_global() {
        let sq = SimpleQueue::new(1, 1, 16);
        let out = Arc::new(Mutex::new(Vec::new()));
        sq.push(tagged(&out, 1), Some(0));
        sq.push(tagged(&out, 2), Some(0));
        assert_eq!(sq.local[0].len(), 1);
        assert_eq!(sq.global.len(), 1);
    }
}
