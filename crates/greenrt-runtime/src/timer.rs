//! Delay timer
//!
//! A single `greenrt-timer` thread owns a min-heap of deadlines and sleeps
//! on a condvar until the earliest one. Expired entries are completed on
//! the global thread pool rather than on the timer thread, so whatever
//! continuation a completed delay runs never stalls other timers.
//!
//! ```text
//! delay(d) ──push──▶ [ heap ] ◀──wait_timeout── timer thread
//!                                                   │ expired
//!                                                   ▼
//!                                   pool.queue(tcs.set_result(()))
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use greenrt_core::{kdebug, kerror, kwarn};

use crate::lock;
use crate::pool;
use crate::task::{Task, TaskCompletionSource};

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    tcs: TaskCompletionSource<()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties fire in insertion order
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerQueue {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    wakeup: Condvar,
    next_seq: AtomicU64,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(1024)),
            wakeup: Condvar::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    fn insert(&self, deadline: Instant, tcs: TaskCompletionSource<()>) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let mut heap = lock(&self.heap);
        let earliest = heap.peek().is_none_or(|e| deadline < e.deadline);
        heap.push(TimerEntry { deadline, seq, tcs });
        drop(heap);
        if earliest {
            self.wakeup.notify_one();
        }
    }

    /// Block until at least one entry is due, then take every due entry
    fn next_expired(&self) -> Vec<TimerEntry> {
        let mut heap = lock(&self.heap);
        loop {
            let now = Instant::now();
            match heap.peek() {
                None => {
                    heap = self
                        .wakeup
                        .wait(heap)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(entry) if entry.deadline > now => {
                    let timeout = entry.deadline - now;
                    heap = match self.wakeup.wait_timeout(heap, timeout) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
                Some(_) => {
                    let mut expired = Vec::new();
                    while heap.peek().is_some_and(|e| e.deadline <= now) {
                        if let Some(entry) = heap.pop() {
                            expired.push(entry);
                        }
                    }
                    return expired;
                }
            }
        }
    }

    fn pending(&self) -> usize {
        lock(&self.heap).len()
    }
}

static TIMER: OnceLock<&'static TimerQueue> = OnceLock::new();

fn timer() -> &'static TimerQueue {
    TIMER.get_or_init(|| {
        let queue: &'static TimerQueue = Box::leak(Box::new(TimerQueue::new()));
        let spawned = thread::Builder::new()
            .name("greenrt-timer".into())
            .spawn(move || timer_main(queue));
        if let Err(e) = spawned {
            kerror!("failed to spawn timer thread: {}", e);
        }
        queue
    })
}

fn timer_main(queue: &'static TimerQueue) {
    kdebug!("timer thread started");
    loop {
        for entry in queue.next_expired() {
            fire(entry.tcs);
        }
    }
}

fn fire(tcs: TaskCompletionSource<()>) {
    match pool::global() {
        Ok(pool) => {
            let again = tcs.clone();
            let queued = pool.queue(
                move || {
                    again.set_result(());
                },
                false,
            );
            if queued.is_err() {
                tcs.set_result(());
            }
        }
        Err(e) => {
            kwarn!("no pool for timer completion ({}); completing inline", e);
            tcs.set_result(());
        }
    }
}

/// A task that completes after `duration`
pub fn delay(duration: Duration) -> Task<()> {
    if duration.is_zero() {
        return Task::from_result(());
    }
    let tcs = TaskCompletionSource::new();
    let task = tcs.task();
    timer().insert(Instant::now() + duration, tcs);
    task
}

/// Delays not yet fired
pub fn pending_timers() -> usize {
    TIMER.get().map_or(0, |q| q.pending())
}
