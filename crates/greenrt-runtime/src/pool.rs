//! Thread pool
//!
//! A fixed set of worker threads sharing a [`SimpleQueue`]. Jobs queued
//! from one of the pool's own workers with `prefer_local` land on that
//! worker's local queue; everything else goes to the global queue.
//! Long-running work gets a dedicated OS thread so it never occupies a
//! worker.
//!
//! ```rust,ignore
//! let pool = ThreadPool::new(&SchedulerConfig::new().num_workers(4))?;
//! pool.queue(|| println!("on a worker"), false)?;
//! pool.shutdown();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use greenrt_core::kprint::{self, LogLevel};
use greenrt_core::{kdebug, kerror, kinfo, SchedError, SchedResult, WorkerError};

use crate::config::{self, SchedulerConfig};
use crate::lock;
use crate::parking::{new_parking, WorkerParking};
use crate::ready_queue::{Job, ReadyQueue, SimpleQueue};
use crate::tls;
use crate::worker::{self, WorkerPool};

/// State shared between a pool handle and its workers
pub(crate) struct PoolShared {
    pub(crate) queue: SimpleQueue,
    pub(crate) parking: Box<dyn WorkerParking>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) num_workers: usize,
    pub(crate) idle_spins: u32,
    pub(crate) park_timeout: Duration,
    /// Jobs run to completion by workers and dedicated threads
    pub(crate) completed: AtomicU64,
    /// Progress notices from work items that ran inline after queueing
    progress: AtomicU64,
    /// Dedicated threads still running
    long_running: AtomicUsize,
}

impl PoolShared {
    /// Identifies this pool in worker thread-locals
    pub(crate) fn key(&self) -> usize {
        self as *const Self as usize
    }
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Option<WorkerPool>>,
}

impl ThreadPool {
    /// Start a pool sized by `config`
    pub fn new(config: &SchedulerConfig) -> SchedResult<Arc<Self>> {
        Self::with_name(config, "greenrt")
    }

    /// Start a pool whose threads are named `{name}-worker-{i}`
    pub fn with_name(config: &SchedulerConfig, name: &str) -> SchedResult<Arc<Self>> {
        config.validate()?;
        if config.debug_logging || cfg!(feature = "debug-logging") {
            kprint::set_log_level(LogLevel::Debug);
        }

        let shared = Arc::new(PoolShared {
            queue: SimpleQueue::new(
                config.num_workers,
                config.local_queue_capacity,
                config.global_queue_capacity,
            ),
            parking: new_parking(),
            shutdown: AtomicBool::new(false),
            num_workers: config.num_workers,
            idle_spins: config.idle_spins,
            park_timeout: config.park_timeout,
            completed: AtomicU64::new(0),
            progress: AtomicU64::new(0),
            long_running: AtomicUsize::new(0),
        });

        let workers = match WorkerPool::start(&shared, name) {
            Ok(workers) => workers,
            Err(e) => {
                // Let the workers that did start drain out
                shared.shutdown.store(true, Ordering::Release);
                shared.parking.wake_all();
                return Err(e);
            }
        };
        kinfo!("{} pool started with {} workers", name, config.num_workers);

        Ok(Arc::new(Self {
            shared,
            workers: Mutex::new(Some(workers)),
        }))
    }

    /// Queue `f` to run on a worker
    ///
    /// With `prefer_local`, a call made from one of this pool's workers
    /// (including from a green thread running on one) queues to that
    /// worker's local queue.
    pub fn queue<F>(&self, f: F, prefer_local: bool) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_job(Box::new(f), prefer_local)
    }

    pub fn queue_job(&self, job: Job, prefer_local: bool) -> SchedResult<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedError::ShuttingDown);
        }
        let hint = if prefer_local { self.current_worker() } else { None };
        self.shared.queue.push(job, hint);
        self.shared.parking.wake_one();
        Ok(())
    }

    /// Run `f` on a new dedicated OS thread
    pub fn spawn_long_running<F>(&self, f: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedError::ShuttingDown);
        }
        let shared = Arc::clone(&self.shared);
        shared.long_running.fetch_add(1, Ordering::Relaxed);
        let spawned = thread::Builder::new()
            .name("greenrt-long-running".into())
            .spawn(move || {
                worker::run_job(Box::new(f));
                shared.completed.fetch_add(1, Ordering::Relaxed);
                shared.long_running.fetch_sub(1, Ordering::Relaxed);
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.shared.long_running.fetch_sub(1, Ordering::Relaxed);
                kerror!("failed to spawn long-running thread: {}", e);
                Err(WorkerError::SpawnFailed.into())
            }
        }
    }

    /// Record that a queued work item ran inline elsewhere
    pub fn notify_work_item_progress(&self) {
        self.shared.progress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn progress_notifications(&self) -> u64 {
        self.shared.progress.load(Ordering::Relaxed)
    }

    pub fn completed_work_items(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Jobs queued and not yet picked up
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn num_workers(&self) -> usize {
        self.shared.num_workers
    }

    /// Dedicated long-running threads still active
    pub fn long_running_threads(&self) -> usize {
        self.shared.long_running.load(Ordering::Relaxed)
    }

    /// Index of the calling worker if it belongs to this pool
    pub fn current_worker(&self) -> Option<usize> {
        tls::worker_index_in(self.shared.key())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Refuse new work, let workers drain the queue, and join them
    ///
    /// Safe to call more than once and from one of the pool's own workers.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        kdebug!("pool shutting down with {} jobs pending", self.pending());
        self.shared.parking.wake_all();
        if let Some(workers) = lock(&self.workers).take() {
            workers.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_workers", &self.num_workers())
            .field("pending", &self.pending())
            .field("completed", &self.completed_work_items())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

static GLOBAL_POOL: OnceLock<Result<Arc<ThreadPool>, SchedError>> = OnceLock::new();

/// Process-wide pool sized from [`config::global`], started on first use
pub fn global() -> SchedResult<&'static Arc<ThreadPool>> {
    GLOBAL_POOL
        .get_or_init(|| ThreadPool::new(config::global()))
        .as_ref()
        .map_err(Clone::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn small_pool(workers: usize) -> Arc<ThreadPool> {
        ThreadPool::with_name(&SchedulerConfig::new().num_workers(workers), "test").unwrap()
    }

    #[test]
    fn test_queue_runs_jobs() {
        let pool = small_pool(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            pool.queue(move || tx.send(i).unwrap(), false).unwrap();
        }
        let mut got: Vec<i32> = (0..100).map(|_| rx.recv().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
        pool.shutdown();
        assert_eq!(pool.completed_work_items(), 100);
    }

    #[test]
    fn test_prefer_local_from_worker() {
        let pool = small_pool(2);
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&pool);
        pool.queue(
            move || {
                let me = inner.current_worker();
                assert!(me.is_some());
                let tx2 = tx.clone();
                inner
                    .queue(move || tx2.send(()).unwrap(), true)
                    .unwrap();
            },
            false,
        )
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.current_worker(), None);
        pool.shutdown();
    }

    #[test]
    fn test_long_running_uses_dedicated_thread() {
        let pool = small_pool(1);
        let (tx, rx) = mpsc::channel();
        pool.spawn_long_running(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("greenrt-long-running"));
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let pool = small_pool(1);
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.queue(|| {}, false), Err(SchedError::ShuttingDown));
        assert_eq!(pool.spawn_long_running(|| {}), Err(SchedError::ShuttingDown));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = small_pool(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..50 {
            let tx = tx.clone();
            pool.queue(move || tx.send(i).unwrap(), false).unwrap();
        }
        pool.shutdown();
        drop(tx);
        assert_eq!(rx.iter().count(), 50);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = small_pool(1);
        pool.queue(|| panic!("job failure"), false).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.queue(move || tx.send(7).unwrap(), false).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        pool.shutdown();
    }
}
