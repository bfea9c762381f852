//! # greenrt - green threads for blocking task code
//!
//! Runs work items on green threads: small user-mode stacks hosted by a
//! thread pool. A green thread that waits on a [`Task`] parks its stack
//! and frees the worker; when the task completes, the stack resumes on
//! whichever thread completed it, with its execution context and logical
//! thread id intact.
//!
//! ## Quick Start
//!
//! ```ignore
//! use greenrt::{delay, Runtime, SchedulerConfig};
//! use std::time::Duration;
//!
//! fn main() -> greenrt::SchedResult<()> {
//!     let mut runtime = Runtime::new(SchedulerConfig::default().num_workers(4))?;
//!     runtime.block_on(|rt| {
//!         let task = rt.spawn(|| {
//!             // Parks the green thread, not the worker
//!             delay(Duration::from_millis(10)).wait().unwrap();
//!             42
//!         })?;
//!         assert_eq!(task.result(), Ok(42));
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        spawn(), run_as_green_thread(), Task::wait()         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               GreenThreadTaskScheduler                      │
//! │     long-running ─▶ OS thread,  otherwise ─▶ green thread   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │   Timer   │
//!    │  Thread   │      │  Thread   │      │   Thread  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │  start / resume   │                   │ completes delays
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                  Stack Region                           │
//!    │   fixed slots × max_green_threads, guard pages, mmap    │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

// Re-export core types
pub use greenrt_core::{
    CancellationToken, LogicalThreadId, SchedError, SchedResult, TaskError, GreenThreadState,
};

// Re-export kprint macros for logging
pub use greenrt_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use greenrt_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use greenrt_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use greenrt_runtime::{
    AsyncFlowControl, AsyncLocal, ExecutionContext, GreenThreadTaskScheduler, SchedulerConfig,
    Task, TaskCompletionSource, TaskCreationOptions, TaskScheduler, TaskStatus,
    ThreadPool, ThreadPoolTaskScheduler, WorkItem,
};
pub use greenrt_runtime::{delay, is_green_thread, run_as_green_thread, run_as_green_thread_with};
pub use greenrt_runtime::{gc, stats};
pub use greenrt_runtime::task::wait_all;

use greenrt_runtime::{config, scheduler};

/// Owns a thread pool and the green-thread scheduler over it
///
/// Green stacks come from the process-wide stack region, which is sized
/// by the first configuration installed; `new` installs its configuration
/// unless another one is already in place.
pub struct Runtime {
    config: SchedulerConfig,
    scheduler: Option<GreenThreadTaskScheduler>,
}

impl Runtime {
    /// Create a runtime with the given configuration
    ///
    /// This does not start any threads. Call `start()` or `block_on()` to begin.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        config.validate()?;
        if let Err(e) = config::install(config.clone()) {
            kwarn!("{}: green stacks keep the configuration already installed", e);
        }
        Ok(Self { config, scheduler: None })
    }

    /// Start the worker threads
    pub fn start(&mut self) -> SchedResult<()> {
        if self.scheduler.is_some() {
            return Err(SchedError::AlreadyInitialized);
        }
        let pool = ThreadPool::with_name(&self.config, "greenrt")?;
        self.scheduler = Some(GreenThreadTaskScheduler::new(pool));
        kdebug!("runtime started");
        Ok(())
    }

    /// Start, run `f` on the calling thread, then shut down
    pub fn block_on<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(&Runtime) -> T,
    {
        if let Err(e) = self.start() {
            kwarn!("runtime not started: {}", e);
        }
        let result = f(self);
        self.shutdown();
        result
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The scheduler, once started
    pub fn scheduler(&self) -> SchedResult<&GreenThreadTaskScheduler> {
        self.scheduler.as_ref().ok_or(SchedError::NotInitialized)
    }

    pub fn pool(&self) -> SchedResult<&Arc<ThreadPool>> {
        self.scheduler().map(GreenThreadTaskScheduler::pool)
    }

    /// Run `f` as a green-thread work item
    pub fn spawn<T, F>(&self, f: F) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(f, TaskCreationOptions::default())
    }

    /// Run `f` with explicit scheduling options
    pub fn spawn_with<T, F>(&self, f: F, options: TaskCreationOptions) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        scheduler::start_new(self.scheduler()?, f, options)
    }

    /// Run `f` unless `token` is canceled before it starts
    pub fn spawn_with_token<T, F>(
        &self,
        f: F,
        options: TaskCreationOptions,
        token: CancellationToken,
    ) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        scheduler::start_new_with_token(self.scheduler()?, f, options, token)
    }

    /// Run `f` on a dedicated OS thread
    pub fn spawn_long_running<T, F>(&self, f: F) -> SchedResult<Task<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(f, TaskCreationOptions::new().long_running(true))
    }

    /// Stop accepting work, drain the queue and join the workers
    ///
    /// Green threads still parked on a task resume on whatever thread
    /// completes it.
    pub fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.pool().shutdown();
            kdebug!("runtime stopped");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `f` as a green-thread work item on the process-wide pool
pub fn spawn<T, F>(f: F) -> SchedResult<Task<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    scheduler::spawn(f)
}

/// Run `f` on a dedicated OS thread of the process-wide pool
pub fn spawn_long_running<T, F>(f: F) -> SchedResult<Task<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    scheduler::start_new(
        scheduler::default_scheduler()?,
        f,
        TaskCreationOptions::new().long_running(true),
    )
}

/// Logical id of whatever runs the caller: the green thread if any,
/// otherwise the OS thread
pub fn current_thread_id() -> LogicalThreadId {
    greenrt_runtime::identity::current_thread_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::hint::black_box;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SENTINEL: usize = 0x6a09_e667_f3bc_c908;
    const DEPTH: usize = 100;

    #[inline(never)]
    fn descend(depth: usize, gate: &Task<()>) -> bool {
        let frame = [SENTINEL, depth];
        black_box(&frame);
        let below = if depth + 1 < DEPTH {
            descend(depth + 1, gate)
        } else {
            gate.wait().is_ok()
        };
        below && *black_box(&frame) == [SENTINEL, depth]
    }

    #[test]
    fn test_runtime_lifecycle() {
        let mut runtime = Runtime::new(SchedulerConfig::new().num_workers(2)).unwrap();
        assert!(!runtime.is_running());
        assert_eq!(runtime.spawn(|| ()).err(), Some(SchedError::NotInitialized));

        runtime.start().unwrap();
        assert_eq!(runtime.start(), Err(SchedError::AlreadyInitialized));
        let task = runtime
            .spawn(|| {
                delay(Duration::from_millis(2)).wait().unwrap();
                is_green_thread()
            })
            .unwrap();
        assert_eq!(task.result(), Ok(true));

        runtime.shutdown();
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_block_on_long_running() {
        let mut runtime = Runtime::new(SchedulerConfig::new().num_workers(1)).unwrap();
        let on_green = runtime.block_on(|rt| {
            rt.spawn_long_running(is_green_thread).unwrap().result()
        });
        assert_eq!(on_green, Ok(false));
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_spawn_with_canceled_token() {
        let mut runtime = Runtime::new(SchedulerConfig::new().num_workers(1)).unwrap();
        runtime.start().unwrap();
        let token = CancellationToken::new();
        let live = runtime
            .spawn_with_token(is_green_thread, TaskCreationOptions::default(), token.clone())
            .unwrap();
        assert_eq!(live.result(), Ok(true));

        token.cancel();
        let skipped = runtime
            .spawn_with_token(|| unreachable!(), TaskCreationOptions::default(), token)
            .unwrap();
        assert_eq!(skipped.result(), Err::<(), _>(TaskError::Canceled));
        runtime.shutdown();
    }

    #[test]
    fn test_global_spawn_and_identity() {
        let outer = current_thread_id();
        let task = spawn(move || {
            let me = current_thread_id();
            delay(Duration::from_millis(2)).wait().unwrap();
            (me, current_thread_id())
        })
        .unwrap();
        let (before, after) = task.result().unwrap();
        assert_eq!(before, after);
        assert_ne!(before, outer);
        assert_eq!(current_thread_id(), outer);

        let long = spawn_long_running(is_green_thread).unwrap();
        assert_eq!(long.result(), Ok(false));
    }

    #[test]
    fn test_many_parked_stacks_survive_scans() {
        const THREADS: usize = 10_000;
        const SCANS: usize = 100;

        let gate = TaskCompletionSource::<()>::new();
        let owners = Arc::new(Mutex::new(HashSet::new()));
        let arrived = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<bool>> = (0..THREADS)
            .map(|_| {
                let waited = gate.task();
                let owners = Arc::clone(&owners);
                let arrived = Arc::clone(&arrived);
                run_as_green_thread(move || {
                    owners.lock().unwrap().insert(current_thread_id());
                    arrived.fetch_add(1, Ordering::SeqCst);
                    descend(0, &waited)
                })
            })
            .collect();

        // Every green thread started on this thread and parked before returning
        assert_eq!(arrived.load(Ordering::SeqCst), THREADS);
        let owners = owners.lock().unwrap().clone();
        assert_eq!(owners.len(), THREADS);
        assert!(tasks.iter().all(|t| !t.is_completed()));

        for _ in 0..SCANS {
            let mut hits: HashMap<LogicalThreadId, usize> = HashMap::with_capacity(THREADS);
            gc::roots().scan_parked(|owner, _slot, word| {
                if word == SENTINEL && owners.contains(&owner) {
                    *hits.entry(owner).or_default() += 1;
                }
            });
            assert_eq!(hits.len(), THREADS);
            assert!(hits.values().all(|&n| n >= DEPTH));
        }

        gate.set_result(());
        wait_all(&tasks).unwrap();
        assert!(tasks.iter().all(|t| t.result() == Ok(true)));
    }
}
