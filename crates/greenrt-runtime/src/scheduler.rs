//! Task schedulers
//!
//! A [`TaskScheduler`] accepts [`WorkItem`]s. [`ThreadPoolTaskScheduler`]
//! runs them as plain jobs on pool workers. [`GreenThreadTaskScheduler`]
//! wraps each eligible item in a green thread, so a blocking wait inside
//! the item parks only the green thread and hands the worker back to the
//! pool:
//!
//! ```text
//! queue_task(item)
//!   long_running or no green threads ──▶ base scheduler, unchanged
//!   otherwise ──▶ pool.queue(launch(item), !prefer_fairness)
//!
//! try_execute_inline(item, was_queued)
//!   on a green thread ──▶ base scheduler (runs item on this green thread)
//!   otherwise ──▶ launch(item) here; notify progress if it was queued
//! ```
//!
//! An item carries its own claim, so an item that is queued and then
//! inlined by a waiter still runs exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use greenrt_core::{kdebug, kwarn, CancellationToken, SchedError, SchedResult, SpinLock};

use crate::config;
use crate::context::ExecutionContext;
use crate::executor;
use crate::pool::{self, ThreadPool};
use crate::ready_queue::Job;
use crate::task::{Task, TaskCompletionSource};
use crate::{stats, tls};

/// How a work item wants to be scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCreationOptions {
    /// Needs a whole OS thread; never wrapped in a green thread
    pub long_running: bool,
    /// Queue to the global queue rather than the current worker's local one
    pub prefer_fairness: bool,
    /// Accepted for compatibility; child tasks are never attached
    pub deny_child_attach: bool,
}

impl TaskCreationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn long_running(mut self, enable: bool) -> Self {
        self.long_running = enable;
        self
    }

    pub fn prefer_fairness(mut self, enable: bool) -> Self {
        self.prefer_fairness = enable;
        self
    }

    pub fn deny_child_attach(mut self, enable: bool) -> Self {
        self.deny_child_attach = enable;
        self
    }

    /// Queue hint for the item and for its resumes
    #[inline]
    pub(crate) fn prefer_local(self) -> bool {
        !self.prefer_fairness
    }
}

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

struct WorkItemInner {
    id: u64,
    options: TaskCreationOptions,
    ctx: Option<ExecutionContext>,
    body: SpinLock<Option<Job>>,
}

/// A unit of work submitted to a [`TaskScheduler`]
///
/// Cloning shares the item. The body runs at most once no matter how many
/// clones try; the execution context is captured at creation.
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<WorkItemInner>,
}

impl WorkItem {
    pub fn new<F>(f: F, options: TaskCreationOptions) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_job(Box::new(f), options)
    }

    pub(crate) fn from_job(body: Job, options: TaskCreationOptions) -> Self {
        Self {
            inner: Arc::new(WorkItemInner {
                id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
                options,
                ctx: ExecutionContext::capture(),
                body: SpinLock::new(Some(body)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn options(&self) -> TaskCreationOptions {
        self.inner.options
    }

    /// Whether some scheduler already took the body
    pub fn is_claimed(&self) -> bool {
        self.inner.body.lock().is_none()
    }

    /// Take the body; `None` if it was already taken
    pub(crate) fn claim(&self) -> Option<Job> {
        self.inner.body.lock().take()
    }

    pub(crate) fn context(&self) -> Option<ExecutionContext> {
        self.inner.ctx.clone()
    }

    /// Run the body on the calling thread under the captured context
    ///
    /// Returns `false` if the body was already claimed.
    pub fn run(&self) -> bool {
        match self.claim() {
            Some(body) => {
                ExecutionContext::run(&self.inner.ctx.clone().unwrap_or_default(), body);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id())
            .field("options", &self.options())
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Decides where and how work items execute
pub trait TaskScheduler: Send + Sync {
    /// Arrange for `item` to run later
    fn queue_task(&self, item: WorkItem) -> SchedResult<()>;

    /// Try to run `item` on the calling thread now
    ///
    /// `was_queued` says the item was handed to [`queue_task`] before.
    /// Returns whether this call ran it.
    ///
    /// [`queue_task`]: TaskScheduler::queue_task
    fn try_execute_inline(&self, item: &WorkItem, was_queued: bool) -> bool;
}

/// Runs work items directly on thread-pool workers
#[derive(Debug, Clone)]
pub struct ThreadPoolTaskScheduler {
    pool: Arc<ThreadPool>,
}

impl ThreadPoolTaskScheduler {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

impl TaskScheduler for ThreadPoolTaskScheduler {
    fn queue_task(&self, item: WorkItem) -> SchedResult<()> {
        let options = item.options();
        if options.long_running {
            return self.pool.spawn_long_running(move || {
                item.run();
            });
        }
        self.pool.queue(
            move || {
                item.run();
            },
            options.prefer_local(),
        )
    }

    fn try_execute_inline(&self, item: &WorkItem, _was_queued: bool) -> bool {
        item.run()
    }
}

/// Runs eligible work items on green threads hosted by a thread pool
#[derive(Debug, Clone)]
pub struct GreenThreadTaskScheduler {
    base: ThreadPoolTaskScheduler,
    /// Whether items may be wrapped in green threads at all
    green: bool,
}

impl GreenThreadTaskScheduler {
    /// Scheduler that uses green threads when the configuration allows them
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self::with_green_threads(pool, true)
    }

    /// Like [`new`](Self::new), but with `enabled == false` every item goes
    /// through the base scheduler unchanged
    pub fn with_green_threads(pool: Arc<ThreadPool>, enabled: bool) -> Self {
        let green = enabled && config::global().green_threads_available();
        if !green {
            kdebug!("green threads unavailable; scheduling through the base pool");
        }
        Self { base: ThreadPoolTaskScheduler::new(pool), green }
    }

    pub fn uses_green_threads(&self) -> bool {
        self.green
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        self.base.pool()
    }

    /// The scheduler this one falls back to
    pub fn base(&self) -> &ThreadPoolTaskScheduler {
        &self.base
    }
}

/// Claim `item` and start it as a green thread on the calling thread
///
/// Returns `false` if the item was already claimed. When no green thread
/// can be had the body runs directly instead.
fn launch_green(item: &WorkItem, pool: &Arc<ThreadPool>) -> bool {
    let Some(body) = item.claim() else {
        return false;
    };
    let prefer_local = item.options().prefer_local();
    if let Err((e, body)) =
        executor::launch(body, item.context(), Some(Arc::clone(pool)), prefer_local)
    {
        kwarn!("work item {} running without a green thread: {}", item.id(), e);
        stats::record_fallback();
        ExecutionContext::run(&item.context().unwrap_or_default(), body);
    }
    true
}

impl TaskScheduler for GreenThreadTaskScheduler {
    fn queue_task(&self, item: WorkItem) -> SchedResult<()> {
        let options = item.options();
        if options.long_running || !self.green {
            return self.base.queue_task(item);
        }
        let pool = Arc::clone(self.pool());
        self.pool().queue(
            move || {
                launch_green(&item, &pool);
            },
            options.prefer_local(),
        )
    }

    fn try_execute_inline(&self, item: &WorkItem, was_queued: bool) -> bool {
        if tls::is_green_thread() || !self.green {
            return self.base.try_execute_inline(item, was_queued);
        }
        let ran = launch_green(item, self.pool());
        if ran && was_queued {
            kdebug!("work item {} inlined after queueing", item.id());
            self.pool().notify_work_item_progress();
        }
        ran
    }
}

/// Queue `f` on `scheduler` and return a task for its result
pub fn start_new<T, F>(
    scheduler: &dyn TaskScheduler,
    f: F,
    options: TaskCreationOptions,
) -> SchedResult<Task<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    start_new_with_token(scheduler, f, options, CancellationToken::none())
}

/// [`start_new`] that never runs `f` once `token` is canceled
///
/// A token canceled before the call yields a canceled task and queues
/// nothing; one canceled while the item waits in a queue completes the
/// task as canceled when the item comes up.
pub fn start_new_with_token<T, F>(
    scheduler: &dyn TaskScheduler,
    f: F,
    options: TaskCreationOptions,
    token: CancellationToken,
) -> SchedResult<Task<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let tcs = TaskCompletionSource::new();
    let task = tcs.task();
    if token.is_cancelled() {
        tcs.set_canceled();
        return Ok(task);
    }
    let item = WorkItem::from_job(executor::task_body(f, tcs, token), options);
    scheduler.queue_task(item)?;
    Ok(task)
}

static DEFAULT_SCHEDULER: OnceLock<Result<GreenThreadTaskScheduler, SchedError>> =
    OnceLock::new();

/// Green-thread scheduler over the global pool
pub fn default_scheduler() -> SchedResult<&'static GreenThreadTaskScheduler> {
    DEFAULT_SCHEDULER
        .get_or_init(|| pool::global().map(|p| GreenThreadTaskScheduler::new(Arc::clone(p))))
        .as_ref()
        .map_err(Clone::clone)
}

/// [`start_new`] on the [`default_scheduler`]
pub fn spawn<T, F>(f: F) -> SchedResult<Task<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    start_new(default_scheduler()?, f, TaskCreationOptions::default())
}
