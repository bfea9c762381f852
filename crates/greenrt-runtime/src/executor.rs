//! Green-thread executor
//!
//! Turns a work item into a green thread, and a green thread's suspension
//! into a continuation on whatever it is waiting for:
//!
//! ```text
//!  launch(body) ── switch::start ──▶ body ... Task::wait ─▶ bridge::try_yield(unit)
//!       ◀──────────── Some(ctx) carrying unit ──────────────────────┘
//!  park(ctx): unit.on_completed(resume)
//!                    │ fires on the completing thread
//!                    ▼
//!  Resumer: on a green thread?  yes ─▶ queue resume to the pool
//!                               no  ─▶ resume inline, park again if it yields
//! ```
//!
//! A resume that fires on a green thread is queued to the pool, on the
//! local queue unless the work item asked for fairness. It nests only when
//! the pool refuses the job.

use std::sync::Arc;

use greenrt_core::{fatal, kdebug, kwarn, AwaitedUnit, CancellationToken, SchedError, TaskError};

use crate::config;
use crate::context::ExecutionContext;
use crate::pool::{self, ThreadPool};
use crate::ready_queue::Job;
use crate::switch::{self, SuspendedContext};
use crate::task::{Task, TaskCompletionSource};
use crate::{stats, tls};

/// Start `body` on a green thread on the calling OS thread
///
/// Runs until the first suspension or completion, then returns. Later
/// resumes go through `pool`, or the global pool when `None`, onto the
/// resuming worker's local queue when `prefer_local` is set. If no green
/// thread can be had the body is handed back untouched.
pub(crate) fn launch(
    body: Job,
    ctx: Option<ExecutionContext>,
    pool: Option<Arc<ThreadPool>>,
    prefer_local: bool,
) -> Result<(), (SchedError, Job)> {
    if !config::global().green_threads_available() {
        let reason = if config::global().green_threads_enabled {
            SchedError::Unsupported
        } else {
            SchedError::Disabled
        };
        return Err((reason, body));
    }
    let reservation = match switch::reserve() {
        Ok(r) => r,
        Err(e) => return Err((e, body)),
    };

    let entry = move || {
        let ctx = ctx.unwrap_or_default();
        ExecutionContext::run(&ctx, body);
    };
    if let Some(suspended) = switch::start_reserved(reservation, entry) {
        park(Resumer { suspended, pool, prefer_local });
    }
    Ok(())
}

/// Hand a freshly suspended green thread to the unit it waits on
fn park(mut resumer: Resumer) {
    let unit = match resumer
        .suspended
        .take_yielded()
        .map(|v| v.downcast::<Arc<dyn AwaitedUnit>>())
    {
        Some(Ok(unit)) => *unit,
        _ => fatal!(
            "green thread {} yielded without an awaited unit",
            resumer.suspended.thread_id()
        ),
    };
    kdebug!("green thread {} parked", resumer.suspended.thread_id());
    unit.on_completed(Box::new(move || resumer.resume()));
}

/// Continuation that resumes one parked green thread
struct Resumer {
    suspended: SuspendedContext,
    pool: Option<Arc<ThreadPool>>,
    prefer_local: bool,
}

impl Resumer {
    fn resume(self) {
        if !tls::is_green_thread() {
            self.resume_here();
            return;
        }

        let pool = match &self.pool {
            Some(pool) => Ok(Arc::clone(pool)),
            None => pool::global().map(Arc::clone),
        };
        stats::record_resume_queued();
        match pool {
            Ok(pool) => {
                if let Err(job) = queue_resume(&pool, self) {
                    job.resume_here();
                }
            }
            Err(e) => {
                kwarn!("no pool to queue a resume ({}); resuming nested", e);
                self.resume_here();
            }
        }
    }

    fn resume_here(self) {
        let Resumer { suspended, pool, prefer_local } = self;
        if let Some(next) = switch::resume(suspended, Box::new(())) {
            park(Resumer { suspended: next, pool, prefer_local });
        }
    }
}

/// Queue `resumer` to `pool`. Hands it back when the pool refuses work.
fn queue_resume(pool: &ThreadPool, resumer: Resumer) -> Result<(), Resumer> {
    let prefer_local = resumer.prefer_local;
    let slot = Arc::new(std::sync::Mutex::new(Some(resumer)));
    let queued = Arc::clone(&slot);
    let job = move || {
        if let Some(r) = crate::lock(&queued).take() {
            r.resume_here();
        }
    };
    match pool.queue(job, prefer_local) {
        Ok(()) => Ok(()),
        Err(e) => {
            kwarn!("pool refused resume ({}); resuming nested", e);
            match crate::lock(&slot).take() {
                Some(r) => Err(r),
                None => Ok(()),
            }
        }
    }
}

/// Wrap `f` so its outcome completes `tcs`
///
/// If `token` is canceled by the time the body starts, `f` never runs and
/// the task completes as canceled.
pub(crate) fn task_body<T, F>(f: F, tcs: TaskCompletionSource<T>, token: CancellationToken) -> Job
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || {
        if token.is_cancelled() {
            tcs.set_canceled();
            return;
        }
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            Ok(value) => tcs.set_result(value),
            Err(payload) => tcs.set_exception(TaskError::from_panic(&*payload)),
        };
    })
}

/// Run `f` on a new green thread, starting it on the calling thread
///
/// The caller's execution context flows into the green thread (the
/// default context when flow is suppressed). The returned task completes
/// with `f`'s value, or faults if `f` panics. Without green threads `f`
/// runs directly on the caller.
pub fn run_as_green_thread<T, F>(f: F) -> Task<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    run_as_green_thread_with(f, CancellationToken::none())
}

/// [`run_as_green_thread`] that never starts `f` once `token` is canceled
///
/// An already canceled token yields a canceled task without creating a
/// green thread.
pub fn run_as_green_thread_with<T, F>(f: F, token: CancellationToken) -> Task<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let tcs = TaskCompletionSource::new();
    let task = tcs.task();
    if token.is_cancelled() {
        tcs.set_canceled();
        return task;
    }
    let ctx = ExecutionContext::capture();
    if let Err((e, body)) = launch(task_body(f, tcs, token), ctx.clone(), None, true) {
        kdebug!("running on the calling thread: {}", e);
        stats::record_fallback();
        ExecutionContext::run(&ctx.unwrap_or_default(), body);
    }
    task
}
