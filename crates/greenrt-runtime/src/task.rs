//! Tasks and completion sources
//!
//! A [`Task`] is the consumer side of a single-assignment result; a
//! [`TaskCompletionSource`] is the producer side. Completion is published
//! under the task's lock before any continuation runs, so a continuation
//! always observes the final status.
//!
//! [`Task::wait`] blocks the calling OS thread, except on a green thread,
//! where it suspends only the green thread through [`bridge::try_yield`]
//! and lets the OS thread go back to the pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use greenrt_core::{fatal, AwaitedUnit, Continuation, TaskError};

use crate::{bridge, lock};

pub use crate::timer::delay;

/// Final or pending state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    RanToCompletion,
    Faulted,
    Canceled,
}

impl TaskStatus {
    #[inline]
    pub fn is_completed(self) -> bool {
        self != TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::RanToCompletion => "RanToCompletion",
            TaskStatus::Faulted => "Faulted",
            TaskStatus::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

struct TaskState<T> {
    outcome: Option<Result<T, TaskError>>,
    continuations: Vec<Continuation>,
}

struct TaskCell<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
    completed: AtomicBool,
}

impl<T> TaskCell<T> {
    fn new(outcome: Option<Result<T, TaskError>>) -> Self {
        let completed = outcome.is_some();
        Self {
            state: Mutex::new(TaskState { outcome, continuations: Vec::new() }),
            done: Condvar::new(),
            completed: AtomicBool::new(completed),
        }
    }

    fn complete(&self, outcome: Result<T, TaskError>) -> bool {
        let continuations = {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            self.completed.store(true, Ordering::Release);
            std::mem::take(&mut state.continuations)
        };
        self.done.notify_all();
        for k in continuations {
            k();
        }
        true
    }

    fn status(&self) -> TaskStatus {
        match &lock(&self.state).outcome {
            None => TaskStatus::Pending,
            Some(Ok(_)) => TaskStatus::RanToCompletion,
            Some(Err(TaskError::Canceled)) => TaskStatus::Canceled,
            Some(Err(TaskError::Faulted(_))) => TaskStatus::Faulted,
        }
    }

    fn block_until_complete(&self) {
        let mut state = lock(&self.state);
        while state.outcome.is_none() {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl<T: Send + 'static> AwaitedUnit for TaskCell<T> {
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn on_completed(&self, k: Continuation) {
        {
            let mut state = lock(&self.state);
            if state.outcome.is_none() {
                state.continuations.push(k);
                return;
            }
        }
        k();
    }
}

/// Consumer handle of an asynchronous result
pub struct Task<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("status", &self.cell.status()).finish()
    }
}

impl<T: Send + 'static> Task<T> {
    /// A task that has already produced `value`
    pub fn from_result(value: T) -> Self {
        Self { cell: Arc::new(TaskCell::new(Some(Ok(value)))) }
    }

    /// A task that has already failed with `error`
    pub fn from_error(error: TaskError) -> Self {
        Self { cell: Arc::new(TaskCell::new(Some(Err(error)))) }
    }

    pub fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }

    pub fn status(&self) -> TaskStatus {
        self.cell.status()
    }

    /// The task viewed as something a green thread can block on
    pub fn as_awaited_unit(&self) -> Arc<dyn AwaitedUnit> {
        self.cell.clone()
    }

    /// Run `k` once the task has completed
    pub fn on_completed<F>(&self, k: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cell.on_completed(Box::new(k));
    }

    /// Wait until the task completes and report how it ended
    pub fn wait(&self) -> Result<(), TaskError> {
        self.wait_completed();
        match &lock(&self.cell.state).outcome {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e.clone()),
            None => fatal!("completed task without outcome"),
        }
    }

    /// Wait up to `timeout` on an OS thread; returns whether it completed
    ///
    /// Green threads have no timed suspension, so on one this waits for
    /// completion like [`wait`](Self::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if crate::tls::is_green_thread() {
            self.wait_completed();
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.cell.state);
        while state.outcome.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.cell.done.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Wait and clone out the result
    pub fn result(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.wait_completed();
        match &lock(&self.cell.state).outcome {
            Some(outcome) => outcome.clone(),
            None => fatal!("completed task without outcome"),
        }
    }

    /// Result if already completed
    pub fn try_result(&self) -> Option<Result<T, TaskError>>
    where
        T: Clone,
    {
        lock(&self.cell.state).outcome.clone()
    }

    fn wait_completed(&self) {
        while !self.cell.is_completed() {
            if bridge::try_yield(self.as_awaited_unit()) {
                continue;
            }
            self.cell.block_until_complete();
        }
    }
}

/// Wait for every task; the first failure in slice order is returned
pub fn wait_all<T: Send + 'static>(tasks: &[Task<T>]) -> Result<(), TaskError> {
    let mut first_error = None;
    for task in tasks {
        if let Err(e) = task.wait() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Producer handle completing exactly one [`Task`]
pub struct TaskCompletionSource<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Clone for TaskCompletionSource<T> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

impl<T: Send + 'static> Default for TaskCompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskCompletionSource<T> {
    pub fn new() -> Self {
        Self { cell: Arc::new(TaskCell::new(None)) }
    }

    pub fn task(&self) -> Task<T> {
        Task { cell: Arc::clone(&self.cell) }
    }

    /// Complete with a value; false if already completed
    pub fn set_result(&self, value: T) -> bool {
        self.cell.complete(Ok(value))
    }

    /// Complete as faulted; false if already completed
    pub fn set_exception(&self, error: TaskError) -> bool {
        self.cell.complete(Err(error))
    }

    /// Complete as canceled; false if already completed
    pub fn set_canceled(&self) -> bool {
        self.cell.complete(Err(TaskError::Canceled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_single_assignment() {
        let tcs = TaskCompletionSource::new();
        let task = tcs.task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(tcs.set_result(1));
        assert!(!tcs.set_result(2));
        assert!(!tcs.set_canceled());
        assert_eq!(task.result(), Ok(1));
        assert_eq!(task.status(), TaskStatus::RanToCompletion);
    }

    #[test]
    fn test_fault_and_cancel_status() {
        let tcs = TaskCompletionSource::<()>::new();
        tcs.set_exception(TaskError::Faulted("bad".into()));
        assert_eq!(tcs.task().status(), TaskStatus::Faulted);
        assert_eq!(tcs.task().wait(), Err(TaskError::Faulted("bad".into())));

        let tcs = TaskCompletionSource::<()>::new();
        tcs.set_canceled();
        assert!(tcs.task().wait().unwrap_err().is_canceled());
    }

    #[test]
    fn test_continuation_sees_final_status() {
        let tcs = TaskCompletionSource::new();
        let task = tcs.task();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let t = task.clone();
        task.on_completed(move || {
            *s.lock().unwrap() = Some(t.status());
        });
        assert!(seen.lock().unwrap().is_none());
        tcs.set_result(5u8);
        assert_eq!(*seen.lock().unwrap(), Some(TaskStatus::RanToCompletion));
    }

    #[test]
    fn test_continuation_on_completed_task_runs_inline() {
        let task = Task::from_result(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        task.on_completed(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_blocks_os_thread_until_set() {
        let tcs = TaskCompletionSource::new();
        let task = tcs.task();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tcs.set_result("late");
        });
        assert_eq!(task.result(), Ok("late"));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let tcs = TaskCompletionSource::<()>::new();
        assert!(!tcs.task().wait_timeout(Duration::from_millis(10)));
        tcs.set_result(());
        assert!(tcs.task().wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_all_reports_first_error() {
        let ok = Task::from_result(1);
        let bad = Task::<i32>::from_error(TaskError::Faulted("x".into()));
        let canceled = Task::<i32>::from_error(TaskError::Canceled);
        assert_eq!(wait_all(&[ok.clone()]), Ok(()));
        assert_eq!(
            wait_all(&[ok, bad, canceled]),
            Err(TaskError::Faulted("x".into()))
        );
    }
}
