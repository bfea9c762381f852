//! Ambient execution context
//!
//! An [`ExecutionContext`] is an immutable map of [`AsyncLocal`] values plus
//! a flow-suppression flag. Each OS thread has a current context. Setting
//! an async-local replaces the current context with a modified copy, so a
//! captured context never changes after capture.
//!
//! Green threads carry their context with them: the switch primitive
//! swaps it in when a green thread starts running on an OS thread and
//! swaps the host's back when it yields or completes. Code running on the
//! green thread observes the same values before and after a suspension,
//! whichever OS thread resumes it.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

/// Snapshot of ambient state that flows across asynchronous hops
#[derive(Clone, Default)]
pub struct ExecutionContext {
    values: Option<Arc<HashMap<usize, Value>>>,
    flow_suppressed: bool,
}

thread_local! {
    static CURRENT: Cell<ExecutionContext> = Cell::new(ExecutionContext::default());
}

/// Replace this thread's current context, returning the previous one
#[inline(never)]
pub(crate) fn swap_current(ctx: ExecutionContext) -> ExecutionContext {
    CURRENT
        .try_with(|cell| cell.replace(ctx))
        .unwrap_or_default()
}

/// Drop whatever context the last job left behind on this thread
pub(crate) fn reset_to_default() {
    drop(swap_current(ExecutionContext::default()));
}

#[inline(never)]
fn with_current<R>(f: impl FnOnce(&ExecutionContext) -> R) -> R {
    CURRENT.with(|cell| {
        let ctx = cell.take();
        let result = f(&ctx);
        cell.set(ctx);
        result
    })
}

impl ExecutionContext {
    /// Capture the current context for later use with [`run`](Self::run)
    ///
    /// Returns `None` while flow is suppressed.
    pub fn capture() -> Option<ExecutionContext> {
        with_current(|ctx| {
            if ctx.flow_suppressed {
                None
            } else {
                Some(ctx.clone())
            }
        })
    }

    /// Run `f` with `ctx` as the current context
    ///
    /// The previous context is restored afterwards, also when `f` panics.
    pub fn run<R>(ctx: &ExecutionContext, f: impl FnOnce() -> R) -> R {
        let mut entered = ctx.clone();
        entered.flow_suppressed = false;
        let _restore = Restore(Some(swap_current(entered)));
        f()
    }

    /// Whether capture is currently disabled on this thread
    pub fn is_flow_suppressed() -> bool {
        with_current(|ctx| ctx.flow_suppressed)
    }

    /// Stop [`capture`](Self::capture) from returning contexts until the
    /// returned guard is dropped
    ///
    /// Only the outermost guard restores flow; nested suppression is a no-op.
    pub fn suppress_flow() -> AsyncFlowControl {
        let already = Self::is_flow_suppressed();
        if !already {
            set_flow_suppressed(true);
        }
        AsyncFlowControl { restore: !already, _not_send: PhantomData }
    }

    /// Re-enable capture without a guard
    pub fn restore_flow() {
        set_flow_suppressed(false);
    }

    /// True when no async-local has a value
    pub fn is_default(&self) -> bool {
        self.values.as_ref().is_none_or(|v| v.is_empty())
    }

    fn get(&self, key: usize) -> Option<&Value> {
        self.values.as_ref().and_then(|v| v.get(&key))
    }

    fn with_value(&self, key: usize, value: Option<Value>) -> ExecutionContext {
        let mut map = self.values.as_deref().cloned().unwrap_or_default();
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
        ExecutionContext {
            values: if map.is_empty() { None } else { Some(Arc::new(map)) },
            flow_suppressed: self.flow_suppressed,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("values", &self.values.as_ref().map_or(0, |v| v.len()))
            .field("flow_suppressed", &self.flow_suppressed)
            .finish()
    }
}

fn set_flow_suppressed(suppressed: bool) {
    let mut ctx = swap_current(ExecutionContext::default());
    ctx.flow_suppressed = suppressed;
    drop(swap_current(ctx));
}

struct Restore(Option<ExecutionContext>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(prev) = self.0.take() {
            drop(swap_current(prev));
        }
    }
}

/// Guard returned by [`ExecutionContext::suppress_flow`]
#[must_use = "flow is restored when the guard is dropped"]
pub struct AsyncFlowControl {
    restore: bool,
    _not_send: PhantomData<*const ()>,
}

impl AsyncFlowControl {
    /// Restore flow now instead of at drop
    pub fn undo(mut self) {
        self.restore_now();
    }

    fn restore_now(&mut self) {
        if std::mem::take(&mut self.restore) {
            ExecutionContext::restore_flow();
        }
    }
}

impl Drop for AsyncFlowControl {
    fn drop(&mut self) {
        self.restore_now();
    }
}

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

/// Handle to one ambient value stored in the current execution context
///
/// The handle is a small key and can be copied into every closure that
/// needs it.
pub struct AsyncLocal<T> {
    key: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for AsyncLocal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AsyncLocal<T> {}

impl<T> fmt::Debug for AsyncLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLocal").field("key", &self.key).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for AsyncLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncLocal<T> {
    pub fn new() -> Self {
        Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    /// Value in the current context, if set
    pub fn get(&self) -> Option<T> {
        with_current(|ctx| {
            ctx.get(self.key)
                .and_then(|v| v.downcast_ref::<T>())
                .cloned()
        })
    }

    /// Value in the current context, or `T::default()`
    pub fn value(&self) -> T
    where
        T: Default,
    {
        self.get().unwrap_or_default()
    }

    /// Replace the current context with a copy holding `value`
    pub fn set(&self, value: T) {
        self.update(Some(Arc::new(value)));
    }

    pub fn clear(&self) {
        self.update(None);
    }

    fn update(&self, value: Option<Value>) {
        let current = swap_current(ExecutionContext::default());
        let next = current.with_value(self.key, value);
        drop(swap_current(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let local = AsyncLocal::<u32>::new();
        assert_eq!(local.get(), None);
        assert_eq!(local.value(), 0);
        local.set(7);
        assert_eq!(local.get(), Some(7));
        local.clear();
        assert_eq!(local.get(), None);
    }

    #[test]
    fn test_capture_is_a_snapshot() {
        let local = AsyncLocal::<String>::new();
        local.set("before".into());
        let captured = ExecutionContext::capture().unwrap();
        local.set("after".into());

        let seen = ExecutionContext::run(&captured, || local.get());
        assert_eq!(seen.as_deref(), Some("before"));
        assert_eq!(local.get().as_deref(), Some("after"));
        local.clear();
    }

    #[test]
    fn test_run_restores_on_panic() {
        let local = AsyncLocal::<u32>::new();
        local.set(1);
        let ctx = ExecutionContext::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ExecutionContext::run(&ctx, || {
                assert_eq!(local.get(), None);
                panic!("inside");
            })
        }));
        assert!(result.is_err());
        assert_eq!(local.get(), Some(1));
        local.clear();
    }

    #[test]
    fn test_suppress_flow() {
        let local = AsyncLocal::<u32>::new();
        local.set(3);
        {
            let _guard = ExecutionContext::suppress_flow();
            assert!(ExecutionContext::is_flow_suppressed());
            assert!(ExecutionContext::capture().is_none());
            // Values stay readable while flow is suppressed
            assert_eq!(local.get(), Some(3));

            let nested = ExecutionContext::suppress_flow();
            drop(nested);
            assert!(ExecutionContext::is_flow_suppressed());
        }
        assert!(!ExecutionContext::is_flow_suppressed());
        assert!(ExecutionContext::capture().is_some());
        local.clear();
    }

    #[test]
    fn test_threads_do_not_share_context() {
        let local = AsyncLocal::<u32>::new();
        local.set(5);
        let other = std::thread::spawn(move || local.get()).join().unwrap();
        assert_eq!(other, None);
        local.clear();
    }

    #[test]
    fn test_reset_to_default() {
        let local = AsyncLocal::<u32>::new();
        local.set(9);
        reset_to_default();
        assert_eq!(local.get(), None);
        assert!(ExecutionContext::capture().unwrap().is_default());
    }
}
