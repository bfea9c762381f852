//! Yield/resume bridge
//!
//! The one place where blocking task code meets the switch primitive. A
//! wait that finds itself on a green thread suspends the green thread with
//! the awaited unit as the yielded value; the executor that hosts the
//! green thread receives the unit and arranges the resume.

use std::sync::Arc;

use greenrt_core::AwaitedUnit;

use crate::{switch, tls};

/// Suspend the current green thread until `unit` completes
///
/// Returns `true` after the green thread has been resumed, `false` without
/// doing anything when the caller is not on a green thread. The caller
/// should re-check the unit after `true`; the resume only says it fired.
pub fn try_yield(unit: Arc<dyn AwaitedUnit>) -> bool {
    if !tls::is_green_thread() {
        return false;
    }
    switch::yield_current(Box::new(unit)).is_ok()
}

/// Whether the caller runs on a green thread
#[inline]
pub fn is_green_thread() -> bool {
    tls::is_green_thread()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskCompletionSource;

    #[test]
    fn test_try_yield_off_green_thread() {
        let tcs = TaskCompletionSource::<()>::new();
        assert!(!try_yield(tcs.task().as_awaited_unit()));
        assert!(!is_green_thread());
    }

    #[test]
    fn test_try_yield_hands_unit_to_host() {
        let tcs = TaskCompletionSource::<u32>::new();
        let unit = tcs.task().as_awaited_unit();
        let mut ctx = switch::start(move || {
            assert!(try_yield(unit));
        })
        .unwrap()
        .unwrap();

        let yielded = ctx
            .take_yielded()
            .unwrap()
            .downcast::<Arc<dyn AwaitedUnit>>()
            .unwrap();
        assert!(!yielded.is_completed());
        tcs.set_result(1);
        assert!(yielded.is_completed());
        assert!(switch::resume(ctx, Box::new(())).is_none());
    }
}
