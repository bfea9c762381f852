//! Cancellation token for cooperative cancellation
//!
//! A token is checked before a work item starts; a canceled item never
//! runs and its task completes as canceled. Code that is already running
//! may poll the token itself. Tokens can be linked so that canceling a
//! parent cancels every child.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TaskError;

/// Token for checking and triggering cancellation
///
/// Clones share the same flag. [`CancellationToken::none`] never cancels
/// and does not allocate.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Create an independent token
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner { cancelled: AtomicBool::new(false), parent: None })),
        }
    }

    /// A token that can never be canceled
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Create a token that is also canceled when this one is
    pub fn child(&self) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            })),
        }
    }

    /// Whether cancellation was requested here or on any parent
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            Some(inner) => {
                inner.cancelled.load(Ordering::Acquire)
                    || inner.parent.as_ref().is_some_and(CancellationToken::is_cancelled)
            }
            None => false,
        }
    }

    /// Whether this token can ever be canceled
    pub fn can_be_cancelled(&self) -> bool {
        self.inner.is_some()
    }

    /// Request cancellation. Only this token's flag is set; children see
    /// it when they check.
    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.cancelled.store(true, Ordering::Release);
        }
    }

    /// `Err(TaskError::Canceled)` once cancellation was requested
    ///
    /// ```ignore
    /// fn worker(token: &CancellationToken) -> Result<(), TaskError> {
    ///     loop {
    ///         token.check()?;
    ///         // ... do work ...
    ///     }
    /// }
    /// ```
    #[inline]
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("can_be_cancelled", &self.can_be_cancelled())
            .finish()
    }
}
