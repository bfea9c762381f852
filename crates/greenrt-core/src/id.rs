//! Logical thread identifier type

use core::fmt;

use crate::constants::THREAD_ID_NONE;

/// Stable identity of a logical thread
///
/// Green threads receive one when they are created and keep it across
/// every yield/resume, whichever OS thread happens to run them. OS threads
/// receive one lazily the first time they ask for it.
/// The maximum value (u32::MAX) is reserved as a sentinel for "no thread".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct LogicalThreadId(u32);

impl LogicalThreadId {
    /// Sentinel value indicating no logical thread
    pub const NONE: LogicalThreadId = LogicalThreadId(THREAD_ID_NONE);

    #[inline]
    pub const fn new(id: u32) -> Self {
        LogicalThreadId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == THREAD_ID_NONE
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != THREAD_ID_NONE
    }

    /// Convert to Option, mapping the sentinel to `None`
    #[inline]
    pub const fn to_option(self) -> Option<LogicalThreadId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for LogicalThreadId {
    #[inline]
    fn from(id: u32) -> Self {
        LogicalThreadId(id)
    }
}

impl From<LogicalThreadId> for u32 {
    #[inline]
    fn from(id: LogicalThreadId) -> Self {
        id.0
    }
}

impl fmt::Debug for LogicalThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "LogicalThreadId(NONE)")
        } else {
            write!(f, "LogicalThreadId({})", self.0)
        }
    }
}

impl fmt::Display for LogicalThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for LogicalThreadId {
    fn default() -> Self {
        LogicalThreadId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_basics() {
        let id = LogicalThreadId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert!(id.is_some());
        assert_eq!(id.to_option(), Some(id));
        assert_eq!(format!("{}", id), "42");
    }

    #[test]
    fn test_none_sentinel() {
        let none = LogicalThreadId::default();
        assert!(none.is_none());
        assert_eq!(none.to_option(), None);
        assert_eq!(format!("{:?}", none), "LogicalThreadId(NONE)");
    }
}
