//! Error types for the greenrt scheduler
//!
//! Two families live here. `SchedError` and friends describe failures of
//! the scheduling machinery itself (stack reservation, worker spawning).
//! `TaskError` is what user code sees when a task faults or is canceled,
//! identical whether the task ran on a green thread or not.
//!
//! Internal invariant violations are not errors: they go through
//! [`fatal!`](crate::fatal) and terminate the process.

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// The platform has no stack-switching primitive
    Unsupported,

    /// Green threads are switched off by configuration
    Disabled,

    /// Every stack slot is in use
    NoStacksAvailable,

    /// The logical thread id space is used up
    IdsExhausted,

    /// Scheduler not initialized
    NotInitialized,

    /// Scheduler already initialized
    AlreadyInitialized,

    /// The pool is shutting down and refuses new work
    ShuttingDown,

    /// Configuration rejected by `validate()`
    InvalidConfig(ConfigError),

    /// Memory reservation/protection failed
    MemoryError(MemoryError),

    /// Worker thread error
    WorkerError(WorkerError),

    /// Platform-specific error (errno)
    PlatformError(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Unsupported => write!(f, "stack switching not supported on this platform"),
            SchedError::Disabled => write!(f, "green threads disabled by configuration"),
            SchedError::NoStacksAvailable => write!(f, "no green-thread stacks available"),
            SchedError::IdsExhausted => write!(f, "logical thread ids exhausted"),
            SchedError::NotInitialized => write!(f, "scheduler not initialized"),
            SchedError::AlreadyInitialized => write!(f, "scheduler already initialized"),
            SchedError::ShuttingDown => write!(f, "scheduler shutting down"),
            SchedError::InvalidConfig(e) => write!(f, "{}", e),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerError(e) => write!(f, "worker error: {}", e),
            SchedError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap of the stack region failed
    ReservationFailed,

    /// mprotect failed
    ProtectionFailed,

    /// madvise failed
    AdviseFailed,

    /// Requested region does not fit the address space
    TooManyStacks,

    /// Slot index out of range
    InvalidSlot,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::ReservationFailed => write!(f, "stack region reservation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::AdviseFailed => write!(f, "memory advise failed"),
            MemoryError::TooManyStacks => write!(f, "too many stacks requested"),
            MemoryError::InvalidSlot => write!(f, "invalid stack slot"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn worker thread
    SpawnFailed,

    /// Worker thread panicked
    Panicked,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::InvalidConfig(e)
    }
}

/// Failure of a task as observed by whoever waits on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task body panicked or the producer set an exception
    Faulted(String),

    /// The task was canceled before producing a value
    Canceled,
}

impl TaskError {
    /// Build a fault from a panic payload, keeping the message when it is a string
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        TaskError::Faulted(msg)
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Faulted(msg) => write!(f, "task faulted: {}", msg),
            TaskError::Canceled => write!(f, "task canceled"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Log at error level and abort the process
///
/// Reserved for states that mean a green stack or its bookkeeping is
/// corrupt: overflow into the red zone, resuming a context that is not
/// parked, a yield without an awaited unit.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::kerror!("FATAL: {}", format_args!($($arg)*));
        ::std::process::abort()
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", SchedError::MemoryError(MemoryError::ReservationFailed)),
            "memory error: stack region reservation failed"
        );
        assert_eq!(format!("{}", TaskError::Canceled), "task canceled");
        assert_eq!(
            format!("{}", ConfigError::InvalidValue("stack_size")),
            "invalid config: stack_size"
        );
    }

    #[test]
    fn test_error_conversion() {
        let sched: SchedError = MemoryError::TooManyStacks.into();
        assert!(matches!(sched, SchedError::MemoryError(MemoryError::TooManyStacks)));
        let sched: SchedError = WorkerError::SpawnFailed.into();
        assert!(matches!(sched, SchedError::WorkerError(WorkerError::SpawnFailed)));
    }

    #[test]
    fn test_task_error_from_panic() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(TaskError::from_panic(&*payload), TaskError::Faulted("boom".into()));

        let payload: Box<dyn std::any::Any + Send> = Box::new(format!("bad {}", 7));
        assert_eq!(TaskError::from_panic(&*payload), TaskError::Faulted("bad 7".into()));

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(
            TaskError::from_panic(&*payload),
            TaskError::Faulted("task panicked".into())
        );
    }
}
