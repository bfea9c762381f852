//! # greenrt-core
//!
//! Core types and traits for the greenrt green-thread scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stack switching, memory mapping and the thread pool live in
//! `greenrt-runtime`.
//!
//! ## Modules
//!
//! - `id` - Logical thread identifier
//! - `id_pool` - LIFO pool handing out reusable logical thread ids
//! - `state` - Green-thread lifecycle state machine
//! - `metadata` - Saved register layouts (repr(C)) and stack bounds
//! - `error` - Error types and the `fatal!` macro
//! - `spinlock` - Internal spinlock primitive
//! - `traits` - Platform, architecture and collaborator traits
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod id_pool;
pub mod state;
pub mod metadata;
pub mod error;
pub mod spinlock;
pub mod traits;
pub mod kprint;
pub mod env;
pub mod cancel;

// Re-exports for convenience
pub use id::LogicalThreadId;
pub use id_pool::IdPool;
pub use state::GreenThreadState;
pub use metadata::{SavedRegs, StackBounds};
pub use error::{ConfigError, MemoryError, SchedError, SchedResult, TaskError, WorkerError};
pub use spinlock::SpinLock;
pub use cancel::CancellationToken;
pub use traits::{ArchContext, AwaitedUnit, Continuation, GcRoots, StackMemory};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants for stack layout and scheduler limits
pub mod constants {
    /// Page size assumed for guard pages and stack rounding
    pub const PAGE_SIZE: usize = 4096;

    /// Guard page size at the low end of every green stack
    pub const GUARD_SIZE: usize = PAGE_SIZE;

    /// Default usable stack size per green thread (256 KB)
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Smallest stack a green thread may be configured with (64 KB)
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Default cooperative overflow margin above the guard page (16 KB)
    pub const DEFAULT_RED_ZONE: usize = 16 * 1024;

    /// Initial stack pointer alignment required by both supported ABIs
    pub const STACK_ALIGN: usize = 16;

    /// Maximum workers (OS threads) in one pool
    pub const MAX_WORKERS: usize = 64;

    /// Default maximum number of simultaneously live green threads
    pub const DEFAULT_MAX_GREEN_THREADS: usize = 16384;

    /// No logical thread sentinel value
    pub const THREAD_ID_NONE: u32 = u32::MAX;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
