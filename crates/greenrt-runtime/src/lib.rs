//! # greenrt-runtime
//!
//! Platform-specific runtime for the greenrt green-thread scheduler.
//!
//! This crate provides:
//! - Context switching (naked-asm routines for x86_64 and aarch64)
//! - Green stack region and pool (mmap with guard pages)
//! - The stack-switch primitive: start, yield, resume
//! - The green-thread executor and the yield/resume bridge
//! - Tasks, completion sources and the delay timer
//! - Execution context flow and logical thread identity
//! - The GC root registry for parked stacks
//! - A work-stealing thread pool and the task schedulers on top of it

pub mod arch;
pub mod bridge;
pub mod config;
pub mod context;
pub mod executor;
pub mod gc;
pub mod identity;
pub mod memory;
pub mod parking;
pub mod pool;
pub mod ready_queue;
pub mod scheduler;
pub mod signal;
pub mod stats;
pub mod switch;
pub mod task;
pub mod timer;
pub mod tls;
mod worker;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-exports
pub use config::SchedulerConfig;
pub use context::{AsyncFlowControl, AsyncLocal, ExecutionContext};
pub use executor::{run_as_green_thread, run_as_green_thread_with};
pub use gc::{roots, RootRegistry, RootSlot, StackStatus};
pub use identity::current_thread_id;
pub use pool::ThreadPool;
pub use scheduler::{
    default_scheduler, start_new, start_new_with_token, GreenThreadTaskScheduler, TaskCreationOptions, TaskScheduler,
    ThreadPoolTaskScheduler, WorkItem,
};
pub use switch::SuspendedContext;
pub use task::{delay, Task, TaskCompletionSource, TaskStatus};
pub use tls::is_green_thread;

/// Lock `m`, ignoring poisoning
///
/// Every guarded structure here stays consistent across a panic in user
/// code, since user code never runs under these locks.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one test of this binary alone in a child process with extra env
///
/// Used for behavior fixed at process start or fatal to the process.
#[cfg(test)]
pub(crate) fn rerun_test(test: &str, envs: &[(&str, &str)]) -> std::process::Output {
    let mut cmd = std::process::Command::new(std::env::current_exe().unwrap());
    cmd.args(["--exact", test, "--nocapture", "--test-threads=1"]);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().unwrap()
}
