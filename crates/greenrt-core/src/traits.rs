//! Platform, architecture and collaborator traits
//!
//! These traits define the seams between the platform-agnostic core, the
//! platform runtime, and the subsystems the scheduler only talks to
//! (garbage collector, task/future abstraction).

use crate::error::SchedResult;
use crate::id::LogicalThreadId;
use crate::metadata::{SavedRegs, StackBounds};

/// Platform-specific memory operations backing green stacks
pub trait StackMemory: Send + Sync {
    /// Reserve inaccessible virtual address space
    fn reserve_region(&self, size: usize) -> SchedResult<*mut u8>;

    /// Give reserved address space back to the OS
    fn release_region(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Make a range readable/writable
    fn protect_rw(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Make a range inaccessible (guard page)
    fn protect_none(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Drop the physical pages behind a range, keeping the mapping
    fn advise_dontneed(&self, base: *mut u8, size: usize) -> SchedResult<()>;
}

/// Architecture-specific context switch
///
/// Implementations are zero-sized; all state lives in `SavedRegs`.
pub trait ArchContext {
    /// Whether this target can switch stacks at all
    const SUPPORTED: bool;

    /// Prepare `regs` so that switching to it runs `entry(arg)` on the
    /// stack described by `bounds`. `entry` must never return.
    ///
    /// # Safety
    ///
    /// `bounds` must describe mapped, writable memory.
    unsafe fn init(
        regs: &mut SavedRegs,
        bounds: StackBounds,
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
    );

    /// Save callee-saved state into `from` and continue from `to`.
    /// Returns when something switches back into `from`.
    ///
    /// # Safety
    ///
    /// `to` must hold a context produced by `init` or a previous `switch`
    /// that has not been resumed since.
    unsafe fn switch(from: *mut SavedRegs, to: *const SavedRegs);

    /// Current stack pointer of the caller
    fn stack_pointer() -> usize;
}

/// Continuation attached to an awaited unit; runs at most once
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// An outstanding asynchronous operation a green thread can block on
///
/// The scheduler never looks inside; it only needs to know whether the
/// operation is done and to be called back exactly once when it is.
pub trait AwaitedUnit: Send + Sync {
    fn is_completed(&self) -> bool;

    /// Register `k` to run after completion is fully published. If the
    /// unit is already complete, `k` runs immediately on the caller.
    fn on_completed(&self, k: Continuation);
}

/// Root-scanning contract with the garbage collector
///
/// Every green stack is registered for its whole life. While parked, its
/// live range `[sp, top)` is reported so collections can scan it. While
/// running, its bounds stay listed so a collector can scan it in place of
/// the native stack of the OS thread executing it.
pub trait GcRoots: Send + Sync {
    fn register_stack(&self, owner: LogicalThreadId, bounds: StackBounds);

    /// Called by the green thread itself just before it switches out.
    /// `sp` is a conservative stack pointer; scans wait until
    /// `park_stack` publishes the exact one.
    fn begin_park(&self, owner: LogicalThreadId, sp: usize);

    /// Mark the stack parked with its saved stack pointer and the
    /// callee-saved registers that did not go onto the stack
    fn park_stack(&self, owner: LogicalThreadId, sp: usize, regs: &SavedRegs);

    /// Mark the stack running again. Blocks while a scan is in progress.
    fn unpark_stack(&self, owner: LogicalThreadId);

    fn unregister_stack(&self, owner: LogicalThreadId);
}
