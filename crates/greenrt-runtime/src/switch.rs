//! Stack-switch primitive
//!
//! Runs a closure on its own stack and lets it suspend itself, handing a
//! value back to whoever started or resumed it:
//!
//! ```text
//!   host                              green stack
//!   ----                              -----------
//!   start(f) ─────switch────────────▶ f() ...
//!                                     yield_current(v)
//!   ◀──── Some(ctx), ctx holds v ─────┘
//!   ...
//!   resume(ctx, w) ───switch────────▶ yield_current returns Ok(w)
//!                                     ... f returns
//!   ◀──── None ───────────────────────┘
//! ```
//!
//! `start` and `resume` return `Some(SuspendedContext)` when the green
//! thread yields and `None` when it has finished. A `SuspendedContext` is
//! move-only, so each suspension is resumed at most once, from any OS
//! thread.
//!
//! All bookkeeping (which green thread is current, its execution context,
//! its root registration) is done by the host around the raw switch. The
//! green side only records why it switched out and, when yielding, marks
//! its stack as parking so that scans wait for the host. A panic escaping the
//! closure is caught on the green stack and re-raised on the host by the
//! `start`/`resume` call that observed completion.
//!
//! # Thread-locals
//!
//! After a yield the green thread may continue on another OS thread. The
//! runtime's own thread-local accessors are `#[inline(never)]` for this
//! reason. Code running on a green thread that reads a `thread_local!`
//! directly should not keep a reference to it across a suspension.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use greenrt_core::{
    fatal, kdebug, ArchContext, GcRoots, GreenThreadState, LogicalThreadId, SavedRegs,
    SchedError, SchedResult, StackBounds,
};

use crate::arch::{self, Native};
use crate::config;
use crate::context::{self, ExecutionContext};
use crate::memory::{self, StackSlot};
use crate::{gc, identity, signal, stats, tls};

/// Value passed across a switch in either direction
pub type Payload = Box<dyn Any + Send>;

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Per-green-thread control block
///
/// Heap-allocated with a stable address for its whole life. Fields are
/// only touched through the raw pointer, by whichever side of the switch
/// is currently running.
pub(crate) struct ControlBlock {
    regs: SavedRegs,
    /// Where the current host saved itself; valid while running
    host: *mut SavedRegs,
    stack: Option<StackSlot>,
    bounds: StackBounds,
    /// Lowest stack pointer allowed by `check_stack`
    red_zone_limit: usize,
    state: GreenThreadState,
    entry: Option<Entry>,
    transfer: Option<Payload>,
    panic: Option<Payload>,
    /// Execution context while not running
    context: ExecutionContext,
    id: LogicalThreadId,
    resume_count: u64,
}

/// A stack and an id set aside for one green thread
///
/// Splitting reservation from [`start_reserved`] lets a caller find out
/// that no green thread can be had while it still owns the closure.
/// Dropping an unused reservation returns both.
pub struct Reservation {
    stack: Option<StackSlot>,
    id: LogicalThreadId,
}

impl Reservation {
    pub fn thread_id(&self) -> LogicalThreadId {
        self.id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(slot) = self.stack.take() {
            release_resources(slot, self.id);
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation").field("id", &self.id).finish()
    }
}

fn release_resources(slot: StackSlot, id: LogicalThreadId) {
    match memory::stack_pool() {
        Ok(pool) => pool.release(slot),
        Err(e) => fatal!("stack {} outlived its pool: {}", slot.index(), e),
    }
    identity::release_green_id(id);
}

/// Set aside a stack and a logical thread id
pub fn reserve() -> SchedResult<Reservation> {
    if !arch::STACK_SWITCHING_SUPPORTED {
        return Err(SchedError::Unsupported);
    }
    let pool = memory::stack_pool()?;
    let slot = pool.acquire()?;
    let id = match identity::acquire_green_id() {
        Ok(id) => id,
        Err(e) => {
            pool.release(slot);
            return Err(e);
        }
    };
    Ok(Reservation { stack: Some(slot), id })
}

/// Run `f` on a fresh green thread until it yields or finishes
pub fn start<F>(f: F) -> SchedResult<Option<SuspendedContext>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(start_reserved(reserve()?, f))
}

/// Run `f` on the green thread set aside by `reservation`
pub fn start_reserved<F>(mut reservation: Reservation, f: F) -> Option<SuspendedContext>
where
    F: FnOnce() + Send + 'static,
{
    let Some(stack) = reservation.stack.take() else {
        fatal!("reservation {} already consumed", reservation.id);
    };
    let id = reservation.id;
    let bounds = stack.bounds();
    let red_zone_limit = bounds.limit + config::global().red_zone;

    let cb = Box::into_raw(Box::new(ControlBlock {
        regs: SavedRegs::default(),
        host: ptr::null_mut(),
        stack: Some(stack),
        bounds,
        red_zone_limit,
        state: GreenThreadState::NotStarted,
        entry: Some(Box::new(f)),
        transfer: None,
        panic: None,
        context: ExecutionContext::default(),
        id,
        resume_count: 0,
    }));

    // Safety: the slot is mapped RW and owned by this control block
    unsafe { Native::init(&mut (*cb).regs, bounds, green_entry, cb as usize) };
    gc::roots().register_stack(id, bounds);
    stats::record_started();
    kdebug!("green thread {} starting on stack {:#x}..{:#x}", id, bounds.limit, bounds.top);

    // Safety: freshly initialized, never run
    unsafe { switch_in(cb) }
}

/// Continue a suspended green thread, delivering `value` as the result of
/// its pending `yield_current`
pub fn resume(ctx: SuspendedContext, value: Payload) -> Option<SuspendedContext> {
    let cb = ctx.into_raw();
    // Safety: a SuspendedContext owns a parked control block
    unsafe {
        if !(*cb).state.is_resumable() {
            fatal!("resume of green thread {} in state {}", (*cb).id, (*cb).state);
        }
        (*cb).transfer = Some(value);
        (*cb).resume_count += 1;
        gc::roots().unpark_stack((*cb).id);
        stats::record_resumed();
        switch_in(cb)
    }
}

/// Switch from the calling host into `cb` and handle whatever brought us back
///
/// # Safety
///
/// `cb` must be a live control block that is not running anywhere.
unsafe fn switch_in(cb: *mut ControlBlock) -> Option<SuspendedContext> {
    signal::ensure_alt_stack();
    let mut host = SavedRegs::default();
    (*cb).host = &mut host;

    let prev_green = tls::replace_current_green(cb);
    let prev_log = greenrt_core::kprint::set_green_context((*cb).id.as_u32());
    let host_ctx = context::swap_current(std::mem::take(&mut (*cb).context));
    (*cb).state = GreenThreadState::Running;

    Native::switch(&mut host, ptr::addr_of!((*cb).regs));

    (*cb).context = context::swap_current(host_ctx);
    greenrt_core::kprint::set_green_context(prev_log);
    tls::replace_current_green(prev_green);
    (*cb).host = ptr::null_mut();

    match (*cb).state {
        GreenThreadState::Yielded => {
            gc::roots().park_stack((*cb).id, (*cb).regs.stack_pointer(), &(*cb).regs);
            stats::record_yielded();
            Some(SuspendedContext { cb: NonNull::new_unchecked(cb) })
        }
        GreenThreadState::Completed => {
            let mut done = Box::from_raw(cb);
            kdebug!("green thread {} completed after {} resumes", done.id, done.resume_count);
            gc::roots().unregister_stack(done.id);
            if let Some(slot) = done.stack.take() {
                release_resources(slot, done.id);
            }
            stats::record_completed();
            if let Some(payload) = done.panic.take() {
                drop(done);
                panic::resume_unwind(payload);
            }
            None
        }
        state => fatal!("green thread {} switched out in state {}", (*cb).id, state),
    }
}

/// First frame of every green thread
unsafe extern "C" fn green_entry(arg: usize) -> ! {
    let cb = arg as *mut ControlBlock;
    check_stack(0);
    if let Some(entry) = (*cb).entry.take() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            (*cb).panic = Some(payload);
        }
    }
    (*cb).state = GreenThreadState::Completed;
    let host = (*cb).host;
    Native::switch(ptr::addr_of_mut!((*cb).regs), host);
    fatal!("completed green thread was resumed");
}

/// Suspend the calling green thread, handing `value` to its host
///
/// Returns the value passed to [`resume`]. Off a green thread nothing is
/// suspended and `value` comes back as `Err`.
#[inline(never)]
pub fn yield_current(value: Payload) -> Result<Payload, Payload> {
    let cb = tls::current_green();
    if cb.is_null() {
        return Err(value);
    }
    check_stack(0);
    // Safety: the current control block is live while it runs
    unsafe {
        (*cb).transfer = Some(value);
        (*cb).state = GreenThreadState::Yielded;
        // Scans from here on wait for the host to publish the saved registers
        gc::roots().begin_park((*cb).id, Native::stack_pointer());
        let host = (*cb).host;
        Native::switch(ptr::addr_of_mut!((*cb).regs), host);

        // Possibly a different OS thread from here on
        match (*cb).transfer.take() {
            Some(v) => Ok(v),
            None => fatal!("green thread {} resumed without a value", (*cb).id),
        }
    }
}

/// Abort if fewer than `bytes` of stack remain above the red zone
///
/// A no-op off green threads, whose stacks the OS grows and guards.
#[inline]
pub fn check_stack(bytes: usize) {
    let cb = tls::current_green();
    if cb.is_null() {
        return;
    }
    let sp = Native::stack_pointer();
    // Safety: the current control block is live while it runs
    let (limit, id) = unsafe { ((*cb).red_zone_limit, (*cb).id) };
    if sp.saturating_sub(bytes) < limit {
        fatal!(
            "green thread {} stack overflow: sp={:#x} need={} red zone starts at {:#x}",
            id,
            sp,
            bytes,
            limit
        );
    }
}

/// Id stored in `cb`
///
/// # Safety
///
/// `cb` must be a live control block.
pub(crate) unsafe fn control_block_id(cb: *const ControlBlock) -> LogicalThreadId {
    (*cb).id
}

/// Logical id of the running green thread
#[inline(never)]
pub fn current_green_id() -> Option<LogicalThreadId> {
    let cb = tls::current_green();
    // Safety: the current control block is live while it runs
    (!cb.is_null()).then(|| unsafe { (*cb).id })
}

/// Times the running green thread has been resumed, `None` off green threads
pub fn current_resume_count() -> Option<u64> {
    let cb = tls::current_green();
    // Safety: as above
    (!cb.is_null()).then(|| unsafe { (*cb).resume_count })
}

/// Stack bounds of the running green thread
pub fn current_stack_bounds() -> Option<StackBounds> {
    let cb = tls::current_green();
    // Safety: as above
    (!cb.is_null()).then(|| unsafe { (*cb).bounds })
}

/// A parked green thread
///
/// Owning one is the right to resume it exactly once. Dropping it without
/// resuming abandons the green thread: its frames can never be unwound, so
/// its stack and everything on it are leaked.
pub struct SuspendedContext {
    cb: NonNull<ControlBlock>,
}

// Safety: a parked control block is touched only by its owner
unsafe impl Send for SuspendedContext {}

impl SuspendedContext {
    fn block(&self) -> &ControlBlock {
        // Safety: parked, so nothing else accesses it
        unsafe { self.cb.as_ref() }
    }

    /// Take the value passed to `yield_current`
    pub fn take_yielded(&mut self) -> Option<Payload> {
        // Safety: as above
        unsafe { self.cb.as_mut().transfer.take() }
    }

    pub fn thread_id(&self) -> LogicalThreadId {
        self.block().id
    }

    pub fn stack_bounds(&self) -> StackBounds {
        self.block().bounds
    }

    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.block().regs.stack_pointer()
    }

    pub fn resume_count(&self) -> u64 {
        self.block().resume_count
    }

    pub fn state(&self) -> GreenThreadState {
        self.block().state
    }

    fn into_raw(self) -> *mut ControlBlock {
        let cb = self.cb.as_ptr();
        std::mem::forget(self);
        cb
    }
}

impl fmt::Debug for SuspendedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedContext")
            .field("id", &self.thread_id())
            .field("state", &self.state())
            .field("resume_count", &self.resume_count())
            .finish()
    }
}

impl Drop for SuspendedContext {
    fn drop(&mut self) {
        let id = self.thread_id();
        greenrt_core::kwarn!("green thread {} abandoned while parked; leaking its stack", id);
        gc::roots().unregister_stack(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_run_to_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let result = start(move || {
            assert!(tls::is_green_thread());
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(result.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!tls::is_green_thread());
    }

    #[test]
    fn test_yield_and_resume_pass_values() {
        let mut ctx = start(|| {
            let reply = yield_current(Box::new(1u32)).unwrap();
            let n = *reply.downcast::<u32>().unwrap();
            let reply = yield_current(Box::new(n + 10)).unwrap();
            assert_eq!(*reply.downcast::<&str>().unwrap(), "done");
        })
        .unwrap()
        .unwrap();

        let first = ctx.take_yielded().unwrap().downcast::<u32>().unwrap();
        assert_eq!(*first, 1);
        assert_eq!(ctx.resume_count(), 0);

        let mut ctx = resume(ctx, Box::new(5u32)).unwrap();
        assert_eq!(*ctx.take_yielded().unwrap().downcast::<u32>().unwrap(), 15);
        assert_eq!(ctx.resume_count(), 1);

        assert!(resume(ctx, Box::new("done")).is_none());
    }

    #[test]
    fn test_yield_off_green_thread_returns_value() {
        let back = yield_current(Box::new(3u8)).unwrap_err();
        assert_eq!(*back.downcast::<u8>().unwrap(), 3);
    }

    #[test]
    fn test_resume_on_another_thread() {
        let ctx = start(|| {
            let before = nix::sys::pthread::pthread_self();
            let _ = yield_current(Box::new(())).unwrap();
            let after = nix::sys::pthread::pthread_self();
            assert_ne!(before, after);
            assert_eq!(current_resume_count(), Some(1));
        })
        .unwrap()
        .unwrap();

        let done = std::thread::spawn(move || resume(ctx, Box::new(())).is_none())
            .join()
            .unwrap();
        assert!(done);
    }

    #[test]
    fn test_id_is_stable_across_migration() {
        let ctx = start(|| {
            let id = identity::current_thread_id();
            let _ = yield_current(Box::new(id)).unwrap();
            assert_eq!(identity::current_thread_id(), id);
        })
        .unwrap()
        .unwrap();
        let mut ctx = ctx;
        let yielded = *ctx.take_yielded().unwrap().downcast::<LogicalThreadId>().unwrap();
        assert_eq!(yielded, ctx.thread_id());
        assert_ne!(yielded, identity::current_thread_id());

        let done = std::thread::spawn(move || resume(ctx, Box::new(())).is_none())
            .join()
            .unwrap();
        assert!(done);
    }

    #[test]
    fn test_panic_is_reraised_on_host() {
        let result = std::panic::catch_unwind(|| {
            let _ = start(|| panic!("green boom"));
        });
        let err = result.unwrap_err();
        assert_eq!(*err.downcast::<&str>().unwrap(), "green boom");
        assert!(!tls::is_green_thread());
    }

    #[test]
    fn test_nested_start() {
        let ctx = start(|| {
            let outer = current_green_id().unwrap();
            let inner = start(move || {
                assert_ne!(current_green_id().unwrap(), outer);
                let _ = yield_current(Box::new(())).unwrap();
            })
            .unwrap()
            .unwrap();
            assert_eq!(current_green_id(), Some(outer));
            assert!(resume(inner, Box::new(())).is_none());
        })
        .unwrap();
        assert!(ctx.is_none());
    }

    #[test]
    fn test_execution_context_follows_green_thread() {
        let local = crate::context::AsyncLocal::<u32>::new();
        let ctx = start(move || {
            local.set(42);
            let _ = yield_current(Box::new(())).unwrap();
            assert_eq!(local.get(), Some(42));
        })
        .unwrap()
        .unwrap();
        // The green thread's value did not leak onto the host
        assert_eq!(local.get(), None);
        std::thread::spawn(move || {
            assert!(resume(ctx, Box::new(())).is_none());
            assert_eq!(local.get(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_check_stack_passes_with_room() {
        let done = start(|| {
            check_stack(1024);
            let bounds = current_stack_bounds().unwrap();
            assert!(bounds.contains(Native::stack_pointer()));
        })
        .unwrap();
        assert!(done.is_none());
        // No-op off green threads
        check_stack(usize::MAX);
    }

    /// Set in a re-executed test binary to run one overflow scenario
    const OVERFLOW_CHILD: &str = "GREENRT_OVERFLOW_CHILD";

    #[inline(never)]
    fn recurse_forever(depth: usize) -> usize {
        let frame = [depth; 64];
        std::hint::black_box(&frame);
        if depth == usize::MAX {
            return 0;
        }
        recurse_forever(depth + 1) + frame[0]
    }

    #[inline(never)]
    fn sink_into_red_zone(stop_below: usize) -> usize {
        let frame = [stop_below; 32];
        std::hint::black_box(&frame);
        if Native::stack_pointer() < stop_below {
            let _ = yield_current(Box::new(()));
            return 0;
        }
        sink_into_red_zone(stop_below) + frame[0]
    }

    fn run_overflow_child(test: &str, scenario: &str) -> (bool, String) {
        let output =
            crate::rerun_test(test, &[(OVERFLOW_CHILD, scenario), ("GREENRT_LOG_LEVEL", "error")]);
        (output.status.success(), String::from_utf8_lossy(&output.stderr).into_owned())
    }

    #[test]
    fn test_guard_page_overflow_is_reported() {
        if std::env::var(OVERFLOW_CHILD).as_deref() == Ok("guard") {
            let _ = start(|| {
                std::hint::black_box(recurse_forever(0));
            });
            return;
        }
        let (ok, stderr) =
            run_overflow_child("switch::tests::test_guard_page_overflow_is_reported", "guard");
        assert!(!ok);
        assert!(stderr.contains("stack overflow"), "stderr: {}", stderr);
        assert!(stderr.contains("guard page"), "stderr: {}", stderr);
    }

    #[test]
    fn test_yield_in_red_zone_is_fatal() {
        if std::env::var(OVERFLOW_CHILD).as_deref() == Ok("red-zone") {
            let _ = start(|| {
                let bounds = current_stack_bounds().unwrap();
                let stop_below = bounds.limit + config::global().red_zone;
                std::hint::black_box(sink_into_red_zone(stop_below));
            });
            return;
        }
        let (ok, stderr) =
            run_overflow_child("switch::tests::test_yield_in_red_zone_is_fatal", "red-zone");
        assert!(!ok);
        assert!(stderr.contains("stack overflow"), "stderr: {}", stderr);
        assert!(stderr.contains("red zone"), "stderr: {}", stderr);
    }

    #[test]
    fn test_running_stack_is_listed_with_its_bounds() {
        let ctx = start(|| {
            let id = current_green_id().unwrap();
            let bounds = current_stack_bounds().unwrap();
            let mut listed = None;
            gc::roots().for_each_registered(|owner, b, status| {
                if owner == id {
                    listed = Some((b, status));
                }
            });
            assert_eq!(listed, Some((bounds, gc::StackStatus::Running)));
            let _ = yield_current(Box::new(())).unwrap();
        })
        .unwrap()
        .unwrap();
        assert_eq!(gc::roots().status(ctx.thread_id()), Some(gc::StackStatus::Parked));
        let id = ctx.thread_id();
        assert!(resume(ctx, Box::new(())).is_none());
        assert_eq!(gc::roots().status(id), None);
    }

    #[cfg(target_arch = "x86_64")]
    fn mxcsr() -> u32 {
        let mut value = 0u32;
        // Safety: stores the control register into a local
        unsafe { std::arch::asm!("stmxcsr [{}]", in(reg) ptr::addr_of_mut!(value), options(nostack)) };
        value
    }

    #[cfg(target_arch = "x86_64")]
    fn set_mxcsr(value: u32) {
        // Safety: only the rounding bits are changed by callers
        unsafe { std::arch::asm!("ldmxcsr [{}]", in(reg) ptr::addr_of!(value), options(nostack)) };
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_float_control_word_is_per_thread() {
        const ROUND_TOWARD_ZERO: u32 = 0x6000;
        // Sticky exception flags aside
        const CONTROL: u32 = !0x3f;
        let host = mxcsr() & CONTROL;
        let ctx = start(move || {
            set_mxcsr((mxcsr() & !0x6000) | ROUND_TOWARD_ZERO);
            let _ = yield_current(Box::new(())).unwrap();
            assert_eq!(mxcsr() & 0x6000, ROUND_TOWARD_ZERO);
            set_mxcsr(mxcsr() & !0x6000);
        })
        .unwrap()
        .unwrap();
        assert_eq!(mxcsr() & CONTROL, host);
        assert!(resume(ctx, Box::new(())).is_none());
        assert_eq!(mxcsr() & CONTROL, host);
    }

    #[test]
    fn test_parked_stack_is_registered_for_scanning() {
        let ctx = start(|| {
            // Address taken, so the marker lives in memory on this stack
            let marker = [0x5eed_f00d_cafe_0001usize; 2];
            std::hint::black_box(&marker);
            let _ = yield_current(Box::new(())).unwrap();
            std::hint::black_box(&marker);
        })
        .unwrap()
        .unwrap();

        let id = ctx.thread_id();
        let (sp, top) = gc::roots().parked_range(id).unwrap();
        assert_eq!(sp, ctx.stack_pointer());
        assert_eq!(top, ctx.stack_bounds().top);

        let mut found = false;
        gc::roots().scan_parked(|owner, slot, word| {
            if owner == id && word == 0x5eed_f00d_cafe_0001 {
                assert!(matches!(slot, gc::RootSlot::Stack(_)));
                found = true;
            }
        });
        assert!(found);
        assert!(resume(ctx, Box::new(())).is_none());
        assert!(gc::roots().parked_range(id).is_none());
    }
}
