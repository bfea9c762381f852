//! Targets without a context switch
//!
//! Never reached at runtime: the scheduler checks `SUPPORTED` before
//! starting a green thread and falls back to the thread pool.

use greenrt_core::{fatal, ArchContext, SavedRegs, StackBounds};

pub struct Native;

impl ArchContext for Native {
    const SUPPORTED: bool = false;

    unsafe fn init(
        _regs: &mut SavedRegs,
        _bounds: StackBounds,
        _entry: unsafe extern "C" fn(usize) -> !,
        _arg: usize,
    ) {
        fatal!("stack switching is not available on this target");
    }

    unsafe fn switch(_from: *mut SavedRegs, _to: *const SavedRegs) {
        fatal!("stack switching is not available on this target");
    }

    #[inline(never)]
    fn stack_pointer() -> usize {
        let marker = 0u8;
        std::hint::black_box(&marker) as *const u8 as usize
    }
}
