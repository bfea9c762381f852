//! aarch64 context switching (AAPCS64)
//!
//! Saves x19-x28, fp, lr, sp and the low halves of v8-v15. FPCR is not
//! switched: every context shares the rounding mode of the thread it runs on.

use std::arch::naked_asm;

use greenrt_core::{ArchContext, SavedRegs, StackBounds};

pub struct Native;

impl ArchContext for Native {
    const SUPPORTED: bool = true;

    unsafe fn init(
        regs: &mut SavedRegs,
        bounds: StackBounds,
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
    ) {
        *regs = SavedRegs::default();
        regs.x19_x28[0] = entry as *const () as usize as u64;
        regs.x19_x28[1] = arg as u64;
        regs.lr = green_trampoline as *const () as usize as u64;
        regs.sp = bounds.initial_sp() as u64;
    }

    #[inline(always)]
    unsafe fn switch(from: *mut SavedRegs, to: *const SavedRegs) {
        switch_context(from, to);
    }

    #[inline(always)]
    fn stack_pointer() -> usize {
        let sp: usize;
        unsafe {
            core::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
        }
        sp
    }
}

/// First code run on a fresh stack: `entry(arg)`, which never returns
#[unsafe(naked)]
unsafe extern "C" fn green_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save callee-saved state to `from` (x0), load it from `to` (x1), return
/// through the loaded lr
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_from: *mut SavedRegs, _to: *const SavedRegs) {
    naked_asm!(
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "ret",
    );
}
