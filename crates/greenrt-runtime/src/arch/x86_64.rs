//! x86_64 context switching (System V AMD64)
//!
//! Only callee-saved state is swapped; everything else is dead across the
//! `switch_context` call from the compiler's point of view. The general
//! registers go into `SavedRegs`. MXCSR and the x87 control word are
//! callee-saved too and are pushed on the outgoing stack, so a resumed
//! context gets its own rounding and exception masks back. A fresh context
//! starts with whatever control state its first host had.

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
        // rsp must be 16-byte aligned at the trampoline's `call`, so that
        // entry sees rsp % 16 == 8 like any other callee.
        *regs = SavedRegs {
            rsp: bounds.initial_sp() as u64,
            rip: green_trampoline as *const () as usize as u64,
            rbx: 0,
            rbp: 0,
            r12: entry as *const () as usize as u64,
            r13: arg as u64,
            r14: 0,
            r15: 0,
        };
    }

    #[inline(always)]
    unsafe fn switch(from: *mut SavedRegs, to: *const SavedRegs) {
        switch_context(from, to);
    }

    #[inline(always)]
    fn stack_pointer() -> usize {
        let sp: usize;
        unsafe {
            core::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
        }
        sp
    }
}

/// First code run on a fresh stack: `entry(arg)`, which never returns
#[unsafe(naked)]
unsafe extern "C" fn green_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    );
}

/// Save callee-saved registers to `from` (RDI), load them from `to` (RSI)
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_from: *mut SavedRegs, _to: *const SavedRegs) {
    naked_asm!(
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumed contexts land here with their control words on top
        "1:",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "ret",
    );
}
