//! Unix guard-page fault handler

use std::fmt::{self, Write as _};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use greenrt_core::{kdebug, kwarn};
use nix::errno::Errno;

use crate::{memory, tls};

/// Alternate signal stack for threads that have none
const ALT_STACK_SIZE: usize = 64 * 1024;

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Dispositions in place before ours, for faults outside guard pages
static PREVIOUS: OnceLock<Previous> = OnceLock::new();

struct Previous {
    segv: libc::sigaction,
    bus: libc::sigaction,
}

/// Install the guard-page fault handler once per process
pub fn install_overflow_handler() {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    // Safety: plain sigaction calls on zeroed, then filled, structures
    unsafe {
        let mut previous = Previous { segv: std::mem::zeroed(), bus: std::mem::zeroed() };
        if libc::sigaction(libc::SIGSEGV, ptr::null(), &mut previous.segv) != 0
            || libc::sigaction(libc::SIGBUS, ptr::null(), &mut previous.bus) != 0
        {
            kwarn!("cannot read fault handlers: {}", Errno::last());
            return;
        }
        let _ = PREVIOUS.set(previous);

        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_fault as *const () as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGSEGV, libc::SIGBUS] {
            if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
                kwarn!("cannot install fault handler for signal {}: {}", sig, Errno::last());
            }
        }
    }
    kdebug!("guard-page fault handler installed");
}

/// Make sure this OS thread can take a signal while its stack is exhausted
///
/// Threads started by std already carry an alternate signal stack; any
/// other thread gets one that lives as long as the thread.
pub fn ensure_alt_stack() {
    thread_local! {
        static ALT_STACK: AltStack = AltStack::install();
    }
    let _ = ALT_STACK.try_with(|_| ());
}

struct AltStack {
    /// Mapping we own, if we installed it
    map: Option<*mut libc::c_void>,
}

impl AltStack {
    fn install() -> Self {
        // Safety: sigaltstack/mmap with locally owned arguments
        unsafe {
            let mut current: libc::stack_t = std::mem::zeroed();
            if libc::sigaltstack(ptr::null(), &mut current) != 0
                || current.ss_flags & libc::SS_DISABLE == 0
            {
                return Self { map: None };
            }
            let map = libc::mmap(
                ptr::null_mut(),
                ALT_STACK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if map == libc::MAP_FAILED {
                kwarn!("no alternate signal stack: {}", Errno::last());
                return Self { map: None };
            }
            let stack = libc::stack_t { ss_sp: map, ss_flags: 0, ss_size: ALT_STACK_SIZE };
            if libc::sigaltstack(&stack, ptr::null_mut()) != 0 {
                kwarn!("sigaltstack failed: {}", Errno::last());
                libc::munmap(map, ALT_STACK_SIZE);
                return Self { map: None };
            }
            Self { map: Some(map) }
        }
    }
}

impl Drop for AltStack {
    fn drop(&mut self) {
        let Some(map) = self.map else { return };
        // Safety: the mapping is ours and is unhooked before it goes away
        unsafe {
            let mut disable: libc::stack_t = std::mem::zeroed();
            disable.ss_flags = libc::SS_DISABLE;
            libc::sigaltstack(&disable, ptr::null_mut());
            libc::munmap(map, ALT_STACK_SIZE);
        }
    }
}

extern "C" fn on_fault(sig: libc::c_int, info: *mut libc::siginfo_t, uctx: *mut libc::c_void) {
    // Safety: the kernel hands us a valid siginfo for SA_SIGINFO handlers
    let addr = unsafe { fault_address(info) };
    if let Some(slot) = memory::guard_hit(addr) {
        report_overflow(slot, addr);
        // Safety: async-signal-safe
        unsafe { libc::abort() };
    }
    // Safety: forwarding the exact arguments we were given
    unsafe { forward(sig, info, uctx) }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    (*info).si_addr() as usize
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    (*info).si_addr as usize
}

/// Hand a fault that is not ours to the previous disposition
unsafe fn forward(sig: libc::c_int, info: *mut libc::siginfo_t, uctx: *mut libc::c_void) {
    let previous = PREVIOUS.get().map(|p| if sig == libc::SIGBUS { p.bus } else { p.segv });
    match previous {
        Some(prev) if prev.sa_sigaction != libc::SIG_DFL && prev.sa_sigaction != libc::SIG_IGN => {
            if prev.sa_flags & libc::SA_SIGINFO != 0 {
                let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                    std::mem::transmute(prev.sa_sigaction);
                handler(sig, info, uctx);
            } else {
                let handler: extern "C" fn(libc::c_int) = std::mem::transmute(prev.sa_sigaction);
                handler(sig);
            }
        }
        _ => {
            // Returning re-runs the faulting access under the default action
            let mut default: libc::sigaction = std::mem::zeroed();
            default.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(sig, &default, ptr::null_mut());
        }
    }
}

/// Fixed buffer for formatting inside the handler, where nothing may allocate
struct FaultMessage {
    buf: [u8; 192],
    len: usize,
}

impl fmt::Write for FaultMessage {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let n = s.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

fn report_overflow(slot: u32, addr: usize) {
    let mut msg = FaultMessage { buf: [0; 192], len: 0 };
    let cb = tls::current_green();
    let _ = if cb.is_null() {
        writeln!(msg, "FATAL: green stack overflow: guard page of stack slot {} hit at {:#x}", slot, addr)
    } else {
        // Safety: the control block of the faulting green thread is live
        let id = unsafe { crate::switch::control_block_id(cb) };
        writeln!(
            msg,
            "FATAL: green thread {} stack overflow: guard page of stack slot {} hit at {:#x}",
            id, slot, addr
        )
    };
    // Safety: writing a stack buffer to stderr is async-signal-safe
    unsafe { libc::write(libc::STDERR_FILENO, msg.buf.as_ptr().cast(), msg.len) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn test_fault_message_truncates() {
        let mut msg = FaultMessage { buf: [0; 192], len: 0 };
        write!(msg, "{}", "x".repeat(300)).unwrap();
        assert_eq!(msg.len, 192);
    }

    #[test]
    fn test_alt_stack_is_present_after_ensure() {
        std::thread::spawn(|| {
            ensure_alt_stack();
            // Safety: query only
            let enabled = unsafe {
                let mut current: libc::stack_t = std::mem::zeroed();
                libc::sigaltstack(ptr::null(), &mut current) == 0
                    && current.ss_flags & libc::SS_DISABLE == 0
            };
            assert!(enabled);
        })
        .join()
        .unwrap();
    }
}
