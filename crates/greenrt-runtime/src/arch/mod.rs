//! Architecture-specific context switching
//!
//! Each target provides `Native`, an [`ArchContext`] implementation backed
//! by a naked-asm switch routine. Targets without one get a stub that
//! reports `SUPPORTED = false`; the scheduler then routes all work through
//! the plain thread pool.

use greenrt_core::ArchContext;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::Native;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::Native;
    } else {
        mod unsupported;
        pub use self::unsupported::Native;
    }
}

/// Whether green threads can run on this target at all
pub const STACK_SWITCHING_SUPPORTED: bool = <Native as ArchContext>::SUPPORTED;
