//! Saved register layouts and stack bounds
//!
//! `SavedRegs` has a fixed repr(C) layout; the offsets below are read and
//! written directly by the context-switch assembly in `greenrt-runtime`.

use crate::constants::STACK_ALIGN;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Callee-saved state per the System V AMD64 ABI
        ///
        /// ```text
        /// 0x00: rsp
        /// 0x08: rip   - resume address
        /// 0x10: rbx
        /// 0x18: rbp
        /// 0x20: r12   - entry fn on first switch
        /// 0x28: r13   - entry arg on first switch
        /// 0x30: r14
        /// 0x38: r15
        /// ```
        #[repr(C)]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct SavedRegs {
            pub rsp: u64,
            pub rip: u64,
            pub rbx: u64,
            pub rbp: u64,
            pub r12: u64,
            pub r13: u64,
            pub r14: u64,
            pub r15: u64,
        }

        impl SavedRegs {
            #[inline]
            pub fn stack_pointer(&self) -> usize {
                self.rsp as usize
            }
        }

        pub const SAVED_REGS_SIZE: usize = 64;
    } else if #[cfg(target_arch = "aarch64")] {
        /// Callee-saved state per AAPCS64
        ///
        /// ```text
        /// 0x00: x19..x28  (x19 = entry fn, x20 = entry arg on first switch)
        /// 0x50: fp (x29)
        /// 0x58: lr (x30)  - resume address
        /// 0x60: sp
        /// 0x68: padding
        /// 0x70: d8..d15
        /// ```
        #[repr(C)]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct SavedRegs {
            pub x19_x28: [u64; 10],
            pub fp: u64,
            pub lr: u64,
            pub sp: u64,
            _pad: u64,
            pub d8_d15: [u64; 8],
        }

        impl SavedRegs {
            #[inline]
            pub fn stack_pointer(&self) -> usize {
                self.sp as usize
            }
        }

        pub const SAVED_REGS_SIZE: usize = 176;
    } else {
        /// Placeholder on targets without a context switch
        #[repr(C)]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct SavedRegs {
            pub sp: u64,
        }

        impl SavedRegs {
            #[inline]
            pub fn stack_pointer(&self) -> usize {
                self.sp as usize
            }
        }

        pub const SAVED_REGS_SIZE: usize = 8;
    }
}

const _: () = assert!(core::mem::size_of::<SavedRegs>() == SAVED_REGS_SIZE);

impl SavedRegs {
    /// Every saved word, for conservative root scanning
    pub fn words(&self) -> &[u64] {
        // Safety: repr(C) and made only of u64 fields
        unsafe {
            core::slice::from_raw_parts(self as *const Self as *const u64, SAVED_REGS_SIZE / 8)
        }
    }
}

/// Usable address range of one green stack (grows down from `top`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    /// Lowest usable address, just above the guard page
    pub limit: usize,
    /// One past the highest usable address
    pub top: usize,
}

impl StackBounds {
    #[inline]
    pub const fn new(limit: usize, top: usize) -> Self {
        Self { limit, top }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.top - self.limit
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.top == self.limit
    }

    #[inline]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.limit && addr < self.top
    }

    /// Initial stack pointer: top rounded down to the ABI alignment
    #[inline]
    pub const fn initial_sp(&self) -> usize {
        self.top & !(STACK_ALIGN - 1)
    }

    /// Bytes still available below `sp`
    #[inline]
    pub const fn remaining(&self, sp: usize) -> usize {
        sp.saturating_sub(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let b = StackBounds::new(0x1000, 0x9008);
        assert_eq!(b.len(), 0x8008);
        assert!(b.contains(0x1000));
        assert!(!b.contains(0x9008));
        assert_eq!(b.initial_sp(), 0x9000);
        assert_eq!(b.remaining(0x1800), 0x800);
        assert_eq!(b.remaining(0x800), 0);
    }

    #[test]
    fn test_saved_regs_default_zeroed() {
        let regs = SavedRegs::default();
        assert_eq!(regs.stack_pointer(), 0);
        assert_eq!(regs.words().len() * 8, SAVED_REGS_SIZE);
        assert!(regs.words().iter().all(|&w| w == 0));
    }
}
