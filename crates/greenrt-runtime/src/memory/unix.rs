//! Unix stack memory using mmap/mprotect/madvise

use greenrt_core::error::{MemoryError, SchedResult};
use greenrt_core::{kerror, StackMemory};
use nix::errno::Errno;

/// Hint for region start address (high address, away from the heap)
const REGION_START_HINT: usize = 0x7100_0000_0000;

pub struct UnixMemory;

impl StackMemory for UnixMemory {
    /// Reserve address space only: PROT_NONE + MAP_NORESERVE, no commit
    fn reserve_region(&self, size: usize) -> SchedResult<*mut u8> {
        let base = unsafe {
            libc::mmap(
                REGION_START_HINT as *mut libc::c_void,
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            kerror!("mmap of {} bytes failed: {}", size, Errno::last());
            return Err(MemoryError::ReservationFailed.into());
        }
        Ok(base as *mut u8)
    }

    fn release_region(&self, base: *mut u8, size: usize) -> SchedResult<()> {
        let ret = unsafe { libc::munmap(base as *mut libc::c_void, size) };
        if ret != 0 {
            kerror!("munmap failed: {}", Errno::last());
            return Err(MemoryError::ReservationFailed.into());
        }
        Ok(())
    }

    fn protect_rw(&self, base: *mut u8, size: usize) -> SchedResult<()> {
        let ret = unsafe {
            libc::mprotect(base as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_WRITE)
        };
        if ret != 0 {
            kerror!("mprotect(RW) failed: {}", Errno::last());
            return Err(MemoryError::ProtectionFailed.into());
        }
        Ok(())
    }

    fn protect_none(&self, base: *mut u8, size: usize) -> SchedResult<()> {
        let ret = unsafe { libc::mprotect(base as *mut libc::c_void, size, libc::PROT_NONE) };
        if ret != 0 {
            kerror!("mprotect(NONE) failed: {}", Errno::last());
            return Err(MemoryError::ProtectionFailed.into());
        }
        Ok(())
    }

    fn advise_dontneed(&self, base: *mut u8, size: usize) -> SchedResult<()> {
        let ret = unsafe { libc::madvise(base as *mut libc::c_void, size, libc::MADV_DONTNEED) };
        if ret != 0 {
            kerror!("madvise(DONTNEED) failed: {}", Errno::last());
            return Err(MemoryError::AdviseFailed.into());
        }
        Ok(())
    }
}
