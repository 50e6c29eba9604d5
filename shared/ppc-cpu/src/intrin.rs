//! Storage-ordering instructions.
//!
//! On anything other than `powerpc64` these fall back to a sequentially
//! consistent fence, which is at least as strong as every instruction here.

#[cfg(target_arch = "powerpc64")]
use core::arch::asm;
#[cfg(not(target_arch = "powerpc64"))]
use core::sync::atomic::{fence, Ordering};

/// Full barrier (`sync`). Orders every prior load and store, cacheable or
/// not, against every later one.
#[inline]
pub fn sync() {
    #[cfg(target_arch = "powerpc64")]
    unsafe {
        asm!("sync", options(nostack, preserves_flags));
    }

    #[cfg(not(target_arch = "powerpc64"))]
    fence(Ordering::SeqCst);
}

/// Instruction synchronize (`isync`). Used after an MMIO load so nothing
/// later executes speculatively ahead of it.
#[inline]
pub fn isync() {
    #[cfg(target_arch = "powerpc64")]
    unsafe {
        asm!("isync", options(nostack, preserves_flags));
    }

    #[cfg(not(target_arch = "powerpc64"))]
    fence(Ordering::SeqCst);
}
