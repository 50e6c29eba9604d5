//! Interrupt presentation register block.
//!
//! Every CPU served by the XICS has one of these blocks mapped. All
//! registers are big-endian.

use core::ptr::NonNull;
use ppc_cpu::intrin::{isync, sync};

/// The vector read back when nothing is pending.
pub const XICS_IRQ_SPURIOUS: u32 = 0;
/// The vector the presentation layer uses for inter-processor interrupts.
pub const XICS_IPI: u32 = 2;

/// Priority carried by IPIs, both in `qirr` and on the CPPR stack.
pub const IPI_PRIORITY: u8 = 4;
/// Priority pushed for every other source.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Accept everything. Also the value that clears `qirr`.
pub const LOWEST_PRIORITY: u8 = 0xFF;

/// Smallest mapping that covers every register we touch.
pub const BLOCK_SIZE: usize = 0x1C;

#[repr(usize)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
enum Register {
    XirrPoll = 0x00,
    Xirr = 0x04,
    Dummy = 0x08,
    Qirr = 0x0C,
    LinkA = 0x10,
    LinkB = 0x14,
    LinkC = 0x18,
}

/// A decoded external interrupt request register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xirr(pub u32);

impl Xirr {
    const VECTOR_MASK: u32 = 0x00FF_FFFF;

    pub const fn new(cppr: u8, vector: u32) -> Self {
        Self(((cppr as u32) << 24) | (vector & Self::VECTOR_MASK))
    }

    pub const fn vector(self) -> u32 {
        self.0 & Self::VECTOR_MASK
    }

    pub const fn cppr(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn is_spurious(self) -> bool {
        self.vector() == XICS_IRQ_SPURIOUS
    }
}

/// One CPU's mapped presentation registers.
pub struct PresentationBlock {
    mmio: NonNull<u8>,
}

// SAFETY: The block is plain MMIO. Which CPU may touch which register is
// enforced by the driver, not by the type.
unsafe impl Send for PresentationBlock {}
unsafe impl Sync for PresentationBlock {}

impl PresentationBlock {
    /// Wrap an already mapped register block.
    ///
    /// # Safety
    /// `mmio` must point to at least [BLOCK_SIZE] bytes of 4-byte aligned,
    /// mapped presentation registers that stay mapped for `'static`.
    pub const unsafe fn new(mmio: NonNull<u8>) -> Self {
        Self { mmio }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.mmio
    }

    fn write<T>(&self, reg: Register, val: T) {
        sync();
        // SAFETY: The access is bounded by Register, and cannot arbitrarily overflow.
        unsafe {
            core::ptr::write_volatile(self.mmio.as_ptr().add(reg as usize) as *mut T, val);
        }
    }

    fn read<T>(&self, reg: Register) -> T {
        sync();
        // SAFETY: The access is bounded by Register, and cannot arbitrarily overflow.
        let val =
            unsafe { core::ptr::read_volatile(self.mmio.as_ptr().add(reg as usize) as *const T) };
        isync();

        val
    }

    /// Read `xirr`, claiming the pending interrupt (if any).
    pub fn claim(&self) -> Xirr {
        Xirr(u32::from_be(self.read::<u32>(Register::Xirr)))
    }

    /// Peek at the pending interrupt without claiming it.
    pub fn poll(&self) -> Xirr {
        Xirr(u32::from_be(self.read::<u32>(Register::XirrPoll)))
    }

    /// Write `xirr`. With a vector in the low bits this is an EOI.
    pub fn set_xirr(&self, xirr: Xirr) {
        self.write(Register::Xirr, xirr.0.to_be());
    }

    /// Write only the CPPR, the most significant byte of `xirr`.
    pub fn set_cppr(&self, cppr: u8) {
        self.write(Register::Xirr, cppr);
    }

    pub fn set_qirr(&self, value: u8) {
        self.write(Register::Qirr, value);
    }

    pub fn qirr(&self) -> u8 {
        self.read(Register::Qirr)
    }
}
