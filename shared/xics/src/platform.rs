//! Services the driver consumes from the rest of the kernel.

use core::{fmt, ptr::NonNull};

use crate::{error::MapError, ipi::IpiMessage};

/// A logical IRQ number, as handed out by the generic IRQ layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Irq(pub u32);

/// Logical CPU bookkeeping.
///
/// CPUs are numbered `0..NR_CPUS`; every index in that range is a possible
/// CPU.
pub trait CpuTopology {
    /// The logical CPU executing the caller.
    fn current_cpu(&self) -> usize;
    fn boot_cpu(&self) -> usize;
    fn is_present(&self, cpu: usize) -> bool;
    fn is_online(&self, cpu: usize) -> bool;
    /// The hardware processor id of a logical CPU.
    fn hard_smp_processor_id(&self, cpu: usize) -> u32;
}

/// The virtual IRQ mapping owned by the generic IRQ layer.
pub trait IrqHost {
    /// Reverse lookup of a hardware vector.
    fn find_mapping(&self, hwirq: u32) -> Option<Irq>;
    /// The hardware vector behind a mapped IRQ.
    fn hwirq(&self, irq: Irq) -> Option<u32>;
    /// Mask a vector that has no mapping at its source controller.
    fn mask_unknown_vec(&self, hwirq: u32);
}

/// Cross-CPU call dispatch, keyed by message reason.
pub trait MessageSink {
    /// Handle `msg` on `cpu`. Always called on `cpu` itself.
    fn message_recv(&self, cpu: usize, msg: IpiMessage);
}

/// Everything the running driver calls into.
pub trait Platform: CpuTopology + IrqHost + MessageSink + Sync {}

impl<T: CpuTopology + IrqHost + MessageSink + Sync> Platform for T {}

/// Who a reserved MMIO range belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOwner {
    pub cpu: usize,
    pub server: u32,
}

impl fmt::Display for RegionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU {} [{:#x}] Interrupt Presentation", self.cpu, self.server)
    }
}

/// Physical range reservation and MMIO mapping.
pub trait MmioMapper {
    /// Take exclusive ownership of `[base, base + size)`.
    fn request_region(&self, base: u64, size: u64, owner: RegionOwner) -> Result<(), MapError>;
    fn release_region(&self, base: u64, size: u64);
    /// Map a reserved range, cache-inhibited and guarded. The mapping must
    /// stay valid for the rest of the program.
    fn ioremap(&self, base: u64, size: u64) -> Option<NonNull<u8>>;
}
