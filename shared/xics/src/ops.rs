//! The interface between a presentation backend and the generic IRQ layer.

use atomic::{Atomic, Ordering};

use crate::{
    ipi::{IpiMessage, IpiTarget},
    platform::Irq,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// Operations every interrupt presentation backend provides.
///
/// Everything except `message_pass` acts on the calling CPU.
pub trait IcpOps: Sync {
    /// Claim the highest priority pending interrupt.
    fn get_irq(&self) -> Option<Irq>;
    /// Finish servicing `irq`. Exactly once per `get_irq` that returned it.
    fn eoi(&self, irq: Irq);
    fn set_priority(&self, cppr: u8);
    /// The calling CPU is going offline.
    fn teardown_cpu(&self);
    /// Acknowledge the boot IPI on a CPU that is still coming up.
    fn flush_ipi(&self);
    /// IPI handler.
    fn ipi_action(&self) -> IrqReturn;
    fn message_pass(&self, target: IpiTarget, msg: IpiMessage);
}

/// The active presentation backend.
static ICP_OPS: Atomic<Option<&'static dyn IcpOps>> = Atomic::new(None);

/// Make `ops` the backend every interrupt goes through.
pub fn register_icp_ops(ops: &'static dyn IcpOps) {
    ICP_OPS.store(Some(ops), Ordering::Release);
}

/// The active presentation backend, if one has been registered.
pub fn icp_ops() -> Option<&'static dyn IcpOps> {
    ICP_OPS.load(Ordering::Acquire)
}
