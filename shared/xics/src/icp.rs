//! The native ICP backend.

use log::info;
use spin::Once;

use crate::{
    dispatch::CpprStack,
    error::IcpError,
    ipi::{IpiMessage, IpiTarget, IpiWord},
    ops::{register_icp_ops, IcpOps, IrqReturn},
    platform::{Irq, MmioMapper, Platform},
    regs::{PresentationBlock, LOWEST_PRIORITY},
    topology::{self, DeviceTree, IcpTable},
};

/// Drives the presentation blocks of up to `N` CPUs directly through MMIO.
pub struct NativeIcp<P: Platform, const N: usize> {
    pub(crate) platform: P,
    pub(crate) table: IcpTable<N>,
    pub(crate) cppr: [CpprStack; N],
    pub(crate) ipi: [IpiWord; N],
}

impl<P: Platform, const N: usize> NativeIcp<P, N> {
    pub fn new(platform: P, table: IcpTable<N>) -> Self {
        Self {
            platform,
            table,
            cppr: core::array::from_fn(|_| CpprStack::new()),
            ipi: core::array::from_fn(|_| IpiWord::new()),
        }
    }

    /// Discover and map every CPU's presentation block.
    ///
    /// Has no effect on the active backend; see [NativeIcp::activate].
    pub fn probe<T, M>(tree: &T, mapper: &M, platform: P) -> Result<Self, IcpError>
    where
        T: DeviceTree + ?Sized,
        M: MmioMapper + ?Sized,
    {
        let table = topology::discover(tree, &platform, mapper)?;
        info!(
            "icp_native: {} presentation block(s) mapped, boot CPU {}",
            table.mapped(),
            platform.boot_cpu()
        );

        Ok(Self::new(platform, table))
    }

    /// Make this the backend every interrupt goes through.
    pub fn activate(&'static self)
    where
        P: 'static,
    {
        register_icp_ops(self);
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn block(&self, cpu: usize) -> Option<&PresentationBlock> {
        self.table.get(cpu)
    }

    pub fn table(&self) -> &IcpTable<N> {
        &self.table
    }

    /// Per-CPU bring-up: open the calling CPU to every priority.
    pub fn setup_cpu(&self) {
        self.set_priority(LOWEST_PRIORITY);
    }
}

impl<P: Platform, const N: usize> IcpOps for NativeIcp<P, N> {
    fn get_irq(&self) -> Option<Irq> {
        NativeIcp::get_irq(self)
    }

    fn eoi(&self, irq: Irq) {
        NativeIcp::eoi(self, irq)
    }

    fn set_priority(&self, cppr: u8) {
        NativeIcp::set_priority(self, cppr)
    }

    fn teardown_cpu(&self) {
        NativeIcp::teardown_cpu(self)
    }

    fn flush_ipi(&self) {
        NativeIcp::flush_ipi(self)
    }

    fn ipi_action(&self) -> IrqReturn {
        NativeIcp::ipi_action(self)
    }

    fn message_pass(&self, target: IpiTarget, msg: IpiMessage) {
        NativeIcp::message_pass(self, target, msg)
    }
}

/// Probe for a native ICP and make it the active backend.
///
/// The driver lives in `slot` from then on. On failure nothing is
/// registered, and the caller has to pick another presentation backend.
pub fn icp_native_init<T, M, P, const N: usize>(
    tree: &T,
    mapper: &M,
    platform: P,
    slot: &'static Once<NativeIcp<P, N>>,
) -> Result<&'static NativeIcp<P, N>, IcpError>
where
    T: DeviceTree + ?Sized,
    M: MmioMapper + ?Sized,
    P: Platform + 'static,
{
    let icp = slot.try_call_once(|| NativeIcp::probe(tree, mapper, platform))?;
    icp.activate();

    Ok(icp)
}
