//! Claiming and completing external interrupts.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use log::{error, warn};
use ppc_cpu::intrin::sync;

use crate::{
    icp::NativeIcp,
    platform::{Irq, Platform},
    regs::{Xirr, DEFAULT_PRIORITY, IPI_PRIORITY, LOWEST_PRIORITY, XICS_IPI},
};

/// Base, device and IPI.
pub const MAX_NUM_PRIORITIES: usize = 3;

/// The CPPR values to restore on EOI, one entry per nested interrupt.
///
/// Only the owning CPU ever touches its record, so the atomics are just a
/// way to share the array without locks.
pub struct CpprStack {
    stack: [AtomicU8; MAX_NUM_PRIORITIES],
    index: AtomicUsize,
}

impl CpprStack {
    pub const fn new() -> Self {
        Self {
            stack: [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)],
            index: AtomicUsize::new(0),
        }
    }

    /// Record the priority `vector` is serviced at.
    pub fn push(&self, vector: u32) {
        let index = self.index.load(Ordering::Relaxed);
        if index >= MAX_NUM_PRIORITIES - 1 {
            warn!("icp_native: CPPR stack overflow claiming vector {:#x}", vector);
            return;
        }

        let cppr = if vector == XICS_IPI {
            IPI_PRIORITY
        } else {
            DEFAULT_PRIORITY
        };

        self.stack[index + 1].store(cppr, Ordering::Relaxed);
        self.index.store(index + 1, Ordering::Relaxed);
    }

    /// Drop the innermost entry and return the priority to go back to.
    pub fn pop(&self) -> u8 {
        let index = self.index.load(Ordering::Relaxed);
        if index < 1 {
            warn!("icp_native: CPPR stack underflow");
            return LOWEST_PRIORITY;
        }

        self.index.store(index - 1, Ordering::Relaxed);
        self.stack[index - 1].load(Ordering::Relaxed)
    }

    pub fn set_base(&self, cppr: u8) {
        // Only meaningful outside interrupt context.
        if self.depth() != 0 {
            warn!("icp_native: base priority changed while servicing an interrupt");
        }

        self.stack[0].store(cppr, Ordering::Relaxed);
    }

    /// The priority currently in effect.
    pub fn top(&self) -> u8 {
        self.stack[self.depth()].load(Ordering::Relaxed)
    }

    /// Number of interrupts being serviced.
    pub fn depth(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }
}

impl Default for CpprStack {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform, const N: usize> NativeIcp<P, N> {
    pub fn get_irq(&self) -> Option<Irq> {
        let cpu = self.platform.current_cpu();
        let block = self.table.get(cpu)?;

        let xirr = block.claim();
        if xirr.is_spurious() {
            return None;
        }

        let vector = xirr.vector();
        if let Some(irq) = self.platform.find_mapping(vector) {
            self.cppr[cpu].push(vector);
            return Some(irq);
        }

        // No mapping for this vector, so mask it at the source. We might
        // learn about it later, so EOI it rather than leave the CPPR stuck.
        self.platform.mask_unknown_vec(vector);
        block.set_xirr(xirr);

        None
    }

    pub fn eoi(&self, irq: Irq) {
        let cpu = self.platform.current_cpu();
        let block = match self.table.get(cpu) {
            Some(block) => block,
            None => return,
        };

        let cppr = self.cppr[cpu].pop();
        let vector = match self.platform.hwirq(irq) {
            Some(vector) => vector,
            None => {
                error!("icp_native: EOI for IRQ {} with no hardware vector", irq.0);
                return;
            }
        };

        // The handler's own MMIO must land before the controller can
        // present anything else.
        sync();
        block.set_xirr(Xirr::new(cppr, vector));
    }

    pub fn set_priority(&self, cppr: u8) {
        let cpu = self.platform.current_cpu();
        let block = match self.table.get(cpu) {
            Some(block) => block,
            None => return,
        };

        self.cppr[cpu].set_base(cppr);
        block.set_cppr(cppr);
        sync();
    }

    /// Peek at what the calling CPU would claim next.
    pub fn poll(&self) -> Option<Xirr> {
        Some(self.table.get(self.platform.current_cpu())?.poll())
    }

    /// The priority `cpu` currently runs at, as tracked in software.
    pub fn current_priority(&self, cpu: usize) -> Option<u8> {
        Some(self.cppr.get(cpu)?.top())
    }
}
