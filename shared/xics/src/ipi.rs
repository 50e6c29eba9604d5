//! Inter-processor interrupts.
//!
//! The hardware only says that *an* IPI is pending, through the target's
//! `qirr`. Why it was sent lives in a per-CPU message word next to it.

use bitflags::bitflags;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::warn;
use ppc_cpu::intrin::sync;

use crate::{
    icp::NativeIcp,
    ops::IrqReturn,
    platform::Platform,
    regs::{Xirr, IPI_PRIORITY, LOWEST_PRIORITY, XICS_IPI},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpiMessage {
    CallFunction = 0,
    Reschedule = 1,
    CallFuncSingle = 2,
    DebuggerBreak = 3,
}

impl IpiMessage {
    /// Every message, in the order they are handled.
    pub const ALL: [IpiMessage; 4] = [
        IpiMessage::CallFunction,
        IpiMessage::Reschedule,
        IpiMessage::CallFuncSingle,
        IpiMessage::DebuggerBreak,
    ];

    pub fn bit(self) -> IpiMessages {
        IpiMessages::from_bits_truncate(1 << self as usize)
    }
}

bitflags! {
    /// A set of pending messages.
    pub struct IpiMessages: usize {
        const CALL_FUNCTION = 1 << 0;
        const RESCHEDULE = 1 << 1;
        const CALL_FUNC_SINGLE = 1 << 2;
        const DEBUGGER_BREAK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiTarget {
    Cpu(usize),
    /// Every online CPU, including the sender.
    All,
    AllButSelf,
}

/// One CPU's pending messages. Any CPU may post; only the owner takes.
pub struct IpiWord(AtomicUsize);

impl IpiWord {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn post(&self, msg: IpiMessage) {
        self.0.fetch_or(msg.bit().bits(), Ordering::Release);
    }

    /// Atomically take every pending message.
    pub fn take(&self) -> IpiMessages {
        IpiMessages::from_bits_truncate(self.0.swap(0, Ordering::Acquire))
    }

    pub fn pending(&self) -> IpiMessages {
        IpiMessages::from_bits_truncate(self.0.load(Ordering::Relaxed))
    }
}

impl Default for IpiWord {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand every message on `word` to `recv`, until none are left.
///
/// Anything posted while this runs is picked up by the next pass.
pub fn drain(word: &IpiWord, mut recv: impl FnMut(IpiMessage)) {
    loop {
        let pending = word.take();
        if pending.is_empty() {
            break;
        }

        for msg in IpiMessage::ALL {
            if pending.contains(msg.bit()) {
                recv(msg);
            }
        }
    }
}

impl<P: Platform, const N: usize> NativeIcp<P, N> {
    /// Post `msg` to `cpu` and ring its doorbell.
    pub fn cause_ipi(&self, cpu: usize, msg: IpiMessage) {
        let block = match self.table.get(cpu) {
            Some(block) => block,
            None => {
                warn!(
                    "icp_native: dropping {:?} IPI to CPU {} without a presentation block",
                    msg, cpu
                );
                return;
            }
        };

        self.ipi[cpu].post(msg);
        // The message must be visible before the target can take the IPI.
        sync();
        block.set_qirr(IPI_PRIORITY);
    }

    pub fn message_pass(&self, target: IpiTarget, msg: IpiMessage) {
        let this_cpu = match target {
            IpiTarget::Cpu(cpu) => return self.cause_ipi(cpu, msg),
            IpiTarget::All => None,
            IpiTarget::AllButSelf => Some(self.platform.current_cpu()),
        };

        for cpu in (0..N).filter(|&cpu| self.platform.is_online(cpu)) {
            if Some(cpu) != this_cpu {
                self.cause_ipi(cpu, msg);
            }
        }
    }

    /// Acknowledge the IPI on `cpu` and handle every message sent to it.
    ///
    /// Must run on `cpu`.
    pub fn receive(&self, cpu: usize) -> IrqReturn {
        let word = match self.ipi.get(cpu) {
            Some(word) => word,
            None => return IrqReturn::None,
        };

        if let Some(block) = self.table.get(cpu) {
            block.set_qirr(LOWEST_PRIORITY);
        }
        // Order the qirr clear before reading the messages.
        sync();

        drain(word, |msg| self.platform.message_recv(cpu, msg));

        IrqReturn::Handled
    }

    pub fn ipi_action(&self) -> IrqReturn {
        self.receive(self.platform.current_cpu())
    }

    /// Clear any IPI left pending on the calling CPU before it goes offline.
    pub fn teardown_cpu(&self) {
        if let Some(block) = self.table.get(self.platform.current_cpu()) {
            block.set_qirr(LOWEST_PRIORITY);
        }
    }

    /// EOI the boot IPI without handling it, leaving the CPPR at 0.
    pub fn flush_ipi(&self) {
        if let Some(block) = self.table.get(self.platform.current_cpu()) {
            block.set_xirr(Xirr::new(0x00, XICS_IPI));
        }
    }

    pub fn pending_messages(&self, cpu: usize) -> IpiMessages {
        self.ipi
            .get(cpu)
            .map_or(IpiMessages::empty(), |word| word.pending())
    }
}
