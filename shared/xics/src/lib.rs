//! Native interrupt presentation for the XICS interrupt controller.
//!
//! Each CPU has a presentation block (ICP) mapped into its address space.
//! Reading `xirr` claims the highest priority pending interrupt and raises
//! the CPU's priority (CPPR) to it; writing the vector back with the old
//! priority ends it. IPIs are raised by writing a target's `qirr`.
//!
//! Start with [icp_native_init], or [NativeIcp::probe] followed by
//! [NativeIcp::activate]. The kernel services the driver needs come in
//! through the traits in [platform].

#![cfg_attr(not(test), no_std)]

pub mod dispatch;
pub mod error;
#[cfg(feature = "fdt")]
pub mod flat_tree;
pub mod icp;
pub mod ipi;
pub mod ops;
pub mod platform;
pub mod regs;
pub mod resource;
pub mod topology;

#[cfg(test)]
mod testing;

pub use error::{IcpError, MapError, NodeError};
#[cfg(feature = "fdt")]
pub use flat_tree::FdtTree;
pub use icp::{icp_native_init, NativeIcp};
pub use ipi::{IpiMessage, IpiMessages, IpiTarget};
pub use ops::{icp_ops, register_icp_ops, IcpOps, IrqReturn};
pub use platform::{CpuTopology, Irq, IrqHost, MessageSink, MmioMapper, Platform, RegionOwner};
