use core::fmt;

/// Why the native ICP could not be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpError {
    /// No presentation node produced a usable mapping.
    NoController,
    /// Nodes were found, but the boot CPU was left without a block.
    BootCpuUnmapped { cpu: usize },
}

impl fmt::Display for IcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcpError::NoController => write!(f, "no interrupt presentation controller found"),
            IcpError::BootCpuUnmapped { cpu } => {
                write!(f, "boot CPU {} has no interrupt presentation block", cpu)
            }
        }
    }
}

/// A presentation node whose description could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    MissingReg,
    /// `reg` is not a whole number of tuples, or disagrees with the server
    /// count from `ibm,interrupt-server-ranges`.
    RegLength { len: usize, tuple_size: usize, servers: u32 },
    /// An address could not be translated to a CPU physical address.
    Translate { server: u32 },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::MissingReg => write!(f, "can't find interrupt reg property"),
            NodeError::RegLength {
                len,
                tuple_size,
                servers,
            } => write!(
                f,
                "ICP reg len ({} bytes, {}-byte tuples) != num servers ({})",
                len, tuple_size, servers
            ),
            NodeError::Translate { server } => {
                write!(f, "could not translate ICP MMIO for interrupt server {:#x}", server)
            }
        }
    }
}

/// Failure to bring one CPU's register block into the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The physical range overlaps one that is already reserved.
    Busy,
    /// Out of room to track or map the range.
    NoMemory,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Busy => write!(f, "region busy"),
            MapError::NoMemory => write!(f, "mapping failed"),
        }
    }
}
