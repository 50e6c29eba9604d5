//! Presentation controller discovery.
//!
//! The device tree describes presentation units per interrupt server, not per
//! CPU. Servers are matched to logical CPUs by assuming interrupt server
//! numbers equal hardware processor ids. This holds on every machine that
//! uses the native ICP, but nothing in the tree guarantees it.

use log::{debug, error, warn};

use crate::{
    error::{IcpError, NodeError},
    platform::{CpuTopology, MmioMapper, RegionOwner},
    regs::{PresentationBlock, BLOCK_SIZE},
};

pub const XICP_COMPATIBLE: &str = "ibm,ppc-xicp";
pub const XICP_DEVICE_TYPE: &str = "PowerPC-External-Interrupt-Presentation";
pub const SERVER_RANGES: &str = "ibm,interrupt-server-ranges";

/// A node of the hardware description tree.
pub trait TreeNode {
    fn name(&self) -> &str;
    fn is_compatible(&self, compat: &str) -> bool;
    fn device_type(&self) -> Option<&str>;
    /// Raw property bytes.
    fn property(&self, name: &str) -> Option<&[u8]>;
    /// Width of an address in this node's `reg`, in 32-bit cells.
    fn address_cells(&self) -> usize;
    /// Width of a size in this node's `reg`, in 32-bit cells.
    fn size_cells(&self) -> usize;
    /// Translate an address from this node's `reg` through every parent
    /// bus into a CPU physical address.
    fn translate_address(&self, addr: u64) -> Option<u64>;
}

pub trait DeviceTree {
    /// Visit every node, depth first.
    fn for_each_node(&self, f: &mut dyn FnMut(&dyn TreeNode));
}

/// Read a big-endian number spanning `cells`. Anything above 64 bits is
/// dropped.
pub fn read_number(cells: &[u8]) -> u64 {
    cells
        .chunks_exact(4)
        .fold(0u64, |acc, c| (acc << 32) | u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as u64)
}

/// A mapped block along with where it came from.
pub struct MappedBlock {
    pub block: PresentationBlock,
    pub phys: u64,
    pub size: u64,
    pub server: u32,
}

/// Presentation blocks indexed by logical CPU.
pub struct IcpTable<const N: usize> {
    blocks: [Option<MappedBlock>; N],
}

impl<const N: usize> IcpTable<N> {
    pub fn new() -> Self {
        Self {
            blocks: core::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, cpu: usize) -> Option<&PresentationBlock> {
        self.entry(cpu).map(|m| &m.block)
    }

    pub fn entry(&self, cpu: usize) -> Option<&MappedBlock> {
        self.blocks.get(cpu)?.as_ref()
    }

    /// Number of CPUs with a block.
    pub fn mapped(&self) -> usize {
        self.blocks.iter().flatten().count()
    }

    fn insert(&mut self, cpu: usize, block: MappedBlock) {
        self.blocks[cpu] = Some(block);
    }

    /// Give every reserved range back to `mapper`.
    fn release<M: MmioMapper + ?Sized>(self, mapper: &M) {
        for m in self.blocks.into_iter().flatten() {
            mapper.release_region(m.phys, m.size);
        }
    }
}

impl<const N: usize> Default for IcpTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

struct Discovery<'a, C: ?Sized, M: ?Sized, const N: usize> {
    cpus: &'a C,
    mapper: &'a M,
    table: IcpTable<N>,
}

impl<'a, C, M, const N: usize> Discovery<'a, C, M, N>
where
    C: CpuTopology + ?Sized,
    M: MmioMapper + ?Sized,
{
    /// Returns whether the node contributed to the controller.
    fn init_one_node(&mut self, node: &dyn TreeNode) -> bool {
        let before = self.table.mapped();

        match self.map_node(node) {
            Ok(()) => true,
            Err(err) => {
                error!("icp_native: {}: {}", node.name(), err);
                self.table.mapped() > before
            }
        }
    }

    fn map_node(&mut self, node: &dyn TreeNode) -> Result<(), NodeError> {
        // Interrupt server number of the next `reg` tuple.
        let mut server = 0u32;
        let mut servers = 0u32;

        match node.property(SERVER_RANGES) {
            Some(ranges) => {
                if ranges.len() != 8 {
                    warn!(
                        "icp_native: {}: {} is {} bytes, expected 8",
                        node.name(),
                        SERVER_RANGES,
                        ranges.len()
                    );
                }

                if ranges.len() >= 4 {
                    server = read_number(&ranges[0..4]) as u32;
                }
                if ranges.len() >= 8 {
                    servers = read_number(&ranges[4..8]) as u32;
                }
            }

            None => warn!("icp_native: {}: no {}", node.name(), SERVER_RANGES),
        }

        let reg = node.property("reg").ok_or(NodeError::MissingReg)?;
        let addr_len = node.address_cells() * 4;
        let tuple_size = addr_len + node.size_cells() * 4;

        if tuple_size == 0
            || reg.len() % tuple_size != 0
            || (servers != 0 && servers as usize != reg.len() / tuple_size)
        {
            return Err(NodeError::RegLength {
                len: reg.len(),
                tuple_size,
                servers,
            });
        }

        for tuple in reg.chunks_exact(tuple_size) {
            let (addr, size) = tuple.split_at(addr_len);

            let phys = node
                .translate_address(read_number(addr))
                .ok_or(NodeError::Translate { server })?;

            self.map_one_cpu(server, phys, read_number(size));
            server = server.wrapping_add(1);
        }

        Ok(())
    }

    fn map_one_cpu(&mut self, server: u32, phys: u64, size: u64) {
        let cpus = self.cpus;
        let cpu = match (0..N)
            .find(|&cpu| cpus.is_present(cpu) && cpus.hard_smp_processor_id(cpu) == server)
        {
            Some(cpu) => cpu,
            // Normal: some trees list far more servers than there are CPUs.
            None => return,
        };

        if self.table.get(cpu).is_some() {
            warn!(
                "icp_native: CPU {} already has a presentation block, ignoring server #{:#x}",
                cpu, server
            );
            return;
        }

        if size < BLOCK_SIZE as u64 {
            warn!(
                "icp_native: ICP MMIO for CPU {}, interrupt server #{:#x} is only {:#x} bytes",
                cpu, server, size
            );
            return;
        }

        if phys % 4 != 0 {
            warn!(
                "icp_native: ICP MMIO for CPU {}, interrupt server #{:#x} is misaligned ({:#x})",
                cpu, server, phys
            );
            return;
        }

        let owner = RegionOwner { cpu, server };
        if let Err(err) = self.mapper.request_region(phys, size, owner) {
            warn!(
                "icp_native: Could not reserve ICP MMIO for CPU {}, interrupt server #{:#x}: {}",
                cpu, server, err
            );
            return;
        }

        let mmio = match self.mapper.ioremap(phys, size) {
            Some(mmio) => mmio,
            None => {
                warn!(
                    "icp_native: Failed ioremap for CPU {}, interrupt server #{:#x}, addr {:#x}",
                    cpu, server, phys
                );
                self.mapper.release_region(phys, size);
                return;
            }
        };

        if mmio.as_ptr() as usize % 4 != 0 {
            warn!(
                "icp_native: ioremap for CPU {}, interrupt server #{:#x} returned misaligned {:p}",
                cpu, server, mmio
            );
            self.mapper.release_region(phys, size);
            return;
        }

        debug!(
            "icp_native: CPU {} (server #{:#x}) presentation block at {:#x}",
            cpu, server, phys
        );

        self.table.insert(
            cpu,
            MappedBlock {
                // SAFETY: `ioremap` hands back a permanent mapping of the whole range,
                // which we just checked is large enough and 4-byte aligned.
                block: unsafe { PresentationBlock::new(mmio) },
                phys,
                size,
                server,
            },
        );
    }
}

/// Find and map every CPU's presentation block.
///
/// Nodes compatible with [XICP_COMPATIBLE] are tried first; nodes of type
/// [XICP_DEVICE_TYPE] only if none of those worked.
pub fn discover<T, C, M, const N: usize>(
    tree: &T,
    cpus: &C,
    mapper: &M,
) -> Result<IcpTable<N>, IcpError>
where
    T: DeviceTree + ?Sized,
    C: CpuTopology + ?Sized,
    M: MmioMapper + ?Sized,
{
    let mut d = Discovery::<C, M, N> {
        cpus,
        mapper,
        table: IcpTable::new(),
    };
    let mut found = false;

    tree.for_each_node(&mut |node: &dyn TreeNode| {
        if node.is_compatible(XICP_COMPATIBLE) {
            found |= d.init_one_node(node);
        }
    });

    if !found {
        tree.for_each_node(&mut |node: &dyn TreeNode| {
            if node.device_type() == Some(XICP_DEVICE_TYPE) {
                found |= d.init_one_node(node);
            }
        });
    }

    if !found {
        return Err(IcpError::NoController);
    }

    let boot = cpus.boot_cpu();
    if d.table.get(boot).is_none() {
        error!("icp_native: boot CPU {} has no presentation block", boot);
        d.table.release(mapper);
        return Err(IcpError::BootCpuUnmapped { cpu: boot });
    }

    Ok(d.table)
}
