//! [DeviceTree] over a flattened device tree blob.

use ::fdt::{node::FdtNode, Fdt, FdtError};

use crate::topology::{read_number, DeviceTree, TreeNode};

/// The address space one level of the tree lives in.
struct Bus<'p, 'a> {
    /// `ranges` of the node that owns this bus.
    ranges: Option<&'a [u8]>,
    address_cells: usize,
    size_cells: usize,
    /// The bus the owning node sits on. `None` means CPU physical addresses.
    parent: Option<&'p Bus<'p, 'a>>,
}

impl Bus<'_, '_> {
    fn translate(&self, mut addr: u64) -> Option<u64> {
        let mut bus = self;

        while let Some(parent) = bus.parent {
            match bus.ranges {
                // No `ranges` at all: nothing below is visible to the parent.
                None => return None,
                // Empty `ranges`: identity mapping.
                Some(r) if r.is_empty() => {}
                Some(r) => addr = map_range(r, addr, bus, parent)?,
            }

            bus = parent;
        }

        Some(addr)
    }
}

fn map_range(ranges: &[u8], addr: u64, child: &Bus, parent: &Bus) -> Option<u64> {
    let child_len = child.address_cells * 4;
    let parent_len = parent.address_cells * 4;
    let entry = child_len + parent_len + child.size_cells * 4;
    if entry == 0 {
        return None;
    }

    ranges.chunks_exact(entry).find_map(|e| {
        let (child_base, rest) = e.split_at(child_len);
        let (parent_base, size) = rest.split_at(parent_len);
        let (child_base, parent_base, size) = (
            read_number(child_base),
            read_number(parent_base),
            read_number(size),
        );

        if addr >= child_base && addr - child_base < size {
            Some(parent_base + (addr - child_base))
        } else {
            None
        }
    })
}

fn strings(value: &[u8]) -> impl Iterator<Item = &str> {
    value
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .filter_map(|s| core::str::from_utf8(s).ok())
}

struct Node<'n, 'b, 'a> {
    node: FdtNode<'b, 'a>,
    bus: &'n Bus<'n, 'a>,
}

impl TreeNode for Node<'_, '_, '_> {
    fn name(&self) -> &str {
        self.node.name
    }

    fn is_compatible(&self, compat: &str) -> bool {
        self.property("compatible")
            .map_or(false, |v| strings(v).any(|c| c == compat))
    }

    fn device_type(&self) -> Option<&str> {
        strings(self.property("device_type")?).next()
    }

    fn property(&self, name: &str) -> Option<&[u8]> {
        self.node.property(name).map(|p| p.value)
    }

    fn address_cells(&self) -> usize {
        self.bus.address_cells
    }

    fn size_cells(&self) -> usize {
        self.bus.size_cells
    }

    fn translate_address(&self, addr: u64) -> Option<u64> {
        self.bus.translate(addr)
    }
}

fn walk<'a>(node: FdtNode<'_, 'a>, bus: &Bus<'_, 'a>, f: &mut dyn FnMut(&dyn TreeNode)) {
    f(&Node { node, bus });

    let cells = node.cell_sizes();
    let child_bus = Bus {
        ranges: node.property("ranges").map(|p| p.value),
        address_cells: cells.address_cells,
        size_cells: cells.size_cells,
        parent: Some(bus),
    };

    for child in node.children() {
        walk(child, &child_bus, f);
    }
}

/// A parsed device tree blob.
pub struct FdtTree<'a> {
    fdt: Fdt<'a>,
}

impl<'a> FdtTree<'a> {
    pub fn new(blob: &'a [u8]) -> Result<Self, FdtError> {
        Ok(Self {
            fdt: Fdt::new(blob)?,
        })
    }
}

impl DeviceTree for FdtTree<'_> {
    fn for_each_node(&self, f: &mut dyn FnMut(&dyn TreeNode)) {
        let root = match self.fdt.all_nodes().next() {
            Some(root) => root,
            None => return,
        };

        // Children of the root are addressed with CPU physical addresses.
        let cells = root.cell_sizes();
        let cpu_bus = Bus {
            ranges: None,
            address_cells: cells.address_cells,
            size_cells: cells.size_cells,
            parent: None,
        };

        f(&Node {
            node: root,
            bus: &cpu_bus,
        });
        for child in root.children() {
            walk(child, &cpu_bus, f);
        }
    }
}
