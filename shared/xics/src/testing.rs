//! Host-side stand-ins for the hardware and the rest of the kernel.

use core::{cell::UnsafeCell, ptr::NonNull};
use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::{
    error::MapError,
    icp::NativeIcp,
    ipi::IpiMessage,
    platform::{CpuTopology, Irq, IrqHost, MessageSink, MmioMapper, RegionOwner},
    regs::{PresentationBlock, Xirr},
    resource::RegionTable,
    topology::{DeviceTree, TreeNode, SERVER_RANGES, XICP_COMPATIBLE},
};

/// A page of memory standing in for one presentation block.
#[repr(C, align(4096))]
pub struct FakeRegs {
    mem: UnsafeCell<[u8; 0x1000]>,
}

// SAFETY: Tests only touch a given block from one thread at a time.
unsafe impl Sync for FakeRegs {}

impl FakeRegs {
    pub fn leak() -> &'static Self {
        Box::leak(Box::new(Self {
            mem: UnsafeCell::new([0; 0x1000]),
        }))
    }

    pub fn ptr(&self) -> NonNull<u8> {
        // SAFETY: Derived from a reference, so never null.
        unsafe { NonNull::new_unchecked(self.mem.get() as *mut u8) }
    }

    pub fn block(&'static self) -> PresentationBlock {
        // SAFETY: The page is leaked and far larger than a block.
        unsafe { PresentationBlock::new(self.ptr()) }
    }

    pub fn bytes(&self, off: usize, len: usize) -> Vec<u8> {
        (off..off + len)
            // SAFETY: In bounds of the page.
            .map(|i| unsafe { self.ptr().as_ptr().add(i).read_volatile() })
            .collect()
    }

    fn write_be(&self, off: usize, val: u32) {
        for (i, b) in val.to_be_bytes().into_iter().enumerate() {
            // SAFETY: In bounds of the page.
            unsafe { self.ptr().as_ptr().add(off + i).write_volatile(b) };
        }
    }

    fn read_be(&self, off: usize) -> u32 {
        let b = self.bytes(off, 4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Make `xirr` the next value a claim reads.
    pub fn present(&self, xirr: Xirr) {
        self.write_be(0x04, xirr.0);
    }

    pub fn present_poll(&self, xirr: Xirr) {
        self.write_be(0x00, xirr.0);
    }

    /// Last value written to `xirr`.
    pub fn xirr(&self) -> Xirr {
        Xirr(self.read_be(0x04))
    }

    pub fn qirr(&self) -> u8 {
        self.bytes(0x0C, 1)[0]
    }
}

thread_local! {
    static CURRENT_CPU: Cell<usize> = Cell::new(0);
}

/// Pretend the calling test thread runs on `cpu`.
pub fn set_current_cpu(cpu: usize) {
    CURRENT_CPU.with(|c| c.set(cpu));
}

type RecvHook = Box<dyn FnMut(usize, IpiMessage) + Send>;

pub struct FakePlatform {
    hard_ids: Vec<u32>,
    absent: Vec<usize>,
    offline: Vec<usize>,
    mappings: Mutex<Vec<(u32, Irq)>>,
    masked: Mutex<Vec<u32>>,
    received: Mutex<Vec<(usize, IpiMessage)>>,
    hook: Mutex<Option<RecvHook>>,
}

impl FakePlatform {
    /// `cpus` CPUs, all present and online, hardware ids equal to their index.
    pub fn new(cpus: usize) -> Self {
        Self {
            hard_ids: (0..cpus as u32).collect(),
            absent: Vec::new(),
            offline: Vec::new(),
            mappings: Mutex::new(Vec::new()),
            masked: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn with_hard_ids(mut self, ids: &[u32]) -> Self {
        self.hard_ids[..ids.len()].copy_from_slice(ids);
        self
    }

    pub fn absent(mut self, cpu: usize) -> Self {
        self.absent.push(cpu);
        self
    }

    pub fn offline(mut self, cpu: usize) -> Self {
        self.offline.push(cpu);
        self
    }

    pub fn map(&self, hwirq: u32, irq: Irq) {
        self.mappings.lock().unwrap().push((hwirq, irq));
    }

    pub fn masked(&self) -> Vec<u32> {
        self.masked.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<(usize, IpiMessage)> {
        self.received.lock().unwrap().clone()
    }

    /// Run `hook` after every received message is recorded.
    pub fn on_recv(&self, hook: impl FnMut(usize, IpiMessage) + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }
}

impl CpuTopology for FakePlatform {
    fn current_cpu(&self) -> usize {
        CURRENT_CPU.with(|c| c.get())
    }

    fn boot_cpu(&self) -> usize {
        0
    }

    fn is_present(&self, cpu: usize) -> bool {
        cpu < self.hard_ids.len() && !self.absent.contains(&cpu)
    }

    fn is_online(&self, cpu: usize) -> bool {
        self.is_present(cpu) && !self.offline.contains(&cpu)
    }

    fn hard_smp_processor_id(&self, cpu: usize) -> u32 {
        self.hard_ids.get(cpu).copied().unwrap_or(u32::MAX)
    }
}

impl IrqHost for FakePlatform {
    fn find_mapping(&self, hwirq: u32) -> Option<Irq> {
        let mappings = self.mappings.lock().unwrap();
        mappings.iter().find(|m| m.0 == hwirq).map(|m| m.1)
    }

    fn hwirq(&self, irq: Irq) -> Option<u32> {
        let mappings = self.mappings.lock().unwrap();
        mappings.iter().find(|m| m.1 == irq).map(|m| m.0)
    }

    fn mask_unknown_vec(&self, hwirq: u32) {
        self.masked.lock().unwrap().push(hwirq);
    }
}

impl MessageSink for FakePlatform {
    fn message_recv(&self, cpu: usize, msg: IpiMessage) {
        self.received.lock().unwrap().push((cpu, msg));

        if let Some(hook) = self.hook.lock().unwrap().as_mut() {
            hook(cpu, msg);
        }
    }
}

/// Encode `value` as `cells` big-endian 32-bit cells.
fn encode_cells(value: u64, cells: usize, out: &mut Vec<u8>) {
    for i in (0..cells).rev() {
        let cell = if i < 2 { (value >> (32 * i)) as u32 } else { 0 };
        out.extend_from_slice(&cell.to_be_bytes());
    }
}

pub struct FakeNode {
    name: String,
    compatible: Vec<String>,
    device_type: Option<String>,
    props: Vec<(String, Vec<u8>)>,
    address_cells: usize,
    size_cells: usize,
    offset: u64,
    untranslatable: Vec<u64>,
}

impl FakeNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compatible: Vec::new(),
            device_type: None,
            props: Vec::new(),
            address_cells: 2,
            size_cells: 1,
            offset: 0,
            untranslatable: Vec::new(),
        }
    }

    pub fn compatible(mut self, compat: &str) -> Self {
        self.compatible.push(compat.to_string());
        self
    }

    pub fn device_type(mut self, ty: &str) -> Self {
        self.device_type = Some(ty.to_string());
        self
    }

    pub fn raw_prop(mut self, name: &str, value: &[u8]) -> Self {
        self.props.retain(|p| p.0 != name);
        self.props.push((name.to_string(), value.to_vec()));
        self
    }

    pub fn server_ranges(self, start: u32, count: u32) -> Self {
        let mut value = Vec::new();
        value.extend_from_slice(&start.to_be_bytes());
        value.extend_from_slice(&count.to_be_bytes());
        self.raw_prop(SERVER_RANGES, &value)
    }

    /// `reg` from `(address, size)` tuples, in the node's current cell widths.
    pub fn reg(self, tuples: &[(u64, u64)]) -> Self {
        let mut value = Vec::new();
        for &(addr, size) in tuples {
            encode_cells(addr, self.address_cells, &mut value);
            encode_cells(size, self.size_cells, &mut value);
        }
        self.raw_prop("reg", &value)
    }

    pub fn cells(mut self, address_cells: usize, size_cells: usize) -> Self {
        self.address_cells = address_cells;
        self.size_cells = size_cells;
        self
    }

    /// The parent bus sits at `offset` in the CPU physical address space.
    pub fn translate_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn untranslatable(mut self, addr: u64) -> Self {
        self.untranslatable.push(addr);
        self
    }
}

impl TreeNode for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_compatible(&self, compat: &str) -> bool {
        self.compatible.iter().any(|c| c == compat)
    }

    fn device_type(&self) -> Option<&str> {
        self.device_type.as_deref()
    }

    fn property(&self, name: &str) -> Option<&[u8]> {
        self.props
            .iter()
            .find(|p| p.0 == name)
            .map(|p| p.1.as_slice())
    }

    fn address_cells(&self) -> usize {
        self.address_cells
    }

    fn size_cells(&self) -> usize {
        self.size_cells
    }

    fn translate_address(&self, addr: u64) -> Option<u64> {
        if self.untranslatable.contains(&addr) {
            return None;
        }

        addr.checked_add(self.offset)
    }
}

pub struct FakeTree {
    nodes: Vec<FakeNode>,
}

impl FakeTree {
    pub fn new(nodes: Vec<FakeNode>) -> Self {
        Self { nodes }
    }
}

impl DeviceTree for FakeTree {
    fn for_each_node(&self, f: &mut dyn FnMut(&dyn TreeNode)) {
        for node in &self.nodes {
            f(node);
        }
    }
}

/// Hands out a fresh [FakeRegs] page for every physical block mapped.
pub struct FakeMapper {
    regions: RegionTable<64>,
    pages: Mutex<Vec<(u64, &'static FakeRegs)>>,
    failing: Vec<u64>,
    misaligned: Vec<u64>,
    mapped: AtomicUsize,
}

impl FakeMapper {
    pub fn new() -> Self {
        Self {
            regions: RegionTable::new(),
            pages: Mutex::new(Vec::new()),
            failing: Vec::new(),
            misaligned: Vec::new(),
            mapped: AtomicUsize::new(0),
        }
    }

    /// Make `ioremap` of `phys` fail.
    pub fn fail_map(mut self, phys: u64) -> Self {
        self.failing.push(phys);
        self
    }

    /// Make `ioremap` of `phys` return a pointer off by one byte.
    pub fn misalign(mut self, phys: u64) -> Self {
        self.misaligned.push(phys);
        self
    }

    /// Reserve a range on behalf of some other driver.
    pub fn occupy(&self, base: u64, size: u64) {
        let owner = RegionOwner {
            cpu: usize::MAX,
            server: u32::MAX,
        };
        self.regions.request(base, size, owner).unwrap();
    }

    pub fn regs_at(&self, phys: u64) -> Option<&'static FakeRegs> {
        let pages = self.pages.lock().unwrap();
        pages.iter().find(|p| p.0 == phys).map(|p| p.1)
    }

    pub fn mapped_count(&self) -> usize {
        self.mapped.load(Ordering::Relaxed)
    }

    pub fn reserved_count(&self) -> usize {
        self.regions.reserved()
    }
}

impl MmioMapper for FakeMapper {
    fn request_region(&self, base: u64, size: u64, owner: RegionOwner) -> Result<(), MapError> {
        self.regions.request(base, size, owner)
    }

    fn release_region(&self, base: u64, size: u64) {
        self.regions.release(base, size)
    }

    fn ioremap(&self, base: u64, _size: u64) -> Option<NonNull<u8>> {
        if self.failing.contains(&base) {
            return None;
        }

        let regs = FakeRegs::leak();
        self.pages.lock().unwrap().push((base, regs));
        self.mapped.fetch_add(1, Ordering::Relaxed);

        if self.misaligned.contains(&base) {
            // SAFETY: Still inside the page.
            return Some(unsafe { NonNull::new_unchecked(regs.ptr().as_ptr().add(1)) });
        }

        Some(regs.ptr())
    }
}

/// Physical address of the fake block for interrupt server `server`.
pub fn block_phys(server: u32) -> u64 {
    0x3FE_0000_0000 + server as u64 * 0x1000
}

/// A single `ibm,ppc-xicp` node covering servers `0..servers`.
pub fn xicp_node(servers: u32) -> FakeNode {
    let tuples: Vec<_> = (0..servers).map(|s| (block_phys(s), 0x1000)).collect();

    FakeNode::new("interrupt-controller")
        .compatible(XICP_COMPATIBLE)
        .server_ranges(0, servers)
        .reg(&tuples)
}

/// Probe a leaked driver on `platform` with blocks for the first `mapped`
/// CPUs. Returns the driver along with each mapped CPU's registers.
pub fn icp_on<const N: usize>(
    platform: FakePlatform,
    mapped: usize,
) -> (&'static NativeIcp<FakePlatform, N>, Vec<&'static FakeRegs>) {
    let tree = FakeTree::new(vec![xicp_node(mapped as u32)]);
    let mapper = FakeMapper::new();

    let icp = NativeIcp::<FakePlatform, N>::probe(&tree, &mapper, platform).unwrap();
    let regs = (0..mapped as u32)
        .map(|s| mapper.regs_at(block_phys(s)).unwrap())
        .collect();

    (Box::leak(Box::new(icp)), regs)
}

/// [icp_on] with `N` plain CPUs.
pub fn icp_with_cpus<const N: usize>(
    mapped: usize,
) -> (&'static NativeIcp<FakePlatform, N>, Vec<&'static FakeRegs>) {
    icp_on(FakePlatform::new(N), mapped)
}
