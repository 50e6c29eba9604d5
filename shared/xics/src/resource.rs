//! Physical MMIO range bookkeeping.

use core::ptr::NonNull;
use sync::mutex::SpinMutex;

use crate::{
    error::MapError,
    platform::{MmioMapper, RegionOwner},
};

#[derive(Debug, Clone, Copy)]
struct Region {
    base: u64,
    size: u64,
    owner: RegionOwner,
}

impl Region {
    fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    fn overlaps(&self, base: u64, size: u64) -> bool {
        base < self.end() && self.base < base.saturating_add(size)
    }
}

/// A fixed-capacity table of exclusively owned physical ranges.
pub struct RegionTable<const N: usize> {
    regions: SpinMutex<[Option<Region>; N]>,
}

impl<const N: usize> RegionTable<N> {
    pub const fn new() -> Self {
        Self {
            regions: SpinMutex::new([None; N]),
        }
    }

    /// Reserve `[base, base + size)` for `owner`.
    pub fn request(&self, base: u64, size: u64, owner: RegionOwner) -> Result<(), MapError> {
        self.regions.lock(|regions| {
            if regions.iter().flatten().any(|r| r.overlaps(base, size)) {
                return Err(MapError::Busy);
            }

            let slot = regions
                .iter_mut()
                .find(|r| r.is_none())
                .ok_or(MapError::NoMemory)?;
            *slot = Some(Region { base, size, owner });

            Ok(())
        })
    }

    /// Drop a reservation made with exactly this base and size.
    pub fn release(&self, base: u64, size: u64) {
        self.regions.lock(|regions| {
            for slot in regions.iter_mut() {
                if matches!(slot, Some(r) if r.base == base && r.size == size) {
                    *slot = None;
                }
            }
        })
    }

    /// Number of live reservations.
    pub fn reserved(&self) -> usize {
        self.regions.lock(|regions| regions.iter().flatten().count())
    }

    /// The owner of the reservation containing `addr`, if any.
    pub fn owner_of(&self, addr: u64) -> Option<RegionOwner> {
        self.regions.lock(|regions| {
            regions
                .iter()
                .flatten()
                .find(|r| r.overlaps(addr, 1))
                .map(|r| r.owner)
        })
    }
}

impl<const N: usize> Default for RegionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps physical ranges through a fixed linear window.
///
/// On machines running with translation off, MMIO is reached by setting
/// high address bits (e.g. `0x8000_0000_0000_0000` for cache-inhibited real
/// mode), so "mapping" is just adding that offset.
pub struct LinearMapper<const N: usize> {
    regions: RegionTable<N>,
    offset: u64,
}

impl<const N: usize> LinearMapper<N> {
    pub const fn new(offset: u64) -> Self {
        Self {
            regions: RegionTable::new(),
            offset,
        }
    }

    pub fn regions(&self) -> &RegionTable<N> {
        &self.regions
    }
}

impl<const N: usize> MmioMapper for LinearMapper<N> {
    fn request_region(&self, base: u64, size: u64, owner: RegionOwner) -> Result<(), MapError> {
        self.regions.request(base, size, owner)
    }

    fn release_region(&self, base: u64, size: u64) {
        self.regions.release(base, size)
    }

    fn ioremap(&self, base: u64, _size: u64) -> Option<NonNull<u8>> {
        let va = usize::try_from(base.checked_add(self.offset)?).ok()?;
        NonNull::new(va as *mut u8)
    }
}
