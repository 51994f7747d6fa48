//! # Memory Map Ingestion
//!
//! Builds a [`BootMemoryManager`] from the firmware memory map captured by the
//! loader.
//!
//! Every descriptor is classified by its UEFI type:
//!
//! * usable memory is handed to the buddy allocator, except for the part
//!   below the low-memory limit, which is recorded as
//!   [`MemoryKind::LowestMemory`],
//! * loader data is scanned for preserved [`BootBlock`]s; these become
//!   allocation records, the gaps between them become free memory,
//! * everything else is recorded in the reserved tree with its kind.
//!
//! Adjacent lowest-memory runs are coalesced afterwards, followed by one
//! merge pass over all buddy orders.

use crate::address::pages_to_bytes;
use crate::buddy::BuddyError;
use crate::frame::{MemoryKind, PageFrame};
use crate::interval::compare;
use crate::manager::{BootMemoryManager, PmmConfig};
use crate::pool::{Arena, PoolError, SlotPool};
use crate::tree::{InsertError, RbTree};
use core::marker::PhantomData;
use core::mem::size_of;
use kernel_info::boot::{BootBlock, MemoryMapInfo, PmmRegion};
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE, PMM_POOL_CAPACITY_MAX, PMM_POOL_CAPACITY_MIN};
use uefi::mem::memory_map::{MemoryDescriptor, MemoryType};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("descriptor pool: {0}")]
    Pool(#[from] PoolError),
    #[error("pool capacity {capacity} is outside {min}..={max}")]
    CapacityOutOfRange { capacity: u16, min: u16, max: u16 },
    #[error("pool holds {available} descriptors but {required} are needed")]
    PoolTooSmall { required: usize, available: usize },
    #[error("memory map is malformed")]
    InvalidMemoryMap,
    #[error("overlapping memory map entry: {0}")]
    Overlap(#[from] InsertError),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
}

/// A firmware memory map entry reduced to what the PMM needs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub ty: MemoryType,
    pub base: u64,
    pub pages: u64,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(ty: MemoryType, base: u64, pages: u64) -> Self {
        Self { ty, base, pages }
    }

    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        classify(self.ty)
    }

    /// Exclusive end address, saturating at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(pages_to_bytes(self.pages))
    }
}

impl From<&MemoryDescriptor> for MemoryRegion {
    fn from(desc: &MemoryDescriptor) -> Self {
        Self::new(desc.ty, desc.phys_start, desc.page_count)
    }
}

impl From<MemoryDescriptor> for MemoryRegion {
    fn from(desc: MemoryDescriptor) -> Self {
        Self::from(&desc)
    }
}

/// Maps a UEFI memory type to the kind the PMM tracks it as.
#[must_use]
pub const fn classify(ty: MemoryType) -> MemoryKind {
    match ty {
        MemoryType::LOADER_CODE
        | MemoryType::BOOT_SERVICES_CODE
        | MemoryType::BOOT_SERVICES_DATA
        | MemoryType::CONVENTIONAL => MemoryKind::Available,
        MemoryType::LOADER_DATA => MemoryKind::LoaderData,
        MemoryType::RUNTIME_SERVICES_CODE => MemoryKind::FirmwareCode,
        MemoryType::RUNTIME_SERVICES_DATA => MemoryKind::FirmwareData,
        MemoryType::ACPI_RECLAIM => MemoryKind::AcpiTable,
        MemoryType::ACPI_NON_VOLATILE => MemoryKind::AcpiNvs,
        MemoryType::MMIO | MemoryType::MMIO_PORT_SPACE => MemoryKind::Mmio,
        _ => MemoryKind::AosReserved,
    }
}

/// Iterator over a raw UEFI memory map buffer.
///
/// Steps by the firmware-reported descriptor size, which may exceed
/// `size_of::<MemoryDescriptor>()`.
pub struct RawRegions<'m> {
    cursor: *const u8,
    stride: usize,
    remaining: usize,
    _map: PhantomData<&'m [u8]>,
}

impl Iterator for RawRegions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        if self.remaining == 0 {
            return None;
        }

        // SAFETY: `regions_from_raw` checked that `remaining` descriptors of
        // `stride` bytes each lie within the map buffer.
        let desc = unsafe { self.cursor.cast::<MemoryDescriptor>().read_unaligned() };
        self.remaining -= 1;
        if self.remaining > 0 {
            // SAFETY: see above; the next descriptor is still inside the buffer.
            self.cursor = unsafe { self.cursor.add(self.stride) };
        }
        Some(MemoryRegion::from(&desc))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RawRegions<'_> {}

/// Walks the memory map described by `info`.
///
/// # Errors
/// [`InitError::InvalidMemoryMap`] for a null buffer or a descriptor size
/// smaller than [`MemoryDescriptor`].
///
/// # Safety
/// `info.mmap_ptr` must point to `info.mmap_len` readable bytes, whose
/// provenance was exposed, that stay valid and unmodified for `'m`.
pub unsafe fn regions_from_raw<'m>(info: &MemoryMapInfo) -> Result<RawRegions<'m>, InitError> {
    let addr = usize::try_from(info.mmap_ptr).map_err(|_| InitError::InvalidMemoryMap)?;
    let stride = usize::try_from(info.mmap_desc_size).map_err(|_| InitError::InvalidMemoryMap)?;
    let count = usize::try_from(info.descriptor_count()).map_err(|_| InitError::InvalidMemoryMap)?;

    if addr == 0 || stride < size_of::<MemoryDescriptor>() {
        log::error!(
            "invalid memory map: ptr={:#x} desc_size={}",
            info.mmap_ptr,
            info.mmap_desc_size
        );
        return Err(InitError::InvalidMemoryMap);
    }

    Ok(RawRegions {
        cursor: core::ptr::with_exposed_provenance(addr),
        stride,
        remaining: count,
        _map: PhantomData,
    })
}

impl<'a> BootMemoryManager<'a> {
    /// Builds a manager from a memory map.
    ///
    /// `preserved` lists the loader-data runs that must survive into the
    /// kernel; it is sorted in place. Each run is clipped to the
    /// `LOADER_DATA` entries it intersects; parts outside every such entry
    /// are not preserved.
    ///
    /// # Errors
    /// * [`InitError::PoolTooSmall`] if the arena cannot hold the configured
    ///   reserve.
    /// * [`InitError::Overlap`] and [`InitError::Buddy`] if the map contains
    ///   overlapping entries or the arena runs out during ingestion.
    pub fn init<I>(
        arena: Arena<'a>,
        regions: I,
        preserved: &mut [BootBlock],
        config: PmmConfig,
    ) -> Result<Self, InitError>
    where
        I: IntoIterator<Item = MemoryRegion>,
    {
        if arena.capacity() <= config.reserve {
            log::error!(
                "PMM pool of {} descriptors cannot hold the reserve of {}",
                arena.capacity(),
                config.reserve
            );
            return Err(InitError::PoolTooSmall {
                required: config.reserve + 1,
                available: arena.capacity(),
            });
        }

        preserved.sort_unstable_by_key(|b| b.base);

        let mut pmm = Self::new(arena, config);
        for region in regions {
            if let Err(e) = pmm.ingest(region, preserved) {
                log::error!(
                    "PMM ingestion failed at {:#x}+{:#x} ({:?}): {e}",
                    region.base,
                    region.pages,
                    region.ty
                );
                return Err(e);
            }
        }

        pmm.coalesce_lowest_memory();
        pmm.merge_all();

        log::info!(
            "PMM ready: {} pages ingested, {} free, {} preserved, {} reserved, {}/{} descriptors",
            pmm.ingested_pages(),
            pmm.free_pages(),
            pmm.allocated_pages(),
            pmm.reserved_pages(),
            pmm.arena().available(),
            pmm.arena().capacity()
        );
        Ok(pmm)
    }

    /// Builds a manager directly from the loader handoff.
    ///
    /// The descriptor pool is carved from `region`, sized by
    /// [`PmmConfig::pool_capacity`].
    ///
    /// # Errors
    /// See [`BootMemoryManager::init`]; additionally fails if the configured
    /// capacity is out of range, the region is too small, or the memory map
    /// is malformed.
    ///
    /// # Safety
    /// `region` must be identity mapped, writable, and exclusively owned by
    /// the manager for `'a`. The memory map described by `mmap` must be
    /// readable for the duration of the call. Both addresses must carry
    /// exposed provenance.
    pub unsafe fn init_from_boot(
        region: PmmRegion,
        mmap: &MemoryMapInfo,
        preserved: &mut [BootBlock],
        config: PmmConfig,
    ) -> Result<Self, InitError> {
        let capacity = config.pool_capacity;
        if !(PMM_POOL_CAPACITY_MIN..=PMM_POOL_CAPACITY_MAX).contains(&capacity) {
            log::error!("PMM pool capacity {capacity} out of range");
            return Err(InitError::CapacityOutOfRange {
                capacity,
                min: PMM_POOL_CAPACITY_MIN,
                max: PMM_POOL_CAPACITY_MAX,
            });
        }

        let base = usize::try_from(region.base).map_err(|_| InitError::InvalidMemoryMap)?;
        let len = usize::try_from(region.len).map_err(|_| InitError::InvalidMemoryMap)?;

        let start = core::ptr::with_exposed_provenance_mut(base);
        // SAFETY: the caller hands the region over exclusively for `'a`.
        let pool = unsafe { SlotPool::from_raw_region(start, len, capacity) }
            .inspect_err(|e| log::error!("PMM pool at {:#x}: {e}", region.base))?;

        // SAFETY: forwarded from the caller.
        let regions = unsafe { regions_from_raw(mmap)? };
        Self::init(Arena::new(pool), regions, preserved, config)
    }

    fn ingest(&mut self, region: MemoryRegion, preserved: &[BootBlock]) -> Result<(), InitError> {
        if region.pages == 0 {
            return Ok(());
        }
        self.ensure_untracked(region.base, region.pages)?;

        match region.kind() {
            MemoryKind::Available => self.ingest_free(region.base, region.pages),
            MemoryKind::LoaderData => self.ingest_loader_data(region, preserved),
            kind => Ok(self.add_reserved(region.base, region.pages, kind)?),
        }
    }

    /// Frees a usable run, reserving the part below the low-memory limit.
    fn ingest_free(&mut self, base: u64, pages: u64) -> Result<(), InitError> {
        let limit = self.config.low_memory_limit;
        let low = if base < limit {
            (limit - base).div_ceil(PAGE_SIZE).min(pages)
        } else {
            0
        };

        if low > 0 {
            self.add_reserved(base, low, MemoryKind::LowestMemory)?;
        }
        if pages > low {
            self.add_free(base + pages_to_bytes(low), pages - low)?;
        }
        Ok(())
    }

    /// Splits a loader data entry into preserved and reclaimable runs.
    ///
    /// Preserved blocks are clipped to the entry and to the end of the
    /// previous block, so a block spanning several entries is preserved
    /// piecewise.
    fn ingest_loader_data(
        &mut self,
        region: MemoryRegion,
        preserved: &[BootBlock],
    ) -> Result<(), InitError> {
        let end = region.end();
        let mut cursor = region.base;

        for block in preserved.iter().filter(|b| b.pages > 0) {
            let start = block.base.max(cursor);
            let stop = block.end().min(end);
            if start >= stop {
                continue;
            }
            if start != block.base || stop != block.end() {
                log::debug!(
                    "preserved block {:#x}+{:#x} clipped to {start:#x}..{stop:#x}",
                    block.base,
                    block.pages
                );
            }

            if start > cursor {
                self.ingest_free(cursor, (start - cursor) >> PAGE_SHIFT)?;
            }
            self.preserve(start, (stop - start) >> PAGE_SHIFT)?;
            cursor = stop;
        }

        if end > cursor {
            self.ingest_free(cursor, (end - cursor) >> PAGE_SHIFT)?;
        }
        Ok(())
    }

    /// Records a preserved loader run as allocated.
    fn preserve(&mut self, base: u64, pages: u64) -> Result<(), InitError> {
        self.ensure_untracked(base, pages)?;
        let node = self
            .arena
            .alloc_frame(PageFrame::new(base, pages, MemoryKind::LoaderData, 0))
            .ok_or(BuddyError::ArenaExhausted)?;
        if let Err(e) = self.allocated.insert(&mut self.arena, node, compare) {
            self.arena.free(node);
            return Err(e.into());
        }
        self.ingested_pages += pages;
        log::trace!("PMM preserved loader run {base:#x}+{pages:#x}");
        Ok(())
    }

    /// Joins touching lowest-memory runs into one reserved entry.
    fn coalesce_lowest_memory(&mut self) {
        let mut cursor = self.reserved.first(&self.arena);
        while let Some(head) = cursor {
            let Some(next) = RbTree::next(&self.arena, head) else {
                break;
            };
            let (Some(h), Some(n)) = (self.arena.content(head), self.arena.content(next)) else {
                break;
            };

            let joinable = h.kind() == MemoryKind::LowestMemory
                && n.kind() == MemoryKind::LowestMemory
                && h.end() == n.base;
            if !joinable {
                cursor = Some(next);
                continue;
            }

            let pages = n.pages;
            self.reserved.remove(&mut self.arena, next);
            self.arena.free(next);
            if let Some(h) = self.arena.content_mut(head) {
                h.pages += pages;
            }
        }
    }
}
