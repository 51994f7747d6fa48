//! # Boot Handoff for the Physical Memory Manager

/// Raw location of the firmware memory map as captured by the loader
/// right before `ExitBootServices`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryMapInfo {
    /// Pointer to the raw UEFI memory map buffer (array of `EFI_MEMORY_DESCRIPTOR` bytes).
    pub mmap_ptr: u64,

    /// Length of the memory map buffer in **bytes**.
    pub mmap_len: u64,

    /// Size of a single memory descriptor in bytes. Firmware may report a
    /// stride larger than the descriptor structure; always step by this value.
    pub mmap_desc_size: u64,

    /// Descriptor version (from UEFI).
    pub mmap_desc_version: u32,
}

impl MemoryMapInfo {
    /// Number of descriptors in the buffer, or `0` if the stride is unset.
    #[must_use]
    pub const fn descriptor_count(&self) -> u64 {
        if self.mmap_desc_size == 0 {
            0
        } else {
            self.mmap_len / self.mmap_desc_size
        }
    }
}

/// A page run the loader placed in `LOADER_DATA` memory that must survive
/// into the kernel: boot pools, the PMM pool itself, pre-loaded modules.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootBlock {
    /// Physical base address, page aligned.
    pub base: u64,

    /// Length in 4 KiB pages.
    pub pages: u64,
}

impl BootBlock {
    #[inline]
    #[must_use]
    pub const fn new(base: u64, pages: u64) -> Self {
        Self { base, pages }
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.pages.saturating_mul(crate::memory::PAGE_SIZE))
    }
}

/// The memory region the loader set aside for the PMM's descriptor pool.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PmmRegion {
    /// Physical (identity mapped) base of the region.
    pub base: u64,

    /// Length of the region in bytes.
    pub len: u64,
}
