//! # Physical Memory Configuration

/// Base-2 logarithm of the page size handled by the boot PMM.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a single 4 KiB page frame in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Number of buddy orders. Order `k` tracks blocks of exactly `2^k` pages,
/// so the largest block spans `2^51` pages (8 EiB).
pub const BUDDY_ORDERS: usize = 52;

/// Highest buddy order.
pub const MAX_ORDER: usize = BUDDY_ORDERS - 1;

/// Conventional memory below this physical address is never handed out.
///
/// The region is recorded as "lowest memory" in the reserved tree so the
/// kernel can later decide what to do with the real-mode area.
pub const LOW_MEMORY_LIMIT: u64 = 0x0010_0000; // 1 MiB

/// Number of block descriptors the boot PMM pool is built with.
pub const PMM_POOL_CAPACITY: u16 = 8192;

/// Smallest accepted pool capacity.
pub const PMM_POOL_CAPACITY_MIN: u16 = 1000;

/// Largest accepted pool capacity; roughly what fits into the 1 MiB block
/// the loader pre-allocates for the PMM.
pub const PMM_POOL_CAPACITY_MAX: u16 = 21760;

/// Free descriptors that must remain before an allocation is attempted.
///
/// Splitting a single order-51 block down to order 8 consumes 43 descriptors,
/// plus one for the used record and up to 43 for the re-freed remainder.
pub const PMM_POOL_RESERVED: usize = 90;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(LOW_MEMORY_LIMIT.is_multiple_of(PAGE_SIZE));
    assert!(PMM_POOL_CAPACITY >= PMM_POOL_CAPACITY_MIN);
    assert!(PMM_POOL_CAPACITY <= PMM_POOL_CAPACITY_MAX);
    assert!(PMM_POOL_RESERVED < PMM_POOL_CAPACITY_MIN as usize);
    assert!(MAX_ORDER as u32 + PAGE_SHIFT < u64::BITS);
};
