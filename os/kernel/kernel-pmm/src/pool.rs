//! # Bitmap Slot Pools
//!
//! The PMM cannot use a heap: it *is* what a heap would eventually be built
//! on. All of its bookkeeping therefore lives in fixed-size [`PageFrame`]
//! descriptors stored in one or more [`SlotPool`]s. Each pool owns a bitmap
//! (one bit per slot, set = in use) and a contiguous descriptor array.
//!
//! ```text
//!  region base
//!  ┌──────────────────────┬──────────────────────────────────────────┐
//!  │ bitmap (u64 words)   │ PageFrame[capacity]                      │
//!  └──────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Pools are chained in an [`Arena`]; a [`Handle`] names a slot by pool
//! position and slot index. The chain only grows when the caller explicitly
//! hands in another pool.
//!
//! ## Invariants
//! - A slot's bit is set iff the slot was returned by `alloc` and not yet
//!   released by `free`.
//! - The cached free count equals the number of clear bits below capacity.

use crate::frame::PageFrame;
use crate::handle::Handle;
use crate::tree::NodeStore;
use core::mem::{align_of, size_of};

/// Upper bound of pools an [`Arena`] can chain.
pub const MAX_CHAINED_POOLS: usize = 8;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("pool capacity {0} is outside 1..=65535")]
    CapacityOutOfRange(usize),
    #[error("bitmap holds {available} words but {required} are needed")]
    BitmapTooSmall { required: usize, available: usize },
    #[error("region of {available} bytes cannot hold a pool needing {required} bytes")]
    RegionTooSmall { required: usize, available: usize },
    #[error("the arena already chains the maximum number of pools")]
    ChainFull,
}

/// A fixed-capacity, bitmap-managed array of [`PageFrame`] slots.
pub struct SlotPool<'a> {
    bitmap: &'a mut [u64],
    slots: &'a mut [PageFrame],
    free: usize,
}

impl<'a> SlotPool<'a> {
    /// Number of `u64` bitmap words needed to track `capacity` slots.
    #[must_use]
    pub const fn bitmap_words(capacity: usize) -> usize {
        capacity.div_ceil(u64::BITS as usize)
    }

    /// Bytes a raw region must provide for `capacity` slots, excluding
    /// any padding needed to align the region base.
    #[must_use]
    pub const fn region_size(capacity: usize) -> usize {
        Self::bitmap_words(capacity) * size_of::<u64>() + capacity * size_of::<PageFrame>()
    }

    /// Builds a pool over caller-provided storage. Every slot starts free.
    ///
    /// # Errors
    /// Fails if `slots` is empty or longer than 65535 entries, or if
    /// `bitmap` is too short to cover every slot.
    pub fn new(bitmap: &'a mut [u64], slots: &'a mut [PageFrame]) -> Result<Self, PoolError> {
        let capacity = slots.len();
        if capacity == 0 || capacity > usize::from(u16::MAX) {
            return Err(PoolError::CapacityOutOfRange(capacity));
        }

        let required = Self::bitmap_words(capacity);
        if bitmap.len() < required {
            return Err(PoolError::BitmapTooSmall {
                required,
                available: bitmap.len(),
            });
        }

        bitmap.fill(0);
        Ok(Self {
            bitmap: &mut bitmap[..required],
            slots,
            free: capacity,
        })
    }

    /// Carves a pool of `capacity` slots out of a raw memory region.
    ///
    /// The region base is aligned up as needed; the bitmap is placed first,
    /// followed by the descriptor array.
    ///
    /// # Errors
    /// Returns [`PoolError::RegionTooSmall`] if the aligned region cannot hold
    /// the bitmap and all descriptors, and [`PoolError::CapacityOutOfRange`]
    /// for a zero capacity.
    ///
    /// # Safety
    /// `base..base + len` must be valid for writes, exclusively owned by the
    /// returned pool for `'a`, and not accessed through any other pointer.
    pub unsafe fn from_raw_region(
        base: *mut u8,
        len: usize,
        capacity: u16,
    ) -> Result<Self, PoolError> {
        let capacity = usize::from(capacity);
        if capacity == 0 {
            return Err(PoolError::CapacityOutOfRange(capacity));
        }

        let padding = base.align_offset(align_of::<PageFrame>().max(align_of::<u64>()));
        let required = Self::region_size(capacity).saturating_add(padding);
        if padding == usize::MAX || len < required {
            return Err(PoolError::RegionTooSmall {
                required,
                available: len,
            });
        }

        let words = Self::bitmap_words(capacity);

        // SAFETY: the caller guarantees exclusive, writable access to `len`
        // bytes at `base`; `required <= len` was checked above and both
        // pointers are aligned for their element types.
        unsafe {
            let bitmap_ptr = base.add(padding).cast::<u64>();
            let slots_ptr = bitmap_ptr.add(words).cast::<PageFrame>();

            for i in 0..words {
                bitmap_ptr.add(i).write(0);
            }
            for i in 0..capacity {
                slots_ptr.add(i).write(PageFrame::EMPTY);
            }

            let bitmap = core::slice::from_raw_parts_mut(bitmap_ptr, words);
            let slots = core::slice::from_raw_parts_mut(slots_ptr, capacity);
            Self::new(bitmap, slots)
        }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    #[inline]
    #[must_use]
    pub const fn available(&self) -> usize {
        self.free
    }

    /// First-fit allocation of a slot.
    pub fn alloc(&mut self) -> Option<u16> {
        if self.free == 0 {
            return None;
        }

        let capacity = self.capacity();
        for (w, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }

            let bit = (!*word).trailing_zeros();
            let index = w * u64::BITS as usize + bit as usize;
            if index >= capacity {
                return None;
            }

            *word |= 1 << bit;
            self.free -= 1;
            self.slots[index] = PageFrame::EMPTY;
            return u16::try_from(index).ok();
        }

        None
    }

    /// Releases a slot. Out-of-range or already free slots are ignored.
    pub fn free(&mut self, slot: u16) {
        let index = usize::from(slot);
        if index >= self.capacity() {
            return;
        }

        let (word, mask) = Self::locate(index);
        if self.bitmap[word] & mask != 0 {
            self.bitmap[word] &= !mask;
            self.free += 1;
        }
    }

    #[must_use]
    pub fn is_allocated(&self, slot: u16) -> bool {
        let index = usize::from(slot);
        if index >= self.capacity() {
            return false;
        }

        let (word, mask) = Self::locate(index);
        self.bitmap[word] & mask != 0
    }

    /// Contents of an allocated slot.
    #[must_use]
    pub fn get(&self, slot: u16) -> Option<&PageFrame> {
        self.is_allocated(slot).then(|| &self.slots[usize::from(slot)])
    }

    /// Mutable contents of an allocated slot.
    pub fn get_mut(&mut self, slot: u16) -> Option<&mut PageFrame> {
        if self.is_allocated(slot) {
            Some(&mut self.slots[usize::from(slot)])
        } else {
            None
        }
    }

    const fn locate(index: usize) -> (usize, u64) {
        let bits = u64::BITS as usize;
        (index / bits, 1 << (index % bits))
    }
}

/// A chain of [`SlotPool`]s addressed through composite [`Handle`]s.
pub struct Arena<'a> {
    pools: [Option<SlotPool<'a>>; MAX_CHAINED_POOLS],
    len: usize,
}

impl<'a> Arena<'a> {
    #[must_use]
    pub fn new(pool: SlotPool<'a>) -> Self {
        let mut pools = [const { None }; MAX_CHAINED_POOLS];
        pools[0] = Some(pool);
        Self { pools, len: 1 }
    }

    /// Appends another pool to the chain.
    ///
    /// # Errors
    /// Returns [`PoolError::ChainFull`] once [`MAX_CHAINED_POOLS`] pools are chained.
    pub fn chain(&mut self, pool: SlotPool<'a>) -> Result<(), PoolError> {
        let slot = self.pools.get_mut(self.len).ok_or(PoolError::ChainFull)?;
        *slot = Some(pool);
        self.len += 1;
        log::debug!("chained pool #{} into the PMM arena", self.len - 1);
        Ok(())
    }

    /// Number of chained pools.
    #[must_use]
    pub const fn pools(&self) -> usize {
        self.len
    }

    /// Allocates a slot from the first pool with room.
    pub fn alloc(&mut self) -> Option<Handle> {
        self.pools
            .iter_mut()
            .enumerate()
            .filter_map(|(i, pool)| pool.as_mut().map(|pool| (i, pool)))
            .find(|(_, pool)| pool.available() > 0)
            .and_then(|(i, pool)| pool.alloc().map(|slot| Handle::new(i, slot)))
    }

    /// Allocates a slot and initializes it with `frame`, unlinked.
    pub fn alloc_frame(&mut self, frame: PageFrame) -> Option<Handle> {
        let handle = self.alloc()?;
        if let Some(content) = self.content_mut(handle) {
            *content = frame;
        }
        Some(handle)
    }

    /// Releases a slot. Unknown or already free handles are ignored.
    pub fn free(&mut self, handle: Handle) {
        if let Some(pool) = self.pool_mut(handle) {
            pool.free(handle.slot());
        }
    }

    #[must_use]
    pub fn content(&self, handle: Handle) -> Option<&PageFrame> {
        self.pools
            .get(handle.pool())
            .and_then(Option::as_ref)
            .and_then(|pool| pool.get(handle.slot()))
    }

    pub fn content_mut(&mut self, handle: Handle) -> Option<&mut PageFrame> {
        self.pool_mut(handle)
            .and_then(|pool| pool.get_mut(handle.slot()))
    }

    /// Aggregate number of free slots across the chain.
    #[must_use]
    pub fn available(&self) -> usize {
        self.pools.iter().flatten().map(SlotPool::available).sum()
    }

    /// Aggregate capacity across the chain.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pools.iter().flatten().map(SlotPool::capacity).sum()
    }

    /// Whether at least `n` slots are free across the chain.
    #[must_use]
    pub fn require(&self, n: usize) -> bool {
        let mut available = 0;
        for pool in self.pools.iter().flatten() {
            available += pool.available();
            if available >= n {
                return true;
            }
        }
        n == 0
    }

    fn pool_mut(&mut self, handle: Handle) -> Option<&mut SlotPool<'a>> {
        self.pools.get_mut(handle.pool()).and_then(Option::as_mut)
    }
}

impl NodeStore for Arena<'_> {
    type Value = PageFrame;

    fn value(&self, node: Handle) -> Option<&PageFrame> {
        self.content(node)
    }

    fn link(&self, node: Handle) -> Option<&crate::frame::TreeLink> {
        self.content(node).map(|frame| &frame.link)
    }

    fn link_mut(&mut self, node: Handle) -> Option<&mut crate::frame::TreeLink> {
        self.content_mut(node).map(|frame| &mut frame.link)
    }
}
