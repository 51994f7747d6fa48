//! # Boot Memory Manager
//!
//! Ties the arena, the buddy free sets and the used/reserved trees together
//! and exposes the allocation interface of the boot stage.
//!
//! ## Allocation flow
//!
//! ```text
//!  alloc(mode, min, max, pages)
//!    │ validate, require(reserve)
//!    ▼
//!  buddy search ──fail──► merge all orders ──► search once more
//!    │ candidate of order ceil(log2(pages))
//!    ▼
//!  commit: record [base, pages) in the allocated tree,
//!          drop the candidate, re-free the tail
//! ```
//!
//! There is no internal locking. Callers running with more than one core
//! must serialize access to the whole manager.

use crate::address::{PhysicalAddress, pages_to_bytes};
use crate::buddy::{BuddyAllocator, BuddyError, Candidate, Strategy, chunk_count};
use crate::frame::{MemoryKind, PageFrame};
use crate::interval::{IntervalOrdering, compare, position};
use crate::pool::Arena;
use crate::tree::{InsertError, RbTree};
use kernel_info::memory::{LOW_MEMORY_LIMIT, PMM_POOL_CAPACITY, PMM_POOL_RESERVED};

/// Search window and preferred end of an allocation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AllocMode {
    /// Lowest fit at or above `min`.
    Min,
    /// Highest fit at or below `max`.
    Max,
    /// Highest fit inside `[min, max]`.
    Range,
    /// Highest fit anywhere.
    Any,
}

impl AllocMode {
    /// Effective `(strategy, min, max)` for the caller's bounds.
    #[must_use]
    pub const fn window(self, min: u64, max: u64) -> (Strategy, u64, u64) {
        match self {
            Self::Min => (Strategy::Lowest, min, u64::MAX),
            Self::Max => (Strategy::Highest, 0, max),
            Self::Range => (Strategy::Highest, min, max),
            Self::Any => (Strategy::Highest, 0, u64::MAX),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("invalid allocation request")]
    InvalidRequest,
    #[error("descriptor arena exhausted")]
    ArenaExhausted,
    #[error("no free block satisfies the request")]
    AllocationFailed,
    #[error("allocation record rejected: {0}")]
    Record(#[from] InsertError),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
}

/// Runtime tunables of the manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmmConfig {
    /// Descriptor capacity used when carving the pool from a raw region.
    pub pool_capacity: u16,
    /// Free descriptors required before an allocation is attempted.
    pub reserve: usize,
    /// Conventional memory below this address is reserved, never freed.
    pub low_memory_limit: u64,
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self {
            pool_capacity: PMM_POOL_CAPACITY,
            reserve: PMM_POOL_RESERVED,
            low_memory_limit: LOW_MEMORY_LIMIT,
        }
    }
}

/// The boot-stage physical memory manager.
pub struct BootMemoryManager<'a> {
    pub(crate) arena: Arena<'a>,
    pub(crate) buddy: BuddyAllocator,
    pub(crate) allocated: RbTree,
    pub(crate) reserved: RbTree,
    pub(crate) config: PmmConfig,
    pub(crate) ingested_pages: u64,
}

impl<'a> BootMemoryManager<'a> {
    /// An empty manager: nothing free, nothing tracked.
    ///
    /// Use [`BootMemoryManager::init`] to populate it from a memory map, or
    /// [`BootMemoryManager::add_free`] to hand it page runs directly.
    #[must_use]
    pub fn new(arena: Arena<'a>, config: PmmConfig) -> Self {
        Self {
            arena,
            buddy: BuddyAllocator::new(),
            allocated: RbTree::new(),
            reserved: RbTree::new(),
            config,
            ingested_pages: 0,
        }
    }

    /// Relation of `[base, base + pages)` to the first tracked run it shares
    /// addresses with, searching the free, allocated and reserved sets.
    #[must_use]
    pub fn find_overlap(&self, base: u64, pages: u64) -> Option<IntervalOrdering> {
        if pages == 0 {
            return None;
        }
        if let Some((_, ordering)) = self.buddy.find_overlap(&self.arena, base, pages) {
            return Some(ordering);
        }

        let run = PageFrame::new(base, pages, MemoryKind::Available, 0);
        [&self.allocated, &self.reserved].into_iter().find_map(|tree| {
            tree.find_overlap(&self.arena, &run, compare).map(|(_, ordering)| ordering)
        })
    }

    /// Rejects runs sharing addresses with anything already tracked.
    pub(crate) fn ensure_untracked(&self, base: u64, pages: u64) -> Result<(), InsertError> {
        match self.find_overlap(base, pages) {
            Some(ordering) => {
                log::warn!("page run {base:#x}+{pages:#x} overlaps tracked memory ({ordering:?})");
                Err(InsertError::Overlap(ordering))
            }
            None => Ok(()),
        }
    }

    /// Hands a free page run to the buddy allocator and counts it as ingested.
    ///
    /// # Errors
    /// Fails if the run overlaps tracked memory or the arena runs out.
    pub fn add_free(&mut self, base: u64, pages: u64) -> Result<(), BuddyError> {
        self.ensure_untracked(base, pages)?;
        if !self.arena.require(chunk_count(base, pages)) {
            return Err(BuddyError::ArenaExhausted);
        }
        self.buddy.free(&mut self.arena, base, pages)?;
        self.ingested_pages += pages;
        Ok(())
    }

    /// Records a reserved page run and counts it as ingested.
    ///
    /// # Errors
    /// Fails if the run overlaps tracked memory or the arena is full.
    pub fn add_reserved(
        &mut self,
        base: u64,
        pages: u64,
        kind: MemoryKind,
    ) -> Result<(), BuddyError> {
        self.ensure_untracked(base, pages)?;
        let node = self
            .arena
            .alloc_frame(PageFrame::new(base, pages, kind, 0))
            .ok_or(BuddyError::ArenaExhausted)?;
        if let Err(e) = self.reserved.insert(&mut self.arena, node, compare) {
            log::warn!("reserved run {base:#x}+{pages:#x} ({kind:?}) rejected: {e}");
            self.arena.free(node);
            return Err(e.into());
        }
        self.ingested_pages += pages;
        Ok(())
    }

    /// Allocates `pages` contiguous pages according to `mode`.
    ///
    /// `min` and `max` form an inclusive window; which of them is honoured
    /// depends on `mode` (see [`AllocMode::window`]). On failure, all orders
    /// are merged and the search is repeated once.
    ///
    /// # Errors
    /// * [`AllocError::InvalidRequest`] for `pages == 0` or `min >= max`,
    ///   without touching any state.
    /// * [`AllocError::ArenaExhausted`] if fewer than the configured reserve
    ///   of descriptors is free.
    /// * [`AllocError::AllocationFailed`] if no block fits after merging.
    pub fn alloc(
        &mut self,
        mode: AllocMode,
        min: u64,
        max: u64,
        pages: u64,
        kind: MemoryKind,
        owner: u32,
    ) -> Result<PhysicalAddress, AllocError> {
        if pages == 0 || min >= max {
            return Err(AllocError::InvalidRequest);
        }

        if !self.arena.require(self.config.reserve) {
            log::warn!(
                "PMM arena below reserve ({} of {} descriptors free)",
                self.arena.available(),
                self.config.reserve
            );
            return Err(AllocError::ArenaExhausted);
        }

        let (strategy, lo, hi) = mode.window(min, max);
        match self.try_alloc(strategy, lo, hi, pages, kind, owner) {
            Err(AllocError::AllocationFailed) => {
                log::debug!("PMM search for {pages:#x} pages failed, merging free blocks");
                self.buddy.merge_all(&mut self.arena);
                self.try_alloc(strategy, lo, hi, pages, kind, owner)
                    .inspect_err(|e| {
                        log::warn!(
                            "PMM {mode:?} alloc of {pages:#x} pages in [{lo:#x}, {hi:#x}]: {e}"
                        );
                    })
            }
            other => other,
        }
    }

    fn try_alloc(
        &mut self,
        strategy: Strategy,
        min: u64,
        max: u64,
        pages: u64,
        kind: MemoryKind,
        owner: u32,
    ) -> Result<PhysicalAddress, AllocError> {
        let candidate = self
            .buddy
            .search(&mut self.arena, strategy, min, max, pages)
            .ok_or(AllocError::AllocationFailed)?;
        self.commit(candidate, pages, kind, owner)
    }

    /// Turns a free candidate into an allocation of exactly `pages` pages.
    ///
    /// The allocation record is inserted first; if that fails, the
    /// candidate stays free and the record's slot is released.
    fn commit(
        &mut self,
        candidate: Candidate,
        pages: u64,
        kind: MemoryKind,
        owner: u32,
    ) -> Result<PhysicalAddress, AllocError> {
        let frame = *self
            .arena
            .content(candidate.node)
            .ok_or(AllocError::AllocationFailed)?;
        let remainder = frame.pages.saturating_sub(pages);
        let tail = frame.base + pages_to_bytes(pages);

        // One slot for the record plus one per remainder chunk.
        if !self.arena.require(1 + chunk_count(tail, remainder)) {
            return Err(AllocError::ArenaExhausted);
        }

        let record = self
            .arena
            .alloc_frame(PageFrame::new(frame.base, pages, kind, owner))
            .ok_or(AllocError::ArenaExhausted)?;
        if let Err(e) = self.allocated.insert(&mut self.arena, record, compare) {
            log::warn!("allocation record {:#x}+{pages:#x} rejected: {e}", frame.base);
            self.arena.free(record);
            return Err(e.into());
        }

        self.buddy.take(&mut self.arena, candidate.order, candidate.node)?;
        if remainder > 0 {
            self.buddy.free(&mut self.arena, tail, remainder)?;
        }

        log::trace!(
            "PMM commit {:#x}+{pages:#x} {kind:?} owner {owner} (order {})",
            frame.base,
            candidate.order
        );
        Ok(frame.address())
    }

    /// Releases the allocation containing `address`.
    ///
    /// Addresses outside every allocation are ignored and reported as
    /// success.
    ///
    /// # Errors
    /// [`AllocError::ArenaExhausted`] if the freed run cannot be recorded;
    /// the allocation is left untouched in that case.
    pub fn free(&mut self, address: PhysicalAddress) -> Result<(), AllocError> {
        let Some(node) = self.allocated.find(&self.arena, address.as_u64(), position) else {
            return Ok(());
        };
        let Some(&frame) = self.arena.content(node) else {
            return Ok(());
        };

        // The record's own slot is released before the chunks are cut.
        if !self.arena.require(chunk_count(frame.base, frame.pages).saturating_sub(1)) {
            return Err(AllocError::ArenaExhausted);
        }

        self.allocated.remove(&mut self.arena, node);
        self.arena.free(node);
        self.buddy.free(&mut self.arena, frame.base, frame.pages)?;
        log::trace!("PMM free {:#x}+{:#x}", frame.base, frame.pages);
        Ok(())
    }

    /// Merges buddies across all orders.
    pub fn merge_all(&mut self) {
        self.buddy.merge_all(&mut self.arena);
    }

    /// The allocation record containing `address`.
    #[must_use]
    pub fn find_allocated(&self, address: PhysicalAddress) -> Option<&PageFrame> {
        self.allocated
            .find(&self.arena, address.as_u64(), position)
            .and_then(|h| self.arena.content(h))
    }

    /// Free blocks of `order` in ascending address order.
    ///
    /// # Panics
    /// Panics if `order` is not below
    /// [`BUDDY_ORDERS`](kernel_info::memory::BUDDY_ORDERS).
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = &PageFrame> + '_ {
        self.buddy
            .tree(order)
            .iter(&self.arena)
            .filter_map(|h| self.arena.content(h))
    }

    /// Allocation records (including preserved loader data) in address order.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = &PageFrame> + '_ {
        self.allocated
            .iter(&self.arena)
            .filter_map(|h| self.arena.content(h))
    }

    /// Reserved runs in address order.
    pub fn reserved_blocks(&self) -> impl Iterator<Item = &PageFrame> + '_ {
        self.reserved
            .iter(&self.arena)
            .filter_map(|h| self.arena.content(h))
    }

    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.buddy.free_pages(&self.arena)
    }

    #[must_use]
    pub fn allocated_pages(&self) -> u64 {
        self.allocated_blocks().map(|f| f.pages).sum()
    }

    #[must_use]
    pub fn reserved_pages(&self) -> u64 {
        self.reserved_blocks().map(|f| f.pages).sum()
    }

    /// Pages currently tracked by any tree.
    #[must_use]
    pub fn tracked_pages(&self) -> u64 {
        self.free_pages() + self.allocated_pages() + self.reserved_pages()
    }

    /// Pages handed to the manager since creation.
    #[must_use]
    pub const fn ingested_pages(&self) -> u64 {
        self.ingested_pages
    }

    #[must_use]
    pub const fn arena(&self) -> &Arena<'a> {
        &self.arena
    }

    #[must_use]
    pub const fn buddy(&self) -> &BuddyAllocator {
        &self.buddy
    }

    #[must_use]
    pub const fn config(&self) -> &PmmConfig {
        &self.config
    }

    /// Logs the complete allocator state at debug level.
    pub fn dump(&self) {
        log::debug!(
            "PMM state: {} free / {} allocated / {} reserved pages, {} of {} descriptors free",
            self.free_pages(),
            self.allocated_pages(),
            self.reserved_pages(),
            self.arena.available(),
            self.arena.capacity()
        );
        self.buddy.dump(&self.arena);

        log::debug!("allocated (depth {}):", self.allocated.depth(&self.arena));
        for frame in self.allocated_blocks() {
            log::debug!(
                "  {:#018x} +{:#x} pages {:?} owner {}",
                frame.base,
                frame.pages,
                frame.kind(),
                frame.owner()
            );
        }

        log::debug!("reserved (depth {}):", self.reserved.depth(&self.arena));
        for frame in self.reserved_blocks() {
            log::debug!("  {:#018x} +{:#x} pages {:?}", frame.base, frame.pages, frame.kind());
        }
    }
}
