//! # Buddy Allocator over Red-Black Free Sets
//!
//! Free memory is kept in [`BUDDY_ORDERS`] order classes. Order `k` holds
//! free runs of exactly `2^k` pages in a [`RbTree`] keyed by base address.
//!
//! * [`BuddyAllocator::free`] cuts a page run into maximal, base-aligned
//!   power-of-two chunks.
//! * [`BuddyAllocator::merge`] coalesces adjacent buddies of one order. It is
//!   never triggered implicitly; callers run [`BuddyAllocator::merge_all`]
//!   when fragmentation gets in the way.
//! * [`BuddyAllocator::split`] halves a block into the next lower order.
//! * [`BuddyAllocator::search`] walks the orders for a block that can hold a
//!   request inside an inclusive `[min, max]` window, splitting larger blocks
//!   on the way down.
//!
//! ```text
//!  order 3  [0x10000 ──────────── 8 pages ────────────)
//!                     split ▼
//!  order 2  [0x10000 ── 4 ──)[0x14000 ── 4 ──)
//! ```

use crate::address::pages_to_bytes;
use crate::frame::{MemoryKind, PageFrame};
use crate::handle::Handle;
use crate::interval::{IntervalOrdering, Position, compare, position};
use crate::pool::Arena;
use crate::tree::{InsertError, RbTree};
use kernel_info::memory::{BUDDY_ORDERS, MAX_ORDER, PAGE_SHIFT};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuddyError {
    #[error("descriptor arena exhausted")]
    ArenaExhausted,
    #[error("order {0} block cannot be split")]
    SplitRejected(usize),
    #[error("block is not a member of order {0}")]
    NotFree(usize),
    #[error(transparent)]
    Insert(#[from] InsertError),
}

/// Which end of the search window is preferred.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Strategy {
    /// Walk each order upward from its lowest block.
    Lowest,
    /// Walk each order downward from its highest block.
    Highest,
}

/// A free block selected by [`BuddyAllocator::search`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Candidate {
    pub node: Handle,
    pub order: usize,
}

enum Scan {
    Found(Handle),
    Split(Handle),
    Exhausted,
}

/// Per-order free sets.
#[derive(Debug, Clone)]
pub struct BuddyAllocator {
    orders: [RbTree; BUDDY_ORDERS],
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            orders: [RbTree::new(); BUDDY_ORDERS],
        }
    }

    /// Free set of `order`.
    ///
    /// # Panics
    /// Panics if `order` exceeds [`MAX_ORDER`].
    #[must_use]
    pub const fn tree(&self, order: usize) -> &RbTree {
        &self.orders[order]
    }

    /// Total number of free pages across all orders.
    #[must_use]
    pub fn free_pages(&self, arena: &Arena<'_>) -> u64 {
        (0..BUDDY_ORDERS)
            .map(|order| self.orders[order].iter(arena).count() as u64 * (1 << order))
            .sum()
    }

    /// Finds a free block of any order sharing addresses with
    /// `[base, base + pages)`.
    #[must_use]
    pub fn find_overlap(
        &self,
        arena: &Arena<'_>,
        base: u64,
        pages: u64,
    ) -> Option<(usize, IntervalOrdering)> {
        if pages == 0 {
            return None;
        }

        let run = PageFrame::new(base, pages, MemoryKind::Available, 0);
        self.orders.iter().enumerate().find_map(|(order, tree)| {
            tree.find_overlap(arena, &run, compare).map(|(_, ordering)| (order, ordering))
        })
    }

    /// Returns the run `[base, base + pages)` to the free sets.
    ///
    /// A run sharing addresses with a free block of any order is rejected
    /// before anything is recorded.
    ///
    /// # Errors
    /// [`InsertError::Overlap`] for a run overlapping the free sets. Past that
    /// check, fails as soon as a chunk cannot be recorded; chunks recorded
    /// before the failure stay free.
    pub fn free(
        &mut self,
        arena: &mut Arena<'_>,
        mut base: u64,
        mut pages: u64,
    ) -> Result<(), BuddyError> {
        log::trace!("buddy free base={base:#x} pages={pages:#x}");

        if let Some((order, ordering)) = self.find_overlap(arena, base, pages) {
            log::warn!("buddy free of {base:#x}+{pages:#x} overlaps a block of order {order}");
            return Err(InsertError::Overlap(ordering).into());
        }

        while pages > 0 {
            let order = chunk_order(base, pages);
            let chunk = 1u64 << order;

            let node = arena
                .alloc_frame(PageFrame::new(base, chunk, MemoryKind::Available, 0))
                .ok_or(BuddyError::ArenaExhausted)?;
            if let Err(e) = self.orders[order].insert(arena, node, compare) {
                log::warn!("buddy free rejected chunk {base:#x}+{chunk:#x} in order {order}: {e}");
                arena.free(node);
                return Err(e.into());
            }

            pages -= chunk;
            if pages > 0 {
                base += chunk << PAGE_SHIFT;
            }
        }

        Ok(())
    }

    /// One coalescing pass over `order`.
    ///
    /// Two neighbours merge when the lower one is aligned to the merged size
    /// and the upper one starts where the lower one ends. The merged block
    /// reuses the lower slot and moves to `order + 1`; the upper slot is
    /// released.
    pub fn merge(&mut self, arena: &mut Arena<'_>, order: usize) {
        if order >= MAX_ORDER {
            return;
        }

        let mask = (1u64 << (order + 1 + PAGE_SHIFT as usize)) - 1;
        let mut cursor = self.orders[order].first(arena);

        while let Some(head) = cursor {
            let Some(next) = RbTree::next(arena, head) else {
                break;
            };
            let (Some(h), Some(n)) = (arena.content(head), arena.content(next)) else {
                break;
            };

            if h.base & mask != 0 || n.base != h.end() {
                cursor = Some(next);
                continue;
            }

            // Handles are stable across removals, so the block after the
            // pair remains a valid cursor.
            let after = RbTree::next(arena, next);
            let (base, pages) = (h.base, h.pages);

            self.orders[order].remove(arena, head);
            self.orders[order].remove(arena, next);
            if let Some(frame) = arena.content_mut(head) {
                frame.pages = pages << 1;
            }

            match self.orders[order + 1].insert(arena, head, compare) {
                Ok(()) => {
                    log::trace!("buddy merge {base:#x} order {order} -> {}", order + 1);
                    arena.free(next);
                }
                Err(e) => {
                    log::warn!("buddy merge of {base:#x} into order {} rejected: {e}", order + 1);
                    if let Some(frame) = arena.content_mut(head) {
                        frame.pages = pages;
                    }
                    // Both halves were members of this order a moment ago.
                    for half in [head, next] {
                        if let Err(e) = self.orders[order].insert(arena, half, compare) {
                            log::warn!("buddy merge left {half:?} outside order {order}: {e}");
                        }
                    }
                }
            }

            cursor = after;
        }
    }

    /// Runs [`merge`](Self::merge) over every order from the bottom up.
    pub fn merge_all(&mut self, arena: &mut Arena<'_>) {
        for order in 0..MAX_ORDER {
            self.merge(arena, order);
        }
    }

    /// Halves `node` of `order` into two blocks of `order - 1`.
    ///
    /// # Errors
    /// [`BuddyError::SplitRejected`] for order 0, an out-of-range order or
    /// a full arena; [`BuddyError::NotFree`] if `node` is not in `order`.
    pub fn split(
        &mut self,
        arena: &mut Arena<'_>,
        order: usize,
        node: Handle,
    ) -> Result<(), BuddyError> {
        if order == 0 || order > MAX_ORDER || !arena.require(1) {
            return Err(BuddyError::SplitRejected(order));
        }
        if !self.orders[order].remove(arena, node) {
            return Err(BuddyError::NotFree(order));
        }

        let frame = arena.content_mut(node).ok_or(BuddyError::NotFree(order))?;
        frame.pages >>= 1;
        let half = frame.pages;
        let upper = frame.base + (half << PAGE_SHIFT);
        log::trace!("buddy split {:#x} order {order} -> {}", frame.base, order - 1);

        let sibling = arena
            .alloc_frame(PageFrame::new(upper, half, MemoryKind::Available, 0))
            .ok_or(BuddyError::ArenaExhausted)?;
        self.orders[order - 1].insert(arena, node, compare)?;
        self.orders[order - 1].insert(arena, sibling, compare)?;
        Ok(())
    }

    /// Removes `node` from `order` and releases its slot.
    ///
    /// # Errors
    /// [`BuddyError::NotFree`] if `node` is not in `order`.
    pub fn take(
        &mut self,
        arena: &mut Arena<'_>,
        order: usize,
        node: Handle,
    ) -> Result<(), BuddyError> {
        let tree = self.orders.get_mut(order).ok_or(BuddyError::NotFree(order))?;
        if !tree.remove(arena, node) {
            return Err(BuddyError::NotFree(order));
        }
        arena.free(node);
        Ok(())
    }

    /// Finds a free block able to hold `pages` pages inside `[min, max]`.
    ///
    /// Orders are scanned from the smallest sufficient one upward. A larger
    /// block overlapping the window is split and the scan continues one
    /// order lower. The returned block is always of order
    /// `ceil(log2(pages))`, and its first `pages` pages lie inside the window.
    ///
    /// Returns `None` when nothing fits or a required split fails.
    pub fn search(
        &mut self,
        arena: &mut Arena<'_>,
        strategy: Strategy,
        min: u64,
        max: u64,
        pages: u64,
    ) -> Option<Candidate> {
        let need = order_for(pages)?;
        let span = pages_to_bytes(pages) - 1;
        if max.checked_sub(min)? < span {
            return None;
        }

        let mut order = need;
        while order <= MAX_ORDER {
            let scan = match strategy {
                Strategy::Lowest => self.scan_lowest(arena, order, need, min, max, span),
                Strategy::Highest => self.scan_highest(arena, order, need, min, max, span),
            };

            match scan {
                Scan::Found(node) => {
                    log::debug!("buddy search found order {order} block for {pages:#x} pages");
                    return Some(Candidate { node, order });
                }
                Scan::Split(node) => {
                    if let Err(e) = self.split(arena, order, node) {
                        log::debug!("buddy search aborted: {e}");
                        return None;
                    }
                    order -= 1;
                }
                Scan::Exhausted => order += 1,
            }
        }

        None
    }

    /// Ascending walk: skip blocks below `min`, stop at the first block
    /// starting above `max`.
    fn scan_lowest(
        &self,
        arena: &Arena<'_>,
        order: usize,
        need: usize,
        min: u64,
        max: u64,
        span: u64,
    ) -> Scan {
        let mut cursor = self.orders[order].first(arena);
        while let Some(node) = cursor {
            let Some(frame) = arena.content(node) else {
                break;
            };

            match position(frame, min) {
                Position::Less => {}
                Position::Contains if frame.base != min => {
                    if order > need {
                        return Scan::Split(node);
                    }
                    // Straddles `min`; a later block may start inside the window.
                }
                _ => {
                    let room = match position(frame, max) {
                        Position::Greater => return Scan::Exhausted,
                        Position::Less => true,
                        Position::Contains => max - frame.base >= span,
                    };
                    return if order > need {
                        Scan::Split(node)
                    } else if room {
                        Scan::Found(node)
                    } else {
                        Scan::Exhausted
                    };
                }
            }

            cursor = RbTree::next(arena, node);
        }
        Scan::Exhausted
    }

    /// Descending walk: skip blocks with no room below `max`, stop at the
    /// first block ending below `min`.
    fn scan_highest(
        &self,
        arena: &Arena<'_>,
        order: usize,
        need: usize,
        min: u64,
        max: u64,
        span: u64,
    ) -> Scan {
        let mut cursor = self.orders[order].last(arena);
        while let Some(node) = cursor {
            let Some(frame) = arena.content(node) else {
                break;
            };

            match position(frame, max) {
                Position::Greater => {}
                Position::Contains if max - frame.base < span => {}
                _ => {
                    let aligned = match position(frame, min) {
                        Position::Less => return Scan::Exhausted,
                        Position::Greater => true,
                        Position::Contains => frame.base == min,
                    };
                    return if order > need {
                        Scan::Split(node)
                    } else if aligned {
                        Scan::Found(node)
                    } else {
                        Scan::Exhausted
                    };
                }
            }

            cursor = RbTree::prev(arena, node);
        }
        Scan::Exhausted
    }

    /// Logs every free block at debug level.
    pub fn dump(&self, arena: &Arena<'_>) {
        for (order, tree) in self.orders.iter().enumerate() {
            if tree.is_empty() {
                continue;
            }
            log::debug!("order {order} (depth {}):", tree.depth(arena));
            for frame in tree.iter(arena).filter_map(|h| arena.content(h)) {
                log::debug!("  {:#018x} +{:#x} pages", frame.base, frame.pages);
            }
        }
    }
}

/// Smallest order whose blocks hold `pages` pages.
#[must_use]
pub const fn order_for(pages: u64) -> Option<usize> {
    if pages == 0 {
        return None;
    }
    match pages.checked_next_power_of_two() {
        Some(size) if size.trailing_zeros() as usize <= MAX_ORDER => {
            Some(size.trailing_zeros() as usize)
        }
        _ => None,
    }
}

/// Order of the first chunk [`BuddyAllocator::free`] cuts from `base`.
const fn chunk_order(base: u64, pages: u64) -> usize {
    let align = if base == 0 { u64::BITS - 1 } else { base.trailing_zeros() };
    let mut order = align.saturating_sub(PAGE_SHIFT) as usize;
    if order > MAX_ORDER {
        order = MAX_ORDER;
    }
    while (1u64 << order) > pages {
        order -= 1;
    }
    order
}

/// Number of descriptors [`BuddyAllocator::free`] needs for the run.
#[must_use]
pub const fn chunk_count(mut base: u64, mut pages: u64) -> usize {
    let mut count = 0;
    while pages > 0 {
        let chunk = 1u64 << chunk_order(base, pages);
        count += 1;
        pages -= chunk;
        if pages > 0 {
            base += chunk << PAGE_SHIFT;
        }
    }
    count
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::SlotPool;

    const CAPACITY: usize = 1024;

    struct Backing {
        bitmap: Vec<u64>,
        slots: Vec<PageFrame>,
    }

    impl Backing {
        fn new(capacity: usize) -> Self {
            Self {
                bitmap: vec![0; SlotPool::bitmap_words(capacity)],
                slots: vec![PageFrame::EMPTY; capacity],
            }
        }

        fn arena(&mut self) -> Arena<'_> {
            Arena::new(SlotPool::new(&mut self.bitmap, &mut self.slots).unwrap())
        }
    }

    fn blocks(buddy: &BuddyAllocator, arena: &Arena<'_>, order: usize) -> Vec<(u64, u64)> {
        buddy
            .tree(order)
            .iter(arena)
            .map(|h| {
                let f = arena.content(h).unwrap();
                (f.base, f.pages)
            })
            .collect()
    }

    #[test]
    fn order_for_rounds_up() {
        assert_eq!(order_for(0), None);
        assert_eq!(order_for(1), Some(0));
        assert_eq!(order_for(3), Some(2));
        assert_eq!(order_for(4), Some(2));
        assert_eq!(order_for(5), Some(3));
        assert_eq!(order_for(1 << 51), Some(51));
        assert_eq!(order_for((1 << 51) + 1), None);
    }

    #[test]
    fn free_decomposes_into_aligned_chunks() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        // 0x13000 + 13 pages = 1 @0x13000, 4 @0x14000, 8 @0x18000
        buddy.free(&mut arena, 0x13000, 13).unwrap();
        assert_eq!(blocks(&buddy, &arena, 0), vec![(0x13000, 1)]);
        assert_eq!(blocks(&buddy, &arena, 2), vec![(0x14000, 4)]);
        assert_eq!(blocks(&buddy, &arena, 3), vec![(0x18000, 8)]);
        assert_eq!(buddy.free_pages(&arena), 13);
        assert_eq!(chunk_count(0x13000, 13), 3);
        assert_eq!(arena.available(), CAPACITY - 3);
    }

    #[test]
    fn free_at_zero_caps_order() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        buddy.free(&mut arena, 0, 16).unwrap();
        assert_eq!(blocks(&buddy, &arena, 4), vec![(0, 16)]);
    }

    #[test]
    fn free_rejects_overlap() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        buddy.free(&mut arena, 0x10000, 4).unwrap();
        let available = arena.available();

        // Same order, a smaller order inside the block, and a run that
        // straddles its lower edge.
        for (base, pages) in [(0x10000, 4), (0x12000, 2), (0x13000, 1), (0xE000, 4)] {
            assert!(matches!(
                buddy.free(&mut arena, base, pages),
                Err(BuddyError::Insert(InsertError::Overlap(_)))
            ));
        }
        assert_eq!(arena.available(), available);
        assert_eq!(buddy.free_pages(&arena), 4);
        assert_eq!(buddy.find_overlap(&arena, 0x13000, 1).map(|(order, _)| order), Some(2));
        assert_eq!(buddy.find_overlap(&arena, 0x14000, 4), None);
    }

    #[test]
    fn free_reports_exhaustion() {
        let mut backing = Backing::new(2);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        assert_eq!(buddy.free(&mut arena, 0x13000, 13), Err(BuddyError::ArenaExhausted));
        assert_eq!(buddy.free_pages(&arena), 5);
    }

    #[test]
    fn split_then_merge_restores_block() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        buddy.free(&mut arena, 0x40000, 8).unwrap();
        let node = buddy.tree(3).first(&arena).unwrap();
        buddy.split(&mut arena, 3, node).unwrap();
        assert!(buddy.tree(3).is_empty());
        assert_eq!(blocks(&buddy, &arena, 2), vec![(0x40000, 4), (0x44000, 4)]);

        buddy.merge(&mut arena, 2);
        assert!(buddy.tree(2).is_empty());
        assert_eq!(blocks(&buddy, &arena, 3), vec![(0x40000, 8)]);
        assert_eq!(arena.available(), CAPACITY - 1);
    }

    #[test]
    fn split_rejects_order_zero() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        buddy.free(&mut arena, 0x1000, 1).unwrap();
        let node = buddy.tree(0).first(&arena).unwrap();
        assert_eq!(buddy.split(&mut arena, 0, node), Err(BuddyError::SplitRejected(0)));
        assert_eq!(buddy.split(&mut arena, 1, node), Err(BuddyError::NotFree(1)));
        assert_eq!(blocks(&buddy, &arena, 0), vec![(0x1000, 1)]);
    }

    #[test]
    fn merge_skips_misaligned_neighbours() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        // 0x13000 and 0x14000 touch but 0x13000 is not 2-page aligned.
        buddy.free(&mut arena, 0x13000, 1).unwrap();
        buddy.free(&mut arena, 0x14000, 1).unwrap();
        buddy.free(&mut arena, 0x15000, 1).unwrap();
        buddy.merge(&mut arena, 0);

        assert_eq!(blocks(&buddy, &arena, 0), vec![(0x13000, 1)]);
        assert_eq!(blocks(&buddy, &arena, 1), vec![(0x14000, 2)]);
    }

    #[test]
    fn merge_all_cascades() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();

        for page in 0..16u64 {
            buddy.free(&mut arena, 0x100000 + page * 0x1000, 1).unwrap();
        }
        buddy.merge_all(&mut arena);

        assert_eq!(blocks(&buddy, &arena, 4), vec![(0x100000, 16)]);
        assert_eq!(arena.available(), CAPACITY - 1);
    }

    #[test]
    fn search_lowest_splits_down() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 8).unwrap();

        let c = buddy
            .search(&mut arena, Strategy::Lowest, 0x10000, u64::MAX, 3)
            .unwrap();
        assert_eq!(c.order, 2);
        assert_eq!(arena.content(c.node).unwrap().base, 0x10000);
        assert_eq!(blocks(&buddy, &arena, 2), vec![(0x10000, 4), (0x14000, 4)]);
    }

    #[test]
    fn search_highest_prefers_top() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 8).unwrap();

        let c = buddy.search(&mut arena, Strategy::Highest, 0, u64::MAX, 1).unwrap();
        assert_eq!(c.order, 0);
        assert_eq!(arena.content(c.node).unwrap().base, 0x17000);
    }

    #[test]
    fn search_honours_window() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 16).unwrap();

        // Two pages ending at or below 0x15FFF, starting at or above 0x12000.
        let c = buddy
            .search(&mut arena, Strategy::Highest, 0x12000, 0x15FFF, 2)
            .unwrap();
        let frame = *arena.content(c.node).unwrap();
        assert_eq!(frame.base, 0x14000);
        assert!(frame.base >= 0x12000 && frame.base + 2 * 0x1000 - 1 <= 0x15FFF);

        // Window narrower than the request.
        assert!(buddy.search(&mut arena, Strategy::Lowest, 0x10000, 0x10FFF, 2).is_none());
    }

    #[test]
    fn search_lowest_skips_straddling_block() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 1).unwrap();
        buddy.free(&mut arena, 0x20000, 1).unwrap();

        let c = buddy
            .search(&mut arena, Strategy::Lowest, 0x10800, u64::MAX, 1)
            .unwrap();
        assert_eq!(arena.content(c.node).unwrap().base, 0x20000);
    }

    #[test]
    fn search_fails_when_split_impossible() {
        let mut backing = Backing::new(1);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 8).unwrap();

        assert!(buddy.search(&mut arena, Strategy::Lowest, 0, u64::MAX, 1).is_none());
        assert_eq!(blocks(&buddy, &arena, 3), vec![(0x10000, 8)]);
    }

    #[test]
    fn take_releases_slot() {
        let mut backing = Backing::new(CAPACITY);
        let mut arena = backing.arena();
        let mut buddy = BuddyAllocator::new();
        buddy.free(&mut arena, 0x10000, 1).unwrap();
        let node = buddy.tree(0).first(&arena).unwrap();

        buddy.take(&mut arena, 0, node).unwrap();
        assert!(buddy.tree(0).is_empty());
        assert_eq!(arena.available(), CAPACITY);
        assert_eq!(buddy.take(&mut arena, 0, node), Err(BuddyError::NotFree(0)));
    }
}
