use kernel_pmm::{
    AllocError, AllocMode, Arena, BootMemoryManager, MemoryKind, PageFrame, PhysicalAddress,
    PmmConfig, SlotPool,
};

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

    fn manager(&mut self) -> BootMemoryManager<'_> {
        let pool = SlotPool::new(&mut self.bitmap, &mut self.slots).expect("pool");
        BootMemoryManager::new(Arena::new(pool), PmmConfig::default())
    }
}

fn blocks(pmm: &BootMemoryManager<'_>, order: usize) -> Vec<(u64, u64)> {
    pmm.free_blocks(order).map(|f| (f.base, f.pages)).collect()
}

fn assert_conserved(pmm: &BootMemoryManager<'_>) {
    assert_eq!(pmm.tracked_pages(), pmm.ingested_pages());
}

#[test]
fn min_alloc_splits_and_returns_tail() {
    let mut backing = Backing::new(1024);
    let mut pmm = backing.manager();
    pmm.add_free(0x10000, 8).unwrap();
    assert_eq!(blocks(&pmm, 3), vec![(0x10000, 8)]);

    let pa = pmm
        .alloc(AllocMode::Min, 0x10000, u64::MAX, 3, MemoryKind::KernelData, 0)
        .unwrap();
    assert_eq!(pa, PhysicalAddress::new(0x10000));

    let used: Vec<_> = pmm
        .allocated_blocks()
        .map(|f| (f.base, f.pages, f.kind(), f.owner()))
        .collect();
    assert_eq!(used, vec![(0x10000, 3, MemoryKind::KernelData, 0)]);

    assert_eq!(blocks(&pmm, 0), vec![(0x13000, 1)]);
    assert_eq!(blocks(&pmm, 1), vec![]);
    assert_eq!(blocks(&pmm, 2), vec![(0x14000, 4)]);
    assert_eq!(blocks(&pmm, 3), vec![]);
    assert_conserved(&pmm);
}

#[test]
fn dealloc_and_merge_restore_the_block() {
    let mut backing = Backing::new(1024);
    let mut pmm = backing.manager();
    pmm.add_free(0x10000, 8).unwrap();
    let available = pmm.arena().available();

    let pa = pmm
        .alloc(AllocMode::Min, 0x10000, u64::MAX, 3, MemoryKind::KernelData, 0)
        .unwrap();

    // Any address inside the allocation identifies it.
    pmm.free(pa + 0x2FFF).unwrap();
    assert_eq!(pmm.allocated_pages(), 0);
    assert_eq!(pmm.free_pages(), 8);
    assert_conserved(&pmm);

    pmm.merge_all();
    assert_eq!(blocks(&pmm, 3), vec![(0x10000, 8)]);
    for order in 0..3 {
        assert!(blocks(&pmm, order).is_empty(), "order {order} not merged");
    }
    assert_eq!(pmm.arena().available(), available);
}

#[test]
fn foreign_free_changes_nothing() {
    let mut backing = Backing::new(1024);
    let mut pmm = backing.manager();
    pmm.add_free(0x10000, 8).unwrap();
    let pa = pmm
        .alloc(AllocMode::Any, 0, u64::MAX, 2, MemoryKind::UserCode, 1)
        .unwrap();

    let available = pmm.arena().available();
    let free = pmm.free_pages();

    pmm.free(PhysicalAddress::new(0xDEAD_0000)).unwrap();
    pmm.free(PhysicalAddress::zero()).unwrap();

    assert_eq!(pmm.arena().available(), available);
    assert_eq!(pmm.free_pages(), free);
    assert!(pmm.find_allocated(pa).is_some());

    pmm.free(pa).unwrap();
    pmm.free(pa).unwrap();
    assert!(pmm.find_allocated(pa).is_none());
    assert_conserved(&pmm);
}

#[test]
fn modes_pick_the_expected_end() {
    let mut backing = Backing::new(1024);
    let mut pmm = backing.manager();
    pmm.add_free(0x100000, 256).unwrap();

    let any = pmm
        .alloc(AllocMode::Any, 0, u64::MAX, 1, MemoryKind::KernelData, 0)
        .unwrap();
    assert_eq!(any.as_u64(), 0x1FF000);

    // The smallest sufficient order is scanned first, so the split-off
    // order 2 block wins over the lower order 7 block.
    let min = pmm
        .alloc(AllocMode::Min, 0x140000, u64::MAX, 4, MemoryKind::KernelData, 0)
        .unwrap();
    assert_eq!(min.as_u64(), 0x1F8000);

    let max = pmm
        .alloc(AllocMode::Max, 0, 0x17FFFF, 4, MemoryKind::KernelData, 0)
        .unwrap();
    assert_eq!(max.as_u64(), 0x17C000);

    let range = pmm
        .alloc(AllocMode::Range, 0x120000, 0x127FFF, 2, MemoryKind::KernelData, 0)
        .unwrap();
    assert_eq!(range.as_u64(), 0x126000);

    assert_eq!(pmm.allocated_pages(), 11);
    assert_conserved(&pmm);
}

#[test]
fn request_larger_than_memory_fails_after_retry() {
    let mut backing = Backing::new(1024);
    let mut pmm = backing.manager();
    pmm.add_free(0x100000, 16).unwrap();

    assert_eq!(
        pmm.alloc(AllocMode::Any, 0, u64::MAX, 17, MemoryKind::KernelData, 0),
        Err(AllocError::AllocationFailed)
    );
    assert_eq!(
        pmm.alloc(AllocMode::Any, 0, u64::MAX, 1 << 52, MemoryKind::KernelData, 0),
        Err(AllocError::AllocationFailed)
    );
    assert_eq!(pmm.free_pages(), 16);
    assert_conserved(&pmm);
}

#[test]
fn chained_pool_extends_capacity() {
    let mut first = Backing::new(100);
    let mut second = Backing::new(100);

    let pool = SlotPool::new(&mut first.bitmap, &mut first.slots).unwrap();
    let mut arena = Arena::new(pool);
    arena
        .chain(SlotPool::new(&mut second.bitmap, &mut second.slots).unwrap())
        .unwrap();
    assert_eq!(arena.capacity(), 200);

    let mut pmm = BootMemoryManager::new(arena, PmmConfig::default());
    for page in 0..120u64 {
        // Every other page, so nothing coalesces.
        pmm.add_free(0x100000 + page * 0x2000, 1).unwrap();
    }
    assert_eq!(pmm.arena().available(), 80);
    assert_eq!(
        pmm.alloc(AllocMode::Any, 0, u64::MAX, 1, MemoryKind::KernelData, 0),
        Err(AllocError::ArenaExhausted)
    );
}
