//! # Handle-Indexed Red-Black Tree
//!
//! A red-black tree whose nodes are arena slots. The tree itself is just a
//! root [`Handle`]; every step of every operation resolves handles through a
//! [`NodeStore`] and only ever rewrites the intrusive [`TreeLink`] of a node,
//! never its payload. A node therefore keeps its slot (and handle) while the
//! tree rotates around it.
//!
//! Ordering is injected per call: [`RbTree::insert`] takes an interval
//! comparator and [`RbTree::find`] a position comparator. Insertion only
//! accepts strictly ordered keys; an overlapping key is rejected before the
//! tree is touched.
//!
//! `None` plays the role of the classic black sentinel leaf.

use crate::frame::{Color, TreeLink};
use crate::handle::Handle;
use crate::interval::{IntervalOrdering, Position};

/// Storage that resolves [`Handle`]s to node payloads and links.
pub trait NodeStore {
    type Value;

    fn value(&self, node: Handle) -> Option<&Self::Value>;

    fn link(&self, node: Handle) -> Option<&TreeLink>;

    fn link_mut(&mut self, node: Handle) -> Option<&mut TreeLink>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InsertError {
    /// The new node shares addresses with a node already in the tree.
    #[error("overlap detected ({0:?})")]
    Overlap(IntervalOrdering),
    /// A handle did not resolve to a live node.
    #[error("handle {0:?} does not resolve to a node")]
    InvalidHandle(Handle),
}

/// Root of a red-black tree over arena handles.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RbTree {
    root: Option<Handle>,
}

impl RbTree {
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> Option<Handle> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Links `node` into the tree.
    ///
    /// `compare(existing, new)` must return [`IntervalOrdering::Greater`]
    /// when `existing` sorts after `new` and [`IntervalOrdering::Less`] when
    /// it sorts before. Any other outcome aborts the insert.
    ///
    /// # Errors
    /// [`InsertError::Overlap`] if the comparator reports a non-ordering
    /// relation; the tree and `node` are left untouched.
    pub fn insert<S, F>(
        &mut self,
        store: &mut S,
        node: Handle,
        compare: F,
    ) -> Result<(), InsertError>
    where
        S: NodeStore,
        F: Fn(&S::Value, &S::Value) -> IntervalOrdering,
    {
        let value = store.value(node).ok_or(InsertError::InvalidHandle(node))?;

        let mut parent = None;
        let mut go_left = false;
        let mut current = self.root;
        while let Some(c) = current {
            let existing = store.value(c).ok_or(InsertError::InvalidHandle(c))?;
            parent = Some(c);
            match compare(existing, value) {
                IntervalOrdering::Greater => {
                    go_left = true;
                    current = left(store, c);
                }
                IntervalOrdering::Less => {
                    go_left = false;
                    current = right(store, c);
                }
                other => return Err(InsertError::Overlap(other)),
            }
        }

        if let Some(link) = store.link_mut(node) {
            *link = TreeLink {
                parent,
                ..TreeLink::DETACHED
            };
        }

        match parent {
            None => self.root = Some(node),
            Some(p) if go_left => set_left(store, p, Some(node)),
            Some(p) => set_right(store, p, Some(node)),
        }

        self.insert_fixup(store, node);
        Ok(())
    }

    fn insert_fixup<S: NodeStore>(&mut self, store: &mut S, mut node: Handle) {
        while let Some(p) = parent(store, node) {
            if color(store, Some(p)) == Color::Black {
                break;
            }

            // A red parent is never the root, so the grandparent exists.
            let Some(g) = parent(store, p) else {
                break;
            };

            if left(store, g) == Some(p) {
                let uncle = right(store, g);
                if color(store, uncle) == Color::Red {
                    set_color(store, Some(p), Color::Black);
                    set_color(store, uncle, Color::Black);
                    set_color(store, Some(g), Color::Red);
                    node = g;
                    continue;
                }

                if right(store, p) == Some(node) {
                    node = p;
                    self.rotate_left(store, node);
                }

                let Some(p) = parent(store, node) else { break };
                let Some(g) = parent(store, p) else { break };
                set_color(store, Some(p), Color::Black);
                set_color(store, Some(g), Color::Red);
                self.rotate_right(store, g);
            } else {
                let uncle = left(store, g);
                if color(store, uncle) == Color::Red {
                    set_color(store, Some(p), Color::Black);
                    set_color(store, uncle, Color::Black);
                    set_color(store, Some(g), Color::Red);
                    node = g;
                    continue;
                }

                if left(store, p) == Some(node) {
                    node = p;
                    self.rotate_right(store, node);
                }

                let Some(p) = parent(store, node) else { break };
                let Some(g) = parent(store, p) else { break };
                set_color(store, Some(p), Color::Black);
                set_color(store, Some(g), Color::Red);
                self.rotate_left(store, g);
            }
        }

        set_color(store, self.root, Color::Black);
    }

    /// Unlinks `node` from the tree.
    ///
    /// Returns `false` (and changes nothing) if `node` is not a member of
    /// this tree. On success the node's links are reset; its slot stays
    /// allocated.
    pub fn remove<S: NodeStore>(&mut self, store: &mut S, node: Handle) -> bool {
        if !self.contains(store, node) {
            return false;
        }

        let node_left = left(store, node);
        let node_right = right(store, node);

        let removed_color;
        let child;
        let child_parent;

        match (node_left, node_right) {
            (None, _) => {
                removed_color = color(store, Some(node));
                child = node_right;
                child_parent = parent(store, node);
                self.transplant(store, node, node_right);
            }
            (_, None) => {
                removed_color = color(store, Some(node));
                child = node_left;
                child_parent = parent(store, node);
                self.transplant(store, node, node_left);
            }
            (Some(l), Some(r)) => {
                // Two children: the in-order successor takes the node's place.
                let successor = minimum(store, r);
                removed_color = color(store, Some(successor));
                child = right(store, successor);

                if parent(store, successor) == Some(node) {
                    child_parent = Some(successor);
                } else {
                    child_parent = parent(store, successor);
                    self.transplant(store, successor, child);
                    set_right(store, successor, Some(r));
                    set_parent(store, r, Some(successor));
                }

                self.transplant(store, node, Some(successor));
                set_left(store, successor, Some(l));
                set_parent(store, l, Some(successor));
                set_color(store, Some(successor), color(store, Some(node)));
            }
        }

        if removed_color == Color::Black {
            self.remove_fixup(store, child, child_parent);
        }

        if let Some(link) = store.link_mut(node) {
            *link = TreeLink::DETACHED;
        }
        true
    }

    fn remove_fixup<S: NodeStore>(
        &mut self,
        store: &mut S,
        mut node: Option<Handle>,
        mut node_parent: Option<Handle>,
    ) {
        while node != self.root && color(store, node) == Color::Black {
            let Some(p) = node_parent else {
                break;
            };

            if left(store, p) == node {
                let mut sibling = right(store, p);
                if color(store, sibling) == Color::Red {
                    set_color(store, sibling, Color::Black);
                    set_color(store, Some(p), Color::Red);
                    self.rotate_left(store, p);
                    sibling = right(store, p);
                }

                let near = sibling.and_then(|s| left(store, s));
                let far = sibling.and_then(|s| right(store, s));
                if color(store, near) == Color::Black && color(store, far) == Color::Black {
                    set_color(store, sibling, Color::Red);
                    node = Some(p);
                    node_parent = parent(store, p);
                    continue;
                }

                if color(store, far) == Color::Black {
                    set_color(store, near, Color::Black);
                    set_color(store, sibling, Color::Red);
                    if let Some(s) = sibling {
                        self.rotate_right(store, s);
                    }
                    sibling = right(store, p);
                }

                set_color(store, sibling, color(store, Some(p)));
                set_color(store, Some(p), Color::Black);
                set_color(store, sibling.and_then(|s| right(store, s)), Color::Black);
                self.rotate_left(store, p);
            } else {
                let mut sibling = left(store, p);
                if color(store, sibling) == Color::Red {
                    set_color(store, sibling, Color::Black);
                    set_color(store, Some(p), Color::Red);
                    self.rotate_right(store, p);
                    sibling = left(store, p);
                }

                let near = sibling.and_then(|s| right(store, s));
                let far = sibling.and_then(|s| left(store, s));
                if color(store, near) == Color::Black && color(store, far) == Color::Black {
                    set_color(store, sibling, Color::Red);
                    node = Some(p);
                    node_parent = parent(store, p);
                    continue;
                }

                if color(store, far) == Color::Black {
                    set_color(store, near, Color::Black);
                    set_color(store, sibling, Color::Red);
                    if let Some(s) = sibling {
                        self.rotate_left(store, s);
                    }
                    sibling = left(store, p);
                }

                set_color(store, sibling, color(store, Some(p)));
                set_color(store, Some(p), Color::Black);
                set_color(store, sibling.and_then(|s| left(store, s)), Color::Black);
                self.rotate_right(store, p);
            }

            node = self.root;
            node_parent = None;
        }

        set_color(store, node, Color::Black);
    }

    /// Whether `node` is linked into this tree.
    pub fn contains<S: NodeStore>(&self, store: &S, node: Handle) -> bool {
        if store.link(node).is_none() {
            return false;
        }

        let mut current = node;
        while let Some(p) = parent(store, current) {
            current = p;
        }
        self.root == Some(current)
    }

    /// Finds the node whose interval contains `addr`.
    ///
    /// `position(value, addr)` locates a node relative to the address.
    pub fn find<S, F>(&self, store: &S, addr: u64, position: F) -> Option<Handle>
    where
        S: NodeStore,
        F: Fn(&S::Value, u64) -> Position,
    {
        let mut current = self.root;
        while let Some(c) = current {
            match position(store.value(c)?, addr) {
                Position::Contains => return Some(c),
                Position::Greater => current = left(store, c),
                Position::Less => current = right(store, c),
            }
        }
        None
    }

    /// Finds a node sharing addresses with `value`.
    ///
    /// Nodes of one tree are disjoint, so a single descent guided by
    /// `compare(existing, value)` reaches an overlapping node if one exists.
    pub fn find_overlap<S, F>(
        &self,
        store: &S,
        value: &S::Value,
        compare: F,
    ) -> Option<(Handle, IntervalOrdering)>
    where
        S: NodeStore,
        F: Fn(&S::Value, &S::Value) -> IntervalOrdering,
    {
        let mut current = self.root;
        while let Some(c) = current {
            match compare(store.value(c)?, value) {
                IntervalOrdering::Greater => current = left(store, c),
                IntervalOrdering::Less => current = right(store, c),
                other => return Some((c, other)),
            }
        }
        None
    }

    /// Lowest node.
    pub fn first<S: NodeStore>(&self, store: &S) -> Option<Handle> {
        self.root.map(|root| minimum(store, root))
    }

    /// Highest node.
    pub fn last<S: NodeStore>(&self, store: &S) -> Option<Handle> {
        self.root.map(|root| maximum(store, root))
    }

    /// In-order successor of `node`.
    pub fn next<S: NodeStore>(store: &S, node: Handle) -> Option<Handle> {
        if let Some(r) = right(store, node) {
            return Some(minimum(store, r));
        }

        let mut current = node;
        let mut up = parent(store, current);
        while let Some(p) = up {
            if right(store, p) != Some(current) {
                break;
            }
            current = p;
            up = parent(store, p);
        }
        up
    }

    /// In-order predecessor of `node`.
    pub fn prev<S: NodeStore>(store: &S, node: Handle) -> Option<Handle> {
        if let Some(l) = left(store, node) {
            return Some(maximum(store, l));
        }

        let mut current = node;
        let mut up = parent(store, current);
        while let Some(p) = up {
            if left(store, p) != Some(current) {
                break;
            }
            current = p;
            up = parent(store, p);
        }
        up
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth<S: NodeStore>(&self, store: &S) -> usize {
        fn walk<S: NodeStore>(store: &S, node: Option<Handle>) -> usize {
            node.map_or(0, |n| 1 + walk(store, left(store, n)).max(walk(store, right(store, n))))
        }
        walk(store, self.root)
    }

    /// In-order iterator over the tree's handles.
    pub fn iter<'s, S: NodeStore>(&self, store: &'s S) -> Iter<'s, S> {
        Iter {
            store,
            next: self.first(store),
        }
    }

    fn rotate_left<S: NodeStore>(&mut self, store: &mut S, node: Handle) {
        let Some(pivot) = right(store, node) else {
            return;
        };

        let inner = left(store, pivot);
        set_right(store, node, inner);
        if let Some(inner) = inner {
            set_parent(store, inner, Some(node));
        }

        self.replace_child(store, node, pivot);
        set_left(store, pivot, Some(node));
        set_parent(store, node, Some(pivot));
    }

    fn rotate_right<S: NodeStore>(&mut self, store: &mut S, node: Handle) {
        let Some(pivot) = left(store, node) else {
            return;
        };

        let inner = right(store, pivot);
        set_left(store, node, inner);
        if let Some(inner) = inner {
            set_parent(store, inner, Some(node));
        }

        self.replace_child(store, node, pivot);
        set_right(store, pivot, Some(node));
        set_parent(store, node, Some(pivot));
    }

    /// Points `old`'s parent (or the root) at `new` and adopts `old`'s parent.
    fn replace_child<S: NodeStore>(&mut self, store: &mut S, old: Handle, new: Handle) {
        self.transplant(store, old, Some(new));
    }

    fn transplant<S: NodeStore>(&mut self, store: &mut S, old: Handle, new: Option<Handle>) {
        let p = parent(store, old);
        match p {
            None => self.root = new,
            Some(p) if left(store, p) == Some(old) => set_left(store, p, new),
            Some(p) => set_right(store, p, new),
        }
        if let Some(new) = new {
            set_parent(store, new, p);
        }
    }
}

/// In-order iterator returned by [`RbTree::iter`].
pub struct Iter<'s, S> {
    store: &'s S,
    next: Option<Handle>,
}

impl<S: NodeStore> Iterator for Iter<'_, S> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        let current = self.next?;
        self.next = RbTree::next(self.store, current);
        Some(current)
    }
}

fn parent<S: NodeStore>(store: &S, node: Handle) -> Option<Handle> {
    store.link(node).and_then(|l| l.parent)
}

fn left<S: NodeStore>(store: &S, node: Handle) -> Option<Handle> {
    store.link(node).and_then(|l| l.left)
}

fn right<S: NodeStore>(store: &S, node: Handle) -> Option<Handle> {
    store.link(node).and_then(|l| l.right)
}

/// Color of a possibly absent node; absent leaves are black.
fn color<S: NodeStore>(store: &S, node: Option<Handle>) -> Color {
    node.and_then(|n| store.link(n))
        .map_or(Color::Black, |l| l.color)
}

fn set_parent<S: NodeStore>(store: &mut S, node: Handle, value: Option<Handle>) {
    if let Some(link) = store.link_mut(node) {
        link.parent = value;
    }
}

fn set_left<S: NodeStore>(store: &mut S, node: Handle, value: Option<Handle>) {
    if let Some(link) = store.link_mut(node) {
        link.left = value;
    }
}

fn set_right<S: NodeStore>(store: &mut S, node: Handle, value: Option<Handle>) {
    if let Some(link) = store.link_mut(node) {
        link.right = value;
    }
}

fn set_color<S: NodeStore>(store: &mut S, node: Option<Handle>, value: Color) {
    if let Some(link) = node.and_then(|n| store.link_mut(n)) {
        link.color = value;
    }
}

fn minimum<S: NodeStore>(store: &S, mut node: Handle) -> Handle {
    while let Some(l) = left(store, node) {
        node = l;
    }
    node
}

fn maximum<S: NodeStore>(store: &S, mut node: Handle) -> Handle {
    while let Some(r) = right(store, node) {
        node = r;
    }
    node
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{MemoryKind, PageFrame};
    use crate::interval::{compare, position};
    use crate::pool::{Arena, SlotPool};

    const CAPACITY: usize = 512;

    struct Backing {
        bitmap: Vec<u64>,
        slots: Vec<PageFrame>,
    }

    impl Backing {
        fn new() -> Self {
            Self {
                bitmap: vec![0; SlotPool::bitmap_words(CAPACITY)],
                slots: vec![PageFrame::EMPTY; CAPACITY],
            }
        }

        fn arena(&mut self) -> Arena<'_> {
            Arena::new(SlotPool::new(&mut self.bitmap, &mut self.slots).unwrap())
        }
    }

    fn add(tree: &mut RbTree, arena: &mut Arena<'_>, base: u64, pages: u64) -> Handle {
        let h = arena
            .alloc_frame(PageFrame::new(base, pages, MemoryKind::Available, 0))
            .unwrap();
        tree.insert(arena, h, compare).unwrap();
        h
    }

    fn bases(tree: &RbTree, arena: &Arena<'_>) -> Vec<u64> {
        tree.iter(arena).map(|h| arena.content(h).unwrap().base).collect()
    }

    /// Verifies parent links, ordering, the red rule and equal black heights.
    fn check(tree: &RbTree, arena: &Arena<'_>) {
        fn black_height(arena: &Arena<'_>, node: Option<Handle>, parent: Option<Handle>) -> usize {
            let Some(n) = node else { return 1 };
            let link = *arena.link(n).unwrap();
            assert_eq!(link.parent, parent, "broken parent link at {n:?}");
            if link.color == Color::Red {
                assert_eq!(color(arena, link.left), Color::Black, "red-red at {n:?}");
                assert_eq!(color(arena, link.right), Color::Black, "red-red at {n:?}");
            }
            let l = black_height(arena, link.left, Some(n));
            let r = black_height(arena, link.right, Some(n));
            assert_eq!(l, r, "black height mismatch at {n:?}");
            l + usize::from(link.color == Color::Black)
        }

        assert_eq!(color(arena, tree.root()), Color::Black);
        black_height(arena, tree.root(), None);

        let b = bases(tree, arena);
        assert!(b.windows(2).all(|w| w[0] < w[1]), "not sorted: {b:?}");
    }

    #[test]
    fn insert_keeps_order_and_balance() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();

        for i in 0..200u64 {
            // Scatter insert order.
            let key = (i * 73) % 200;
            add(&mut tree, &mut arena, key * 0x1000, 1);
            check(&tree, &arena);
        }

        assert_eq!(bases(&tree, &arena), (0..200).map(|k| k * 0x1000).collect::<Vec<_>>());
        // A red-black tree of n nodes is at most 2*log2(n+1) deep.
        assert!(tree.depth(&arena) <= 16);
    }

    #[test]
    fn overlap_is_rejected_without_side_effects() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();
        add(&mut tree, &mut arena, 0x4000, 4);
        add(&mut tree, &mut arena, 0x10000, 1);

        let before = bases(&tree, &arena);
        let h = arena
            .alloc_frame(PageFrame::new(0x6000, 4, MemoryKind::Available, 0))
            .unwrap();
        assert_eq!(
            tree.insert(&mut arena, h, compare),
            Err(InsertError::Overlap(IntervalOrdering::LeftInterleavesRight))
        );

        // Starts below the root and ends inside it.
        let g = arena
            .alloc_frame(PageFrame::new(0x3000, 2, MemoryKind::Available, 0))
            .unwrap();
        assert_eq!(
            tree.insert(&mut arena, g, compare),
            Err(InsertError::Overlap(IntervalOrdering::RightInterleavesLeft))
        );

        assert_eq!(bases(&tree, &arena), before);
        assert!(!tree.contains(&arena, h));
        assert!(!tree.contains(&arena, g));
        check(&tree, &arena);
    }

    #[test]
    fn find_overlap_descends_to_the_shared_node() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();
        for k in 0..32u64 {
            add(&mut tree, &mut arena, k * 0x4000, 2);
        }

        let gap = PageFrame::new(0x2000, 2, MemoryKind::Available, 0);
        assert_eq!(tree.find_overlap(&arena, &gap, compare), None);

        let straddling = PageFrame::new(0x1D000, 2, MemoryKind::Available, 0);
        let (h, ordering) = tree.find_overlap(&arena, &straddling, compare).unwrap();
        assert_eq!(arena.content(h).unwrap().base, 0x1C000);
        assert_eq!(ordering, IntervalOrdering::LeftInterleavesRight);

        let covering = PageFrame::new(0x40000, 64, MemoryKind::Available, 0);
        let (_, ordering) = tree.find_overlap(&arena, &covering, compare).unwrap();
        assert_eq!(ordering, IntervalOrdering::RightCovers);
    }

    #[test]
    fn remove_every_shape() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();

        let handles: Vec<_> = (0..128u64)
            .map(|k| add(&mut tree, &mut arena, k * 0x1000, 1))
            .collect();

        // Remove in an order that hits leaves, single-child and two-child nodes.
        let mut remaining: Vec<u64> = (0..128).collect();
        for i in 0..128u64 {
            let k = (i * 37 + 11) % 128;
            assert!(tree.remove(&mut arena, handles[k as usize]));
            assert_eq!(*arena.link(handles[k as usize]).unwrap(), TreeLink::DETACHED);
            remaining.retain(|&r| r != k);
            check(&tree, &arena);
            assert_eq!(
                bases(&tree, &arena),
                remaining.iter().map(|k| k * 0x1000).collect::<Vec<_>>()
            );
        }

        assert!(tree.is_empty());
    }

    #[test]
    fn remove_foreign_node_is_refused() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut a = RbTree::new();
        let mut b = RbTree::new();
        add(&mut a, &mut arena, 0x1000, 1);
        let hb = add(&mut b, &mut arena, 0x2000, 1);

        assert!(!a.remove(&mut arena, hb));
        assert!(b.contains(&arena, hb));
        assert!(b.remove(&mut arena, hb));
        assert!(b.is_empty());
    }

    #[test]
    fn navigation() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();
        assert_eq!(tree.first(&arena), None);
        assert_eq!(tree.last(&arena), None);

        let hs: Vec<_> = [5u64, 1, 9, 3, 7]
            .iter()
            .map(|k| add(&mut tree, &mut arena, k * 0x1000, 1))
            .collect();

        let (h5, h1, h9, h3, h7) = (hs[0], hs[1], hs[2], hs[3], hs[4]);
        assert_eq!(tree.first(&arena), Some(h1));
        assert_eq!(tree.last(&arena), Some(h9));
        assert_eq!(RbTree::next(&arena, h3), Some(h5));
        assert_eq!(RbTree::next(&arena, h9), None);
        assert_eq!(RbTree::prev(&arena, h7), Some(h5));
        assert_eq!(RbTree::prev(&arena, h5), Some(h3));
        assert_eq!(RbTree::prev(&arena, h1), None);
    }

    #[test]
    fn find_by_address() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();
        let a = add(&mut tree, &mut arena, 0x1000, 2);
        let b = add(&mut tree, &mut arena, 0x8000, 8);

        assert_eq!(tree.find(&arena, 0x1000, position), Some(a));
        assert_eq!(tree.find(&arena, 0x2FFF, position), Some(a));
        assert_eq!(tree.find(&arena, 0x3000, position), None);
        assert_eq!(tree.find(&arena, 0xF123, position), Some(b));
        assert_eq!(tree.find(&arena, 0x10000, position), None);
    }

    #[test]
    fn payload_slots_are_stable() {
        let mut backing = Backing::new();
        let mut arena = backing.arena();
        let mut tree = RbTree::new();
        let hs: Vec<_> = (0..32u64)
            .map(|k| add(&mut tree, &mut arena, k * 0x2000, 2))
            .collect();
        tree.remove(&mut arena, hs[10]);
        tree.remove(&mut arena, hs[0]);

        for (k, h) in hs.iter().enumerate() {
            let frame = arena.content(*h).unwrap();
            assert_eq!(frame.base, k as u64 * 0x2000);
            assert_eq!(frame.pages, 2);
        }
    }
}
