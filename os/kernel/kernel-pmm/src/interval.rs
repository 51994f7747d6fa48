//! Ordering relations over page runs.
//!
//! Every tree in the PMM is keyed by address interval. [`compare`] is both
//! the ordering used for insertion and an overlap detector: any result other
//! than [`IntervalOrdering::Less`] or [`IntervalOrdering::Greater`] means the
//! two runs share at least one byte.

use crate::frame::PageFrame;

/// Relation of a `left` run to a `right` run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntervalOrdering {
    /// `left` ends before `right` starts.
    Less,
    /// `left` starts after `right` ends.
    Greater,
    /// `left` covers `right` entirely, including the identical case.
    EqualOrLeftCovers,
    /// `right` covers `left` entirely.
    RightCovers,
    /// `left` starts first and ends inside `right`.
    LeftInterleavesRight,
    /// `right` starts first and ends inside `left`.
    RightInterleavesLeft,
}

impl IntervalOrdering {
    /// Whether the two runs are disjoint.
    #[inline]
    #[must_use]
    pub const fn is_disjoint(self) -> bool {
        matches!(self, Self::Less | Self::Greater)
    }
}

/// Location of a run relative to a single address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Position {
    /// The run ends below the address.
    Less,
    /// The address lies within the run.
    Contains,
    /// The run starts above the address.
    Greater,
}

/// Compares two page runs by their closed byte intervals.
#[must_use]
pub const fn compare(left: &PageFrame, right: &PageFrame) -> IntervalOrdering {
    let (la, lb) = (left.base, left.last());
    let (ra, rb) = (right.base, right.last());

    if lb < ra {
        IntervalOrdering::Less
    } else if rb < la {
        IntervalOrdering::Greater
    } else if la <= ra && rb <= lb {
        IntervalOrdering::EqualOrLeftCovers
    } else if ra <= la && lb <= rb {
        IntervalOrdering::RightCovers
    } else if la < ra {
        IntervalOrdering::LeftInterleavesRight
    } else {
        IntervalOrdering::RightInterleavesLeft
    }
}

/// Locates `node` relative to `addr`.
#[must_use]
pub const fn position(node: &PageFrame, addr: u64) -> Position {
    if addr < node.base {
        Position::Greater
    } else if addr <= node.last() {
        Position::Contains
    } else {
        Position::Less
    }
}
