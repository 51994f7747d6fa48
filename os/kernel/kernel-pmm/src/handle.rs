use core::fmt;

/// Opaque reference to a [`PageFrame`](crate::PageFrame) slot.
///
/// The low 16 bits select the slot within a pool, the remaining bits select
/// the pool within the chain. There is no reserved "undefined" value; absence
/// is always expressed as `Option<Handle>`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Handle(u64);

impl Handle {
    const SLOT_BITS: u32 = 16;
    const SLOT_MASK: u64 = (1 << Self::SLOT_BITS) - 1;

    #[inline]
    #[must_use]
    pub const fn new(pool: usize, slot: u16) -> Self {
        Self(((pool as u64) << Self::SLOT_BITS) | slot as u64)
    }

    /// Reconstructs a handle from its raw composite value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Position of the owning pool in the chain.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn pool(self) -> usize {
        (self.0 >> Self::SLOT_BITS) as usize
    }

    /// Slot index within the owning pool.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn slot(self) -> u16 {
        (self.0 & Self::SLOT_MASK) as u16
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{})", self.pool(), self.slot())
    }
}
