//! Block descriptors stored in the slot arena.

use crate::address::{PhysicalAddress, pages_to_bytes};
use crate::handle::Handle;
use bitfield_struct::bitfield;

/// Classification of a tracked physical range.
///
/// The discriminants are stable; they are packed into [`FrameTag`] and
/// handed to the kernel as-is.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MemoryKind {
    /// Reserved by firmware or unusable.
    AosReserved = 0,
    /// Free RAM.
    Available = 1,
    /// ACPI tables that may be reclaimed once parsed.
    AcpiTable = 2,
    /// ACPI non-volatile storage.
    AcpiNvs = 3,
    /// UEFI runtime services code.
    FirmwareCode = 4,
    /// UEFI runtime services data.
    FirmwareData = 5,
    KernelCode = 6,
    KernelData = 7,
    UserCode = 8,
    UserData = 9,
    /// Memory mapped I/O and port space.
    Mmio = 10,
    /// Conventional memory below 1 MiB.
    LowestMemory = 11,
    /// Data the loader placed in memory for the kernel.
    LoaderData = 12,
}

impl MemoryKind {
    /// Number of defined kinds; raw values at or above this are invalid.
    pub const COUNT: u8 = 13;

    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Decodes a raw discriminant, mapping unknown values to
    /// [`MemoryKind::AosReserved`].
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match Self::from_raw(value) {
            Some(kind) => kind,
            None => Self::AosReserved,
        }
    }

    /// Decodes a raw discriminant, rejecting out-of-range values.
    #[must_use]
    pub const fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::AosReserved,
            1 => Self::Available,
            2 => Self::AcpiTable,
            3 => Self::AcpiNvs,
            4 => Self::FirmwareCode,
            5 => Self::FirmwareData,
            6 => Self::KernelCode,
            7 => Self::KernelData,
            8 => Self::UserCode,
            9 => Self::UserData,
            10 => Self::Mmio,
            11 => Self::LowestMemory,
            12 => Self::LoaderData,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for MemoryKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_raw(value).ok_or(value)
    }
}

/// Packed tag of a [`PageFrame`].
///
/// | Bits  | Field   |
/// |-------|---------|
/// | 0–7   | kind    |
/// | 8–31  | unused  |
/// | 32–63 | owner   |
#[bitfield(u64)]
pub struct FrameTag {
    /// Raw [`MemoryKind`] discriminant.
    pub kind: u8,
    #[bits(24)]
    __: u32,
    /// Owning processor id.
    pub owner: u32,
}

/// Node color of the intrusive red-black tree links.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Color {
    #[default]
    Red,
    Black,
}

/// Intrusive red-black tree linkage.
///
/// Only the tree module rewrites these fields; a descriptor's payload
/// never moves while it is linked.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TreeLink {
    pub parent: Option<Handle>,
    pub left: Option<Handle>,
    pub right: Option<Handle>,
    pub color: Color,
}

impl TreeLink {
    /// A freshly created, unlinked red node.
    pub const DETACHED: Self = Self {
        parent: None,
        left: None,
        right: None,
        color: Color::Red,
    };
}

/// Block descriptor: one contiguous run of 4 KiB page frames.
#[derive(Debug, Copy, Clone, Default)]
pub struct PageFrame {
    /// Physical base address of the run.
    pub base: u64,
    /// Length of the run in pages.
    pub pages: u64,
    tag: FrameTag,
    pub(crate) link: TreeLink,
}

impl PageFrame {
    /// An all-zero, unlinked descriptor.
    pub const EMPTY: Self = Self {
        base: 0,
        pages: 0,
        tag: FrameTag::new(),
        link: TreeLink::DETACHED,
    };

    #[must_use]
    pub const fn new(base: u64, pages: u64, kind: MemoryKind, owner: u32) -> Self {
        Self {
            base,
            pages,
            tag: FrameTag::new().with_kind(kind.into_bits()).with_owner(owner),
            link: TreeLink::DETACHED,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        MemoryKind::from_bits(self.tag.kind())
    }

    #[inline]
    pub fn set_kind(&mut self, kind: MemoryKind) {
        self.tag.set_kind(kind.into_bits());
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> u32 {
        self.tag.owner()
    }

    #[inline]
    pub fn set_owner(&mut self, owner: u32) {
        self.tag.set_owner(owner);
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Length of the run in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        pages_to_bytes(self.pages)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pages == 0
    }

    /// Last byte address covered by the run (inclusive).
    #[inline]
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.base.saturating_add(self.len().saturating_sub(1))
    }

    /// First byte address after the run, saturating at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.len())
    }

    /// The tree linkage of this descriptor.
    #[inline]
    #[must_use]
    pub const fn link(&self) -> &TreeLink {
        &self.link
    }
}
