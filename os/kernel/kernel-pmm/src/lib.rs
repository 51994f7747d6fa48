//! # Boot-Stage Physical Memory Manager
//!
//! Tracks every physical page frame from the moment the loader exits boot
//! services until the kernel brings up its own allocators.
//!
//! ## Building blocks
//!
//! * [`pool`]: bitmap-managed descriptor slots, chained into an [`Arena`].
//!   A [`Handle`] names one slot.
//! * [`tree`]: a red-black tree over handles; ordering is an interval
//!   comparison that rejects overlapping runs.
//! * [`buddy`]: 52 order classes of free blocks, each a tree.
//! * [`manager`]: the allocation interface, plus the allocated and
//!   reserved trees.
//! * [`mmap`]: ingestion of the firmware memory map.
//!
//! ```text
//!             ┌──────────────────── BootMemoryManager ───────────────────┐
//!             │                                                          │
//!  alloc ───► │  buddy orders 0..=51   allocated tree   reserved tree    │
//!  free  ───► │   RbTree × 52             RbTree           RbTree        │
//!             │        │                     │                │          │
//!             │        └──── handles ────────┴────────────────┘          │
//!             │                    ▼                                     │
//!             │   Arena: SlotPool ─► SlotPool ─► …  (PageFrame slots)    │
//!             └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every tracked page is in exactly one tree at a time. Nothing here
//! allocates from a heap, and there is no locking; callers on more than one
//! core must serialize access themselves.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod address;
pub mod buddy;
pub mod frame;
pub mod handle;
pub mod interval;
pub mod manager;
pub mod mmap;
pub mod pool;
pub mod tree;

pub use address::PhysicalAddress;
pub use buddy::{BuddyAllocator, BuddyError, Strategy};
pub use frame::{MemoryKind, PageFrame};
pub use handle::Handle;
pub use interval::{IntervalOrdering, Position};
pub use manager::{AllocError, AllocMode, BootMemoryManager, PmmConfig};
pub use mmap::{InitError, MemoryRegion, classify};
pub use pool::{Arena, PoolError, SlotPool};
pub use tree::{InsertError, RbTree};
