//! # Boot Memory Configuration and Handoff Interface
//!
//! This crate defines the data structures and compile-time constants shared
//! between the UEFI loader and the boot-stage physical memory manager
//! (`kernel-pmm`). It is the single source of truth for page geometry, the
//! buddy order range and the sizing of the PMM descriptor pool.
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! The loader-to-PMM handoff:
//! * **Memory map**: raw location and stride of the firmware memory map
//! * **Boot blocks**: loader data runs that must be preserved
//! * **PMM region**: the raw memory the descriptor pool is carved from
//!
//! ### Memory Configuration ([`memory`])
//! * **Page geometry**: `PAGE_SHIFT` / `PAGE_SIZE`
//! * **Buddy orders**: `BUDDY_ORDERS`, `MAX_ORDER`
//! * **Low memory**: the 1 MiB threshold below which RAM is never handed out
//! * **Pool sizing**: capacity bounds and the per-allocation reserve
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │  reserved as LOWEST_MEMORY
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │  Loader data / boot blocks      │  tracked as allocated
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │  buddy free lists
//!             ├─────────────────────────────────┤
//!             │  Firmware / ACPI / MMIO         │  reserved
//!             └─────────────────────────────────┘
//! ```
//!
//! All public structures are `#[repr(C)]` so the loader can hand them over
//! as-is.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
