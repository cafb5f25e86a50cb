//! Pooled slab allocator core
//!
//! This crate implements the lowest tier of a pooled memory allocator:
//! - Slabs that split one page-sized run into equal elements tracked by a bitmap
//! - Circular per-size-class free lists of slabs that still have room
//! - Packed 64-bit handles that resolve an element back to its run in O(1)
//! - An arena lock that guards every slab and free list it owns
//!
//! Choosing a size class for a request and carving runs out of regions is left
//! to the layers above.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default run (page) size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 0x2000;

/// Smallest element size a subdivided run is expected to carry.
pub const MIN_ELEM_SIZE: usize = 16;

/// The error type used for slab construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid element size for the run (e.g. larger than the page).
    InvalidParam,
    /// No enough memory to allocate.
    NoMemory,
    /// Deallocate an unallocated element.
    NotAllocated,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// The region that owns the memory backing a slab.
///
/// A region hands out page-sized runs; a slab gives its run back through this
/// trait when it is destroyed.
pub trait RunRegion {
    /// Release the run `[run_offset, run_offset + page_size)` identified by
    /// `memory_map_idx`.
    fn release_run(&mut self, memory_map_idx: u32, run_offset: usize, page_size: usize);
}

/// Read-only occupancy metrics of a slab.
pub trait SlabMetric {
    /// Number of elements the run is divided into.
    fn max_num_elements(&self) -> usize;

    /// Number of elements currently free.
    fn num_available(&self) -> usize;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Size of the run in bytes.
    fn page_size(&self) -> usize;
}

pub mod slab;
pub use slab::{ElementBitmap, Slab, SlabHandle, SlabId, SlabPool};
#[cfg(feature = "tracking")]
pub use slab::SlabStats;

pub mod arena;
pub use arena::{Arena, SlabRef};
