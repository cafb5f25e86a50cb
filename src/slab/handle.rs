//! Packed allocation handles.
//!
//! Layout of the 64-bit value:
//!
//! ```text
//!  63 62 61                          32 31                           0
//! +--+--+------------------------------+------------------------------+
//! |  |1 |        element index         |      region coordinate       |
//! +--+--+------------------------------+------------------------------+
//! ```
//!
//! Bit 62 marks a handle that points into a slab rather than a whole run.
//! The element index occupies bits 63..32, but valid indices stay below
//! `2^30` so they never reach the marker bit.

use core::fmt;

/// Marker bit that tags a handle as slab-backed.
pub const SLAB_MARKER: u64 = 1 << 62;
/// Shift of the element index field.
pub const INDEX_SHIFT: u32 = 32;
/// Mask of the element index once shifted down, marker excluded.
pub const INDEX_MASK: u64 = (1 << 30) - 1;
/// Mask of the region coordinate field.
pub const COORDINATE_MASK: u64 = u32::MAX as u64;
/// Largest element index a handle can carry.
pub const MAX_ELEMENT_INDEX: usize = INDEX_MASK as usize;

/// Handle of one allocated element: `(element index, region coordinate)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabHandle(u64);

impl SlabHandle {
    /// Pack an element index and the region coordinate of its slab.
    pub const fn new(bitmap_idx: usize, memory_map_idx: u32) -> Self {
        debug_assert!(bitmap_idx <= MAX_ELEMENT_INDEX);
        Self(SLAB_MARKER | (bitmap_idx as u64) << INDEX_SHIFT | memory_map_idx as u64)
    }

    /// Wrap a raw value previously obtained from [`SlabHandle::raw`].
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether the marker bit is set.
    pub const fn is_slab(self) -> bool {
        self.0 & SLAB_MARKER != 0
    }

    /// Element index within the slab.
    pub const fn bitmap_idx(self) -> usize {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as usize
    }

    /// Region coordinate of the slab's run.
    pub const fn memory_map_idx(self) -> u32 {
        (self.0 & COORDINATE_MASK) as u32
    }
}

impl fmt::Debug for SlabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabHandle")
            .field("raw", &format_args!("{:#018x}", self.0))
            .field("bitmap_idx", &self.bitmap_idx())
            .field("memory_map_idx", &self.memory_map_idx())
            .finish()
    }
}
