//! Slab allocator implementation.
//!
//! This module splits page-sized runs into fixed-size elements and keeps
//! the runs that still have free elements on per-size-class pooled lists.

pub mod bitmap;
pub mod handle;
pub mod slab_node;
pub mod slab_pool;

// Re-export public types
pub use bitmap::ElementBitmap;
pub use handle::SlabHandle;
pub use slab_node::Slab;
#[cfg(feature = "tracking")]
pub use slab_pool::SlabStats;
pub use slab_pool::{SlabId, SlabPool};
