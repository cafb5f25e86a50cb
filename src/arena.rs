//! Arena lock domain.
//!
//! The arena owns one [`SlabPool`] behind a single `SpinNoIrq` lock. Every
//! slab mutation and every metric read goes through that lock: mutating
//! operations take the guard from [`Arena::lock`], metric reads through a
//! [`SlabRef`] take it for the duration of the call.

use core::fmt;

#[cfg(feature = "log")]
use log::debug;

use kspin::{SpinNoIrq, SpinNoIrqGuard};

#[cfg(feature = "tracking")]
use crate::slab::SlabStats;
use crate::slab::{SlabId, SlabPool};
use crate::SlabMetric;

/// Arena that owns the slabs and size-class lists of one allocator tier.
pub struct Arena<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    pool: SpinNoIrq<SlabPool>,
}

impl<const PAGE_SIZE: usize> Arena<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            pool: SpinNoIrq::new(SlabPool::new(PAGE_SIZE)),
        }
    }

    /// Acquire the arena lock.
    ///
    /// The returned guard is the only way to reach the pool, so holding it is
    /// the precondition of every slab operation.
    pub fn lock(&self) -> SpinNoIrqGuard<'_, SlabPool> {
        self.pool.lock()
    }

    /// Metric view of slab `id`.
    pub fn slab(&self, id: SlabId) -> SlabRef<'_, PAGE_SIZE> {
        SlabRef { arena: self, id }
    }

    /// Log every slab on the free list of `head`.
    #[cfg_attr(not(feature = "log"), allow(unused_variables))]
    pub fn log_size_class(&self, head: SlabId) {
        let pool = self.lock();
        debug!("size class {}:", head.index());
        for id in pool.iter_list(head) {
            debug!("  {}", pool.slab(id));
        }
    }

    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> SlabStats {
        self.lock().stats()
    }
}

impl<const PAGE_SIZE: usize> Default for Arena<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one slab of an arena; every read takes the arena lock.
#[derive(Clone, Copy)]
pub struct SlabRef<'a, const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    arena: &'a Arena<PAGE_SIZE>,
    id: SlabId,
}

impl<const PAGE_SIZE: usize> SlabRef<'_, PAGE_SIZE> {
    pub fn id(&self) -> SlabId {
        self.id
    }
}

impl<const PAGE_SIZE: usize> SlabMetric for SlabRef<'_, PAGE_SIZE> {
    fn max_num_elements(&self) -> usize {
        self.arena.lock().slab(self.id).max_num_elements()
    }

    fn num_available(&self) -> usize {
        self.arena.lock().slab(self.id).num_available()
    }

    fn element_size(&self) -> usize {
        self.arena.lock().slab(self.id).element_size()
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }
}

impl<const PAGE_SIZE: usize> fmt::Display for SlabRef<'_, PAGE_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.arena.lock();
        fmt::Display::fmt(pool.slab(self.id), f)
    }
}
