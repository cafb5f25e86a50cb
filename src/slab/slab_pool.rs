//! Pooled size-class free lists.
//!
//! `SlabPool` is the table that owns every slab of an arena together with the
//! sentinel head of each size class. Free lists are circular and doubly
//! linked through `SlabId`s into this table; a head starts out linked to
//! itself, so a slab that is alone on its list sees `prev == next == head`.
//!
//! Nothing in here locks. The pool is only reachable through the arena's lock
//! guard, so every `&mut SlabPool` is proof that the lock is held.

#[cfg(feature = "log")]
use log::{debug, error, trace, warn};

use alloc::vec::Vec;

use super::handle::{SlabHandle, MAX_ELEMENT_INDEX};
use super::slab_node::Slab;
use crate::{AllocError, AllocResult, RunRegion, SlabMetric};

/// Index of a slab or list head in its [`SlabPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlabId(usize);

impl SlabId {
    pub const fn index(self) -> usize {
        self.0
    }
}

struct PoolHead {
    prev: SlabId,
    next: SlabId,
}

enum Entry {
    Head(PoolHead),
    Slab(Slab),
    /// Slot of a destroyed slab, chained to the next vacant slot.
    Vacant(Option<usize>),
}

/// Counters kept while the `tracking` feature is on.
#[cfg(feature = "tracking")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlabStats {
    pub active_slabs: usize,
    pub allocations: usize,
    pub frees: usize,
    pub retirements: usize,
}

/// Table of slabs and size-class list heads owned by one arena.
pub struct SlabPool {
    entries: Vec<Entry>,
    vacant_head: Option<usize>,
    page_size: usize,
    #[cfg(feature = "tracking")]
    stats: SlabStats,
}

impl SlabPool {
    pub(crate) const fn new(page_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            vacant_head: None,
            page_size,
            #[cfg(feature = "tracking")]
            stats: SlabStats {
                active_slabs: 0,
                allocations: 0,
                frees: 0,
                retirements: 0,
            },
        }
    }

    /// Size of every run managed by this pool.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> SlabStats {
        self.stats
    }

    fn push_entry(&mut self, entry: Entry) -> SlabId {
        if let Some(idx) = self.vacant_head {
            self.vacant_head = match &self.entries[idx] {
                Entry::Vacant(next_vacant) => *next_vacant,
                _ => panic!("Vacant list points at live entry {}", idx),
            };
            self.entries[idx] = entry;
            return SlabId(idx);
        }
        self.entries.push(entry);
        SlabId(self.entries.len() - 1)
    }

    /// Create the sentinel head of a new size-class free list.
    pub fn new_head(&mut self) -> SlabId {
        let id = self.push_entry(Entry::Head(PoolHead {
            prev: SlabId(0),
            next: SlabId(0),
        }));
        self.set_prev(id, id);
        self.set_next(id, id);
        debug!("slab pool: new size class head {}", id.0);
        id
    }

    /// Construct a slab over the run at `run_offset` and link it after `head`.
    pub fn insert_slab(
        &mut self,
        head: SlabId,
        memory_map_idx: u32,
        run_offset: usize,
        elem_size: usize,
    ) -> AllocResult<SlabId> {
        if elem_size > self.page_size || self.page_size / elem_size.max(1) > MAX_ELEMENT_INDEX + 1
        {
            warn!(
                "slab pool: element size {} does not fit a {} byte run",
                elem_size, self.page_size
            );
            return Err(AllocError::InvalidParam);
        }
        let slab = Slab::new(memory_map_idx, run_offset, self.page_size);
        let id = self.push_entry(Entry::Slab(slab));
        self.init(id, head, elem_size);
        Ok(id)
    }

    /// (Re)configure slab `id` for `elem_size` and link it after `head`.
    ///
    /// Used both right after construction and when a detached slab goes back
    /// into service, possibly for a different size class.
    pub fn init(&mut self, id: SlabId, head: SlabId, elem_size: usize) {
        let slab = self.slab_mut(id);
        #[cfg_attr(not(feature = "tracking"), allow(unused_variables))]
        let was_active = slab.is_active();
        slab.reset(elem_size);
        #[cfg(feature = "tracking")]
        {
            if !was_active {
                self.stats.active_slabs += 1;
            }
        }
        self.add_to_pool(id, head);
    }

    /// Allocate one element from slab `id`.
    ///
    /// Returns `None` when the slab is exhausted or retired. A slab that hands
    /// out its last element leaves its free list until an element comes back.
    pub fn allocate(&mut self, id: SlabId) -> Option<SlabHandle> {
        let slab = self.slab_mut(id);
        if slab.element_size() == 0 {
            return Some(slab.to_handle(0));
        }
        if slab.num_available() == 0 || !slab.is_active() {
            return None;
        }

        let bitmap_idx = slab.take_element();
        let handle = slab.to_handle(bitmap_idx);
        let exhausted = slab.num_available() == 0;
        trace!(
            "slab pool: allocated element {} of slab {}",
            bitmap_idx,
            id.0
        );

        if exhausted {
            self.remove_from_pool(id);
        }
        #[cfg(feature = "tracking")]
        {
            self.stats.allocations += 1;
        }
        Some(handle)
    }

    /// Free element `bitmap_idx` of slab `id`.
    ///
    /// Returns `true` while the slab must stay resident in its region and
    /// `false` once the region may reclaim the whole run.
    pub fn free(&mut self, id: SlabId, head: SlabId, bitmap_idx: usize) -> bool {
        let slab = self.slab_mut(id);
        if slab.element_size() == 0 {
            return true;
        }

        let was_exhausted = slab.num_available() == 0;
        slab.release_element(bitmap_idx);
        let all_free = slab.num_available() == slab.max_num_elements();
        let sole_member = slab.prev == slab.next;
        trace!("slab pool: freed element {} of slab {}", bitmap_idx, id.0);
        #[cfg(feature = "tracking")]
        {
            self.stats.frees += 1;
        }

        if was_exhausted {
            self.add_to_pool(id, head);
            return true;
        }
        if !all_free || sole_member {
            // Keep one slab per size class around even when it is empty.
            return true;
        }

        self.slab_mut(id).retire();
        self.remove_from_pool(id);
        #[cfg(feature = "tracking")]
        {
            self.stats.active_slabs -= 1;
            self.stats.retirements += 1;
        }
        debug!("slab pool: slab {} is empty, run may be reclaimed", id.0);
        false
    }

    /// Link slab `id` right after `head`.
    pub fn add_to_pool(&mut self, id: SlabId, head: SlabId) {
        let next = match &self.entries[head.0] {
            Entry::Head(h) => h.next,
            _ => panic!("Entry {} is not a size class head", head.0),
        };
        let slab = self.slab_mut(id);
        debug_assert!(
            slab.prev.is_none() && slab.next.is_none(),
            "slab {} is already linked",
            id.0
        );
        slab.prev = Some(head);
        slab.next = Some(next);
        self.set_prev(next, id);
        self.set_next(head, id);
    }

    /// Unlink slab `id` from its free list.
    pub fn remove_from_pool(&mut self, id: SlabId) {
        let slab = self.slab_mut(id);
        debug_assert!(
            slab.prev.is_some() && slab.next.is_some(),
            "slab {} is not linked",
            id.0
        );
        let (Some(prev), Some(next)) = (slab.prev.take(), slab.next.take()) else {
            return;
        };
        self.set_next(prev, next);
        self.set_prev(next, prev);
    }

    /// Destroy a detached slab and hand its run back to `region`.
    pub fn destroy<R: RunRegion + ?Sized>(&mut self, id: SlabId, region: &mut R) {
        let slab = self.slab(id);
        debug_assert!(!slab.is_linked(), "slab {} destroyed while linked", id.0);
        let (memory_map_idx, run_offset, page_size) =
            (slab.memory_map_idx(), slab.run_offset(), slab.page_size());
        #[cfg(feature = "tracking")]
        {
            if slab.is_active() {
                self.stats.active_slabs -= 1;
            }
        }

        self.entries[id.0] = Entry::Vacant(self.vacant_head);
        self.vacant_head = Some(id.0);
        debug!(
            "slab pool: destroying slab {} (run {:#x}, coordinate {})",
            id.0, run_offset, memory_map_idx
        );
        region.release_run(memory_map_idx, run_offset, page_size);
    }

    /// The slab stored at `id`.
    ///
    /// Panics if `id` names a head or a destroyed slab.
    pub fn slab(&self, id: SlabId) -> &Slab {
        match self.entries.get(id.0) {
            Some(Entry::Slab(slab)) => slab,
            _ => panic!("Entry {} is not a live slab", id.0),
        }
    }

    fn slab_mut(&mut self, id: SlabId) -> &mut Slab {
        match self.entries.get_mut(id.0) {
            Some(Entry::Slab(slab)) => slab,
            _ => panic!("Entry {} is not a live slab", id.0),
        }
    }

    /// Whether slab `id` is currently on a free list.
    pub fn is_linked(&self, id: SlabId) -> bool {
        self.slab(id).is_linked()
    }

    /// Slabs on the free list of `head`, most recently linked first.
    pub fn iter_list(&self, head: SlabId) -> ListIter<'_> {
        let first = match &self.entries[head.0] {
            Entry::Head(h) => h.next,
            _ => panic!("Entry {} is not a size class head", head.0),
        };
        ListIter {
            pool: self,
            head,
            current: first,
        }
    }

    fn set_next(&mut self, id: SlabId, next: SlabId) {
        match &mut self.entries[id.0] {
            Entry::Head(h) => h.next = next,
            Entry::Slab(s) => s.next = Some(next),
            Entry::Vacant(_) => panic!("Entry {} is vacant", id.0),
        }
    }

    fn set_prev(&mut self, id: SlabId, prev: SlabId) {
        match &mut self.entries[id.0] {
            Entry::Head(h) => h.prev = prev,
            Entry::Slab(s) => s.prev = Some(prev),
            Entry::Vacant(_) => panic!("Entry {} is vacant", id.0),
        }
    }
}

/// Iterator over the slabs on one free list.
pub struct ListIter<'a> {
    pool: &'a SlabPool,
    head: SlabId,
    current: SlabId,
}

impl Iterator for ListIter<'_> {
    type Item = SlabId;

    fn next(&mut self) -> Option<SlabId> {
        if self.current == self.head {
            return None;
        }
        let id = self.current;
        self.current = match self.pool.slab(id).next {
            Some(next) => next,
            None => {
                error!("slab pool: slab {} on a free list has no successor", id.0);
                self.head
            }
        };
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const PAGE_SIZE: usize = 8192;

    #[derive(Default)]
    struct MockRegion {
        released: Vec<(u32, usize, usize)>,
    }

    impl RunRegion for MockRegion {
        fn release_run(&mut self, memory_map_idx: u32, run_offset: usize, page_size: usize) {
            self.released.push((memory_map_idx, run_offset, page_size));
        }
    }

    fn list(pool: &SlabPool, head: SlabId) -> Vec<SlabId> {
        pool.iter_list(head).collect()
    }

    #[test]
    fn test_new_head_is_self_linked() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        assert!(list(&pool, head).is_empty());
    }

    #[test]
    fn test_lifo_insertion() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let a = pool.insert_slab(head, 2048, 0, 64).unwrap();
        let b = pool.insert_slab(head, 2049, PAGE_SIZE, 64).unwrap();
        let c = pool.insert_slab(head, 2050, 2 * PAGE_SIZE, 64).unwrap();
        assert_eq!(list(&pool, head), vec![c, b, a]);

        pool.remove_from_pool(b);
        assert!(!pool.is_linked(b));
        assert_eq!(list(&pool, head), vec![c, a]);

        pool.add_to_pool(b, head);
        assert_eq!(list(&pool, head), vec![b, c, a]);
    }

    #[test]
    fn test_exhaustion_detaches() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let id = pool.insert_slab(head, 2048, 0, 2048).unwrap();

        let handles: Vec<_> = (0..4).map(|_| pool.allocate(id).unwrap()).collect();
        assert_eq!(
            handles.iter().map(|h| h.bitmap_idx()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(!pool.is_linked(id));
        assert!(pool.allocate(id).is_none());

        // The first element back re-links the slab.
        assert!(pool.free(id, head, 2));
        assert!(pool.is_linked(id));
        assert_eq!(pool.allocate(id).unwrap().bitmap_idx(), 2);
    }

    #[test]
    fn test_reclamation_gate() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let a = pool.insert_slab(head, 2048, 0, 1024).unwrap();
        let b = pool.insert_slab(head, 2049, PAGE_SIZE, 1024).unwrap();

        let ha = pool.allocate(a).unwrap();
        let hb = pool.allocate(b).unwrap();

        // `a` shares the list with `b`: emptying it retires it.
        assert!(!pool.free(a, head, ha.bitmap_idx()));
        assert!(!pool.slab(a).is_active());
        assert!(!pool.is_linked(a));
        assert!(pool.allocate(a).is_none());

        // `b` is now alone: it stays resident.
        assert!(pool.free(b, head, hb.bitmap_idx()));
        assert!(pool.slab(b).is_active());
        assert_eq!(list(&pool, head), vec![b]);
    }

    #[test]
    fn test_partial_free_keeps_slab() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let a = pool.insert_slab(head, 1, 0, 512).unwrap();
        let _b = pool.insert_slab(head, 2, PAGE_SIZE, 512).unwrap();

        let h0 = pool.allocate(a).unwrap();
        let _h1 = pool.allocate(a).unwrap();
        assert!(pool.free(a, head, h0.bitmap_idx()));
        assert!(pool.slab(a).is_active());
        assert_eq!(pool.slab(a).num_available(), 15);
    }

    #[test]
    fn test_single_element_slab_relinks() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let _other = pool.insert_slab(head, 1, 0, 16).unwrap();
        let id = pool.insert_slab(head, 2, PAGE_SIZE, PAGE_SIZE).unwrap();

        let handle = pool.allocate(id).unwrap();
        assert!(!pool.is_linked(id));
        // Coming back from exhaustion always keeps the slab, even when empty.
        assert!(pool.free(id, head, handle.bitmap_idx()));
        assert!(pool.is_linked(id));
    }

    #[test]
    fn test_zero_elem_size() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let id = pool.insert_slab(head, 77, 0, 0).unwrap();

        for _ in 0..3 {
            let handle = pool.allocate(id).unwrap();
            assert_eq!(handle.bitmap_idx(), 0);
            assert_eq!(handle.memory_map_idx(), 77);
        }
        assert_eq!(pool.slab(id).num_available(), 0);
        assert!(pool.free(id, head, 0));
        assert!(pool.is_linked(id));
    }

    #[test]
    fn test_reinit_with_new_size() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head16 = pool.new_head();
        let head64 = pool.new_head();
        let _keep = pool.insert_slab(head16, 1, 0, 16).unwrap();
        let id = pool.insert_slab(head16, 2, PAGE_SIZE, 16).unwrap();

        let handle = pool.allocate(id).unwrap();
        assert!(!pool.free(id, head16, handle.bitmap_idx()));

        pool.init(id, head64, 64);
        assert!(pool.slab(id).is_active());
        assert_eq!(pool.slab(id).max_num_elements(), 128);
        assert_eq!(list(&pool, head64), vec![id]);
        assert_eq!(pool.allocate(id).unwrap().bitmap_idx(), 0);
    }

    #[test]
    fn test_destroy_releases_run_and_reuses_slot() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let mut region = MockRegion::default();
        let head = pool.new_head();
        let _keep = pool.insert_slab(head, 1, 0, 32).unwrap();
        let id = pool.insert_slab(head, 9, 4 * PAGE_SIZE, 32).unwrap();

        let handle = pool.allocate(id).unwrap();
        assert!(!pool.free(id, head, handle.bitmap_idx()));
        pool.destroy(id, &mut region);
        assert_eq!(region.released, vec![(9, 4 * PAGE_SIZE, PAGE_SIZE)]);

        let reused = pool.insert_slab(head, 10, 5 * PAGE_SIZE, 32).unwrap();
        assert_eq!(reused, id);
        assert_eq!(pool.slab(reused).memory_map_idx(), 10);
    }

    #[test]
    fn test_insert_rejects_oversized_elements() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        assert_eq!(
            pool.insert_slab(head, 1, 0, PAGE_SIZE + 1),
            Err(AllocError::InvalidParam)
        );
        assert!(list(&pool, head).is_empty());
    }

    #[cfg(feature = "tracking")]
    #[test]
    fn test_stats() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let a = pool.insert_slab(head, 1, 0, 4096).unwrap();
        let _b = pool.insert_slab(head, 2, PAGE_SIZE, 4096).unwrap();
        let h = pool.allocate(a).unwrap();
        assert!(!pool.free(a, head, h.bitmap_idx()));

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.retirements, 1);
        assert_eq!(stats.active_slabs, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already linked")]
    fn test_double_link_panics() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let id = pool.insert_slab(head, 1, 0, 64).unwrap();
        pool.add_to_pool(id, head);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not linked")]
    fn test_unlink_detached_panics() {
        let mut pool = SlabPool::new(PAGE_SIZE);
        let head = pool.new_head();
        let id = pool.insert_slab(head, 1, 0, 64).unwrap();
        pool.remove_from_pool(id);
        pool.remove_from_pool(id);
    }
}
