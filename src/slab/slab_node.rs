//! Slab node implementation.
//!
//! A `Slab` owns the bookkeeping of one page-sized run: how it is divided,
//! which elements are taken, and where it sits in its size class's free list.
//! List splicing itself lives in [`SlabPool`](super::SlabPool), which owns
//! every slab and every list head.

use core::fmt;

use super::bitmap::ElementBitmap;
use super::handle::SlabHandle;
use super::slab_pool::SlabId;
use crate::SlabMetric;

pub struct Slab {
    memory_map_idx: u32,
    run_offset: usize,
    page_size: usize,
    elem_size: usize,
    max_num_elems: usize,
    num_avail: usize,
    next_avail: Option<usize>,
    active: bool,
    bitmap: ElementBitmap,
    pub(crate) prev: Option<SlabId>,
    pub(crate) next: Option<SlabId>,
}

impl Slab {
    /// Create a detached, inactive slab over the run at `run_offset`.
    ///
    /// The slab serves nothing until [`SlabPool::init`](super::SlabPool::init)
    /// assigns it an element size.
    pub fn new(memory_map_idx: u32, run_offset: usize, page_size: usize) -> Self {
        Self {
            memory_map_idx,
            run_offset,
            page_size,
            elem_size: 0,
            max_num_elems: 0,
            num_avail: 0,
            next_avail: None,
            active: false,
            bitmap: ElementBitmap::with_page_size(page_size),
            prev: None,
            next: None,
        }
    }

    /// Reconfigure for `elem_size` and mark every element free.
    pub(crate) fn reset(&mut self, elem_size: usize) {
        self.active = true;
        self.elem_size = elem_size;
        if elem_size == 0 {
            self.max_num_elems = 0;
            self.num_avail = 0;
            self.next_avail = None;
            self.bitmap.reset(0);
        } else {
            self.max_num_elems = self.page_size / elem_size;
            self.num_avail = self.max_num_elems;
            self.next_avail = Some(0);
            self.bitmap.reset(self.max_num_elems);
        }
    }

    /// Take one free element: mark it allocated and return its index.
    ///
    /// The caller has checked `num_avail > 0`.
    pub(crate) fn take_element(&mut self) -> usize {
        let bitmap_idx = match self.next_avail.take() {
            Some(idx) => idx,
            None => match self.bitmap.first_clear(self.max_num_elems) {
                Some(idx) => idx,
                None => panic!(
                    "No free element in slab {} despite num_avail = {}, bitmap inconsistency detected",
                    self.memory_map_idx, self.num_avail
                ),
            },
        };
        self.bitmap.set(bitmap_idx);
        self.num_avail -= 1;
        bitmap_idx
    }

    /// Return element `bitmap_idx` and remember it as the next one to hand out.
    pub(crate) fn release_element(&mut self, bitmap_idx: usize) {
        debug_assert!(
            bitmap_idx < self.max_num_elems,
            "element {} out of range for slab {}",
            bitmap_idx,
            self.memory_map_idx
        );
        self.bitmap.clear(bitmap_idx);
        self.next_avail = Some(bitmap_idx);
        self.num_avail += 1;
    }

    pub(crate) fn retire(&mut self) {
        self.active = false;
    }

    /// Handle for element `bitmap_idx` of this slab.
    pub fn to_handle(&self, bitmap_idx: usize) -> SlabHandle {
        SlabHandle::new(bitmap_idx, self.memory_map_idx)
    }

    /// Byte offset of element `bitmap_idx` within the owning region.
    pub fn element_offset(&self, bitmap_idx: usize) -> usize {
        self.run_offset + bitmap_idx * self.elem_size
    }

    pub fn memory_map_idx(&self) -> u32 {
        self.memory_map_idx
    }

    pub fn run_offset(&self) -> usize {
        self.run_offset
    }

    /// Whether the slab may still serve allocations.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the slab is currently on a free list.
    pub fn is_linked(&self) -> bool {
        debug_assert_eq!(self.prev.is_some(), self.next.is_some());
        self.next.is_some()
    }

    /// Whether element `bitmap_idx` is allocated.
    pub fn is_allocated(&self, bitmap_idx: usize) -> bool {
        bitmap_idx < self.max_num_elems && self.bitmap.is_set(bitmap_idx)
    }

    pub fn bitmap(&self) -> &ElementBitmap {
        &self.bitmap
    }

    pub fn prev(&self) -> Option<SlabId> {
        self.prev
    }

    pub fn next(&self) -> Option<SlabId> {
        self.next
    }
}

impl SlabMetric for Slab {
    fn max_num_elements(&self) -> usize {
        self.max_num_elems
    }

    fn num_available(&self) -> usize {
        self.num_avail
    }

    fn element_size(&self) -> usize {
        self.elem_size
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl fmt::Display for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.active {
            return write!(f, "({}: not in use)", self.memory_map_idx);
        }
        write!(
            f,
            "({}: {}/{}, offset: {}, length: {}, elemSize: {})",
            self.memory_map_idx,
            self.max_num_elems - self.num_avail,
            self.max_num_elems,
            self.run_offset,
            self.page_size,
            self.elem_size
        )
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("memory_map_idx", &self.memory_map_idx)
            .field("run_offset", &self.run_offset)
            .field("elem_size", &self.elem_size)
            .field("num_avail", &self.num_avail)
            .field("max_num_elems", &self.max_num_elems)
            .field("active", &self.active)
            .finish()
    }
}
