//! Element occupancy bitmap.
//!
//! One bit per element, packed into 64-bit words. A set bit means the element
//! is allocated.

use alloc::vec::Vec;

const WORD_BITS: usize = u64::BITS as usize;

/// Bitset over the element indices of one run.
#[derive(Debug, Clone, Default)]
pub struct ElementBitmap {
    words: Vec<u64>,
}

impl ElementBitmap {
    /// Create an empty bitmap with room for a run of `page_size` bytes split
    /// into the smallest elements.
    pub fn with_page_size(page_size: usize) -> Self {
        let max_elems = page_size / crate::MIN_ELEM_SIZE;
        Self {
            words: Vec::with_capacity(Self::words_for(max_elems)),
        }
    }

    /// Number of words needed to track `num_elems` elements.
    pub const fn words_for(num_elems: usize) -> usize {
        num_elems.div_ceil(WORD_BITS)
    }

    /// Resize to track `num_elems` elements and mark all of them free.
    pub fn reset(&mut self, num_elems: usize) {
        self.words.clear();
        self.words.resize(Self::words_for(num_elems), 0);
    }

    /// Number of words in use.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    fn locate(idx: usize) -> (usize, u64) {
        (idx / WORD_BITS, 1u64 << (idx % WORD_BITS))
    }

    /// Whether element `idx` is allocated.
    pub fn is_set(&self, idx: usize) -> bool {
        let (q, mask) = Self::locate(idx);
        self.words[q] & mask != 0
    }

    /// Mark element `idx` allocated.
    pub fn set(&mut self, idx: usize) {
        let (q, mask) = Self::locate(idx);
        debug_assert!(
            self.words[q] & mask == 0,
            "element {} is already allocated",
            idx
        );
        self.words[q] |= mask;
    }

    /// Mark element `idx` free.
    pub fn clear(&mut self, idx: usize) {
        let (q, mask) = Self::locate(idx);
        debug_assert!(self.words[q] & mask != 0, "element {} is not allocated", idx);
        self.words[q] &= !mask;
    }

    /// Lowest free index below `limit`, scanning words in order.
    ///
    /// Fully allocated words are skipped with a single comparison.
    pub fn first_clear(&self, limit: usize) -> Option<usize> {
        for (q, &word) in self.words.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let idx = q * WORD_BITS + (!word).trailing_zeros() as usize;
            // Only the last word can hold bits past `limit`.
            return (idx < limit).then_some(idx);
        }
        None
    }

    /// Number of allocated elements.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
