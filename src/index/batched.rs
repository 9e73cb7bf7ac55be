//! Deferred-insert wrapper for the sampling index.
//!
//! Insertions accumulate in a buffer that is sorted and streamed into the
//! inner index on flush. Sorting first means clustered keys hit the cheap
//! append paths of the top layer instead of redirecting the same gap
//! entries over and over.

use crate::index::{BitsetStore, ListStore, SamplingIndex, SuffixStore};
use crate::PredResult;

/// Buffer size that triggers an automatic flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024;

/// A sampling index that defers insertions into a sort-and-stream buffer.
///
/// Flushes happen on an explicit [`flush`](Batched::flush), when the buffer
/// reaches the flush threshold, and before every query. Queries therefore
/// take `&mut self`.
pub struct Batched<S> {
    inner: SamplingIndex<S>,
    buffer: Vec<u64>,
    flush_threshold: usize,
}

/// Batched index with bitset buckets.
pub type BatchedBitsetIndex = Batched<BitsetStore>;

/// Batched index with unsorted-list buckets.
pub type BatchedListIndex = Batched<ListStore>;

impl<S: SuffixStore> Default for Batched<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SuffixStore> Batched<S> {
    /// Creates an empty batched index with default sampling and flush
    /// threshold.
    pub fn new() -> Self {
        Self::wrap(SamplingIndex::new())
    }

    /// Creates an empty batched index splitting keys after the low
    /// `suffix_bits` bits.
    pub fn with_sampling(suffix_bits: u32) -> Self {
        Self::wrap(SamplingIndex::with_sampling(suffix_bits))
    }

    fn wrap(inner: SamplingIndex<S>) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Overrides the buffer size that triggers an automatic flush.
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        assert!(threshold > 0, "flush threshold must be positive");
        self.flush_threshold = threshold;
        self
    }

    /// Buffers `key` for insertion.
    ///
    /// # Panics
    /// Panics when `key` does not fit the 40-bit universe (possibly only at
    /// flush time).
    pub fn insert(&mut self, key: u64) {
        self.buffer.push(key);
        if self.buffer.len() >= self.flush_threshold {
            self.flush();
        }
    }

    /// Sorts the buffered keys and streams them into the index.
    pub fn flush(&mut self) {
        self.buffer.sort_unstable();
        for key in self.buffer.drain(..) {
            self.inner.insert(key);
        }
    }

    /// Predecessor of `x`; forces a flush first.
    pub fn predecessor(&mut self, x: u64) -> PredResult {
        self.flush();
        self.inner.predecessor(x)
    }

    /// Number of keys stored; forces a flush first.
    pub fn len(&mut self) -> usize {
        self.flush();
        self.inner.len()
    }

    /// Whether neither the index nor the buffer holds any key.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty() && self.buffer.is_empty()
    }

    /// Keys currently waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Approximate heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.inner.memory_usage() + self.buffer.capacity() * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BitsetIndex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_query_forces_flush() {
        let mut idx = BatchedBitsetIndex::new();
        idx.insert(10);
        idx.insert(3);
        assert_eq!(idx.buffered(), 2);
        assert_eq!(idx.predecessor(7), PredResult::found(3));
        assert_eq!(idx.buffered(), 0);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn test_threshold_flush() {
        let mut idx = BatchedBitsetIndex::new().with_flush_threshold(4);
        for k in [9u64, 1, 5, 13] {
            idx.insert(k);
        }
        assert_eq!(idx.buffered(), 0);
        idx.insert(2);
        assert_eq!(idx.buffered(), 1);
        assert!(!idx.is_empty());
    }

    #[test]
    fn test_matches_eager_index() {
        let mut rng = StdRng::seed_from_u64(47);
        let mut eager = BitsetIndex::with_sampling(8);
        let mut batched = BatchedBitsetIndex::with_sampling(8).with_flush_threshold(64);
        for _ in 0..5_000 {
            let k = rng.gen_range(0..100_000);
            eager.insert(k);
            batched.insert(k);
        }
        for _ in 0..5_000 {
            let x = rng.gen_range(0..120_000);
            assert_eq!(batched.predecessor(x), eager.predecessor(x), "x={x}");
        }
        assert_eq!(batched.len(), eager.len());
    }

    #[test]
    fn test_empty() {
        let mut idx = BatchedListIndex::new();
        assert!(idx.is_empty());
        assert_eq!(idx.predecessor(0), PredResult::none(1));
    }
}
