//! Universe-sampled dynamic predecessor index.
//!
//! Keys from an effective 40-bit universe are split at a sampling boundary
//! `s`: the high `40 - s` bits select a *bucket*, the low `s` bits are the
//! position inside it. The top layer `xf` is a dense array mapping every
//! prefix to the bucket responsible for it: a prefix with keys of its own
//! maps to its bucket, an empty prefix maps to the nearest bucket below it.
//! Buckets are chained in ascending prefix order and each remembers
//! `prev_pred`, the largest key below its own smallest, so a predecessor
//! query is one array load plus one in-bucket scan.
//!
//! Buckets store their occupied suffixes either as a bitset or as an
//! unsorted list of 16-bit values; the representation is picked at compile
//! time through [`SuffixStore`]. Buckets live in an arena (`Vec`) and are
//! referenced by 32-bit handles; they are never freed while the index is
//! alive.

use crate::bits::{bit_mask, pcmp_gt_u16, repeat_u16};
use crate::PredResult;

mod batched;

pub use batched::{Batched, BatchedBitsetIndex, BatchedListIndex};

/// Width of the effective universe: keys must be below `2^40`.
pub const UNIVERSE_BITS: u32 = 40;

/// Default sampling parameter.
pub const DEFAULT_SAMPLING: u32 = 12;

/// Arena handle of a bucket.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct BucketId(u32);

impl BucketId {
    const NULL: BucketId = BucketId(u32::MAX);

    #[inline]
    fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

/// Per-bucket suffix storage. Implemented by [`BitsetStore`] and
/// [`ListStore`]; the index is generic over this trait so the
/// representation is fixed at compile time, without dispatch on the hot
/// path.
pub trait SuffixStore {
    /// Largest sampling parameter the representation supports.
    const MAX_SUFFIX_BITS: u32;

    /// Creates an empty store for suffixes of `suffix_bits` bits.
    fn new(suffix_bits: u32) -> Self;

    /// Records `suf`; returns whether the stored key count grew.
    fn set(&mut self, suf: u64) -> bool;

    /// Largest stored suffix `<= suf`, if any.
    fn pred(&self, suf: u64) -> Option<u64>;

    /// Heap bytes held by the store.
    fn memory_usage(&self) -> usize;
}

/// Suffix storage as a `2^s`-bit set.
///
/// Re-inserting a present key is idempotent and detected, so the index key
/// count stays exact.
pub struct BitsetStore {
    words: Vec<u64>,
}

impl SuffixStore for BitsetStore {
    const MAX_SUFFIX_BITS: u32 = UNIVERSE_BITS;

    fn new(suffix_bits: u32) -> Self {
        let bits = 1usize << suffix_bits;
        Self {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    #[inline]
    fn set(&mut self, suf: u64) -> bool {
        let word = &mut self.words[(suf / 64) as usize];
        let bit = 1u64 << (suf % 64);
        let fresh = *word & bit == 0;
        *word |= bit;
        fresh
    }

    fn pred(&self, suf: u64) -> Option<u64> {
        // Downward scan, one word at a time.
        let mut w = (suf / 64) as usize;
        let mut word = self.words[w] & bit_mask(suf as u32 % 64 + 1);
        loop {
            if word != 0 {
                let bit = 63 - word.leading_zeros() as u64;
                return Some(w as u64 * 64 + bit);
            }
            if w == 0 {
                return None;
            }
            w -= 1;
            word = self.words[w];
        }
    }

    fn memory_usage(&self) -> usize {
        self.words.capacity() * 8
    }
}

/// Suffix storage as an unsorted vector of 16-bit values.
///
/// Re-inserting a present key appends a duplicate; queries stay correct but
/// the index key count then counts insertions rather than distinct keys.
pub struct ListStore {
    list: Vec<u16>,
}

impl SuffixStore for ListStore {
    const MAX_SUFFIX_BITS: u32 = 16;

    fn new(_suffix_bits: u32) -> Self {
        Self { list: Vec::new() }
    }

    #[inline]
    fn set(&mut self, suf: u64) -> bool {
        debug_assert!(suf <= u64::from(u16::MAX));
        self.list.push(suf as u16);
        true
    }

    fn pred(&self, suf: u64) -> Option<u64> {
        let target = repeat_u16(suf as u16);
        let mut best: Option<u16> = None;

        // Four lanes at a time: mask out lanes above the target, then take
        // the running maximum of what is left.
        let mut chunks = self.list.chunks_exact(4);
        for chunk in &mut chunks {
            let packed = u64::from(chunk[0])
                | u64::from(chunk[1]) << 16
                | u64::from(chunk[2]) << 32
                | u64::from(chunk[3]) << 48;
            let le = !pcmp_gt_u16(packed, target);
            if le == 0 {
                continue;
            }
            let masked = packed & le;
            let lane_max = (masked & 0xFFFF)
                .max(masked >> 16 & 0xFFFF)
                .max(masked >> 32 & 0xFFFF)
                .max(masked >> 48) as u16;
            best = Some(best.map_or(lane_max, |b| b.max(lane_max)));
        }
        for &v in chunks.remainder() {
            if u64::from(v) <= suf {
                best = Some(best.map_or(v, |b| b.max(v)));
            }
        }
        best.map(u64::from)
    }

    fn memory_usage(&self) -> usize {
        self.list.capacity() * 2
    }
}

struct Bucket<S> {
    prefix: u64,
    /// Largest key strictly below this bucket's smallest key.
    prev_pred: u64,
    /// Next bucket in ascending prefix order.
    next: BucketId,
    suffixes: S,
}

/// A two-level universe-sampled dynamic predecessor set over keys below
/// `2^40`.
///
/// Use the [`BitsetIndex`] and [`ListIndex`] aliases to pick the in-bucket
/// representation. Removal is not supported.
pub struct SamplingIndex<S> {
    suffix_bits: u32,
    xf: Vec<BucketId>,
    buckets: Vec<Bucket<S>>,
    first: BucketId,
    min: u64,
    max: u64,
    len: usize,
}

/// Sampling index with bitset buckets.
pub type BitsetIndex = SamplingIndex<BitsetStore>;

/// Sampling index with unsorted-list buckets.
pub type ListIndex = SamplingIndex<ListStore>;

impl<S: SuffixStore> Default for SamplingIndex<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SuffixStore> SamplingIndex<S> {
    /// Creates an empty index with the default sampling parameter.
    pub fn new() -> Self {
        Self::with_sampling(DEFAULT_SAMPLING)
    }

    /// Creates an empty index splitting keys after the low `suffix_bits`
    /// bits.
    ///
    /// # Panics
    /// Panics when `suffix_bits` is outside `1..=40` or exceeds what the
    /// bucket representation can hold.
    pub fn with_sampling(suffix_bits: u32) -> Self {
        assert!(
            (1..=UNIVERSE_BITS).contains(&suffix_bits),
            "sampling parameter out of range"
        );
        assert!(
            suffix_bits <= S::MAX_SUFFIX_BITS,
            "bucket representation holds at most {} suffix bits",
            S::MAX_SUFFIX_BITS
        );
        Self {
            suffix_bits,
            xf: Vec::new(),
            buckets: Vec::new(),
            first: BucketId::NULL,
            min: 0,
            max: 0,
            len: 0,
        }
    }

    /// Builds an index from keys that must be sorted ascending (duplicates
    /// are tolerated).
    pub fn from_sorted(keys: &[u64]) -> Self {
        assert!(
            keys.windows(2).all(|w| w[0] <= w[1]),
            "keys must be sorted ascending"
        );
        let mut index = Self::new();
        for &k in keys {
            index.insert(k);
        }
        index
    }

    /// Number of keys stored (see [`ListStore`] for the duplicate caveat).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest stored key.
    #[inline]
    pub fn min(&self) -> Option<u64> {
        (self.len > 0).then_some(self.min)
    }

    /// Largest stored key.
    #[inline]
    pub fn max(&self) -> Option<u64> {
        (self.len > 0).then_some(self.max)
    }

    /// Approximate heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.xf.capacity() * 4
            + self.buckets.capacity() * std::mem::size_of::<Bucket<S>>()
            + self.buckets.iter().map(|b| b.suffixes.memory_usage()).sum::<usize>()
    }

    #[inline]
    fn prefix(&self, key: u64) -> u64 {
        key >> self.suffix_bits
    }

    #[inline]
    fn suffix(&self, key: u64) -> u64 {
        key & bit_mask(self.suffix_bits)
    }

    fn alloc_bucket(&mut self, prefix: u64, prev_pred: u64, next: BucketId) -> BucketId {
        assert!(self.buckets.len() < u32::MAX as usize, "bucket arena overflow");
        self.buckets.push(Bucket {
            prefix,
            prev_pred,
            next,
            suffixes: S::new(self.suffix_bits),
        });
        BucketId((self.buckets.len() - 1) as u32)
    }

    #[inline]
    fn bucket(&self, id: BucketId) -> &Bucket<S> {
        &self.buckets[id.index()]
    }

    #[inline]
    fn bucket_mut(&mut self, id: BucketId) -> &mut Bucket<S> {
        &mut self.buckets[id.index()]
    }

    /// Inserts `key`.
    ///
    /// # Panics
    /// Panics when `key` does not fit the 40-bit universe.
    pub fn insert(&mut self, key: u64) {
        assert!(key < 1u64 << UNIVERSE_BITS, "key exceeds the 40-bit universe");
        let pre = self.prefix(key);
        let suf = self.suffix(key);

        let new_b;
        let grew;
        if pre as usize >= self.xf.len() {
            if self.len != 0 {
                // The key extends the universe upward: new last bucket, gap
                // entries keep pointing at the previous last bucket.
                debug_assert!(!self.xf.is_empty());
                let prev_last = self.xf[self.xf.len() - 1];
                new_b = self.alloc_bucket(pre, self.max, BucketId::NULL);
                grew = self.bucket_mut(new_b).suffixes.set(suf);
                self.bucket_mut(prev_last).next = new_b;
                self.xf.resize(pre as usize + 1, prev_last);
            } else {
                // Very first key.
                self.min = key;
                self.max = key;
                new_b = self.alloc_bucket(pre, 0, BucketId::NULL);
                grew = self.bucket_mut(new_b).suffixes.set(suf);
                self.first = new_b;
                self.xf.resize(pre as usize + 1, BucketId::NULL);
            }
        } else if pre < self.prefix(self.min) {
            // The key precedes every bucket: new first bucket.
            let old_first = self.first;
            self.bucket_mut(old_first).prev_pred = key;
            new_b = self.alloc_bucket(pre, 0, old_first);
            grew = self.bucket_mut(new_b).suffixes.set(suf);
            self.first = new_b;
        } else {
            let at = self.xf[pre as usize];
            debug_assert!(!at.is_null());
            if self.bucket(at).prefix == pre {
                // Exact bucket exists.
                grew = self.bucket_mut(at).suffixes.set(suf);
                let next = self.bucket(at).next;
                if !next.is_null() {
                    let nb = self.bucket_mut(next);
                    nb.prev_pred = nb.prev_pred.max(key);
                }
                self.min = self.min.min(key);
                self.max = self.max.max(key);
                self.len += usize::from(grew);
                return;
            }
            // The responsible bucket covers a smaller prefix: slot a new
            // bucket in behind it.
            let old_next = self.bucket(at).next;
            debug_assert!(!old_next.is_null());
            new_b = self.alloc_bucket(pre, self.bucket(old_next).prev_pred, old_next);
            grew = self.bucket_mut(new_b).suffixes.set(suf);
            self.bucket_mut(at).next = new_b;
            self.bucket_mut(old_next).prev_pred = key;
        }

        self.min = self.min.min(key);
        self.max = self.max.max(key);
        self.len += usize::from(grew);

        // Point the top layer at the new bucket, and redirect the gap
        // entries above it that used to point at its predecessor.
        self.xf[pre as usize] = new_b;
        if (pre as usize + 1) < self.xf.len() {
            let stale = self.xf[pre as usize + 1];
            if stale.is_null() || self.bucket(stale).prefix < pre {
                let mut j = pre as usize + 1;
                while j < self.xf.len() && self.xf[j] == stale {
                    self.xf[j] = new_b;
                    j += 1;
                }
            }
        }
    }

    /// Predecessor of `x`: the largest stored key `<= x`.
    ///
    /// Returns `{true, key}` when one exists, `{false, 0}` when `x` precedes
    /// every stored key, and `{false, 1}` on an empty set.
    pub fn predecessor(&self, x: u64) -> PredResult {
        if self.len == 0 {
            return PredResult::none(1);
        }
        if x < self.min {
            return PredResult::none(0);
        }
        if x >= self.max {
            return PredResult::found(self.max);
        }

        let pre = self.prefix(x);
        let b = self.bucket(self.xf[pre as usize]);
        // A bucket covering a smaller prefix holds only keys below x; scan
        // it from its top suffix instead of x's.
        let suf = if b.prefix == pre {
            self.suffix(x)
        } else {
            bit_mask(self.suffix_bits)
        };
        match b.suffixes.pred(suf) {
            Some(j) => PredResult::found((b.prefix << self.suffix_bits) | j),
            None => PredResult::found(b.prev_pred),
        }
    }
}
