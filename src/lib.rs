//! # predset
//!
//! Dynamic predecessor structures over 64-bit integer keys.
//!
//! A predecessor structure maintains a set of keys and answers, for any
//! query `x`, the largest stored key `<= x`. This crate implements the
//! word-parallel toolbox for doing that in sublogarithmic time:
//!
//! - [`FusionNode`]: constant-time predecessor over up to 8 keys from a
//!   three-word compressed-trie summary.
//! - [`Octrie`]: a B-tree of branching factor 9 that uses a fusion node
//!   inside every node, supporting inserts and removals.
//! - [`BitsetIndex`] / [`ListIndex`]: a two-level universe-sampled index
//!   over 40-bit keys, with per-bucket bitset or list storage, plus
//!   [`BatchedBitsetIndex`] / [`BatchedListIndex`] variants that defer and
//!   sort insertions.
//!
//! ## Example
//!
//! ```rust
//! use predset::Octrie;
//!
//! let mut set = Octrie::new();
//! set.insert(17);
//! set.insert(42);
//!
//! let r = set.predecessor(40);
//! assert!(r.exists);
//! assert_eq!(r.pos, 17);
//! ```
//!
//! All structures are single-threaded: one owner mutates, shared references
//! may query.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bits;
pub mod fusion;
pub mod index;
pub mod octrie;

pub use fusion::FusionNode;
pub use index::{
    Batched, BatchedBitsetIndex, BatchedListIndex, BitsetIndex, BitsetStore, ListIndex, ListStore,
    SamplingIndex, SuffixStore,
};
pub use octrie::Octrie;

/// Result of a predecessor query.
///
/// For the structure-level queries `pos` is the predecessor key; for
/// fusion-node rank queries it is the predecessor's rank in the node's key
/// array. When `exists` is `false`, `pos` carries a deterministic marker
/// instead: `1` for a query against an empty set, `0` for a query below the
/// smallest stored key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredResult {
    /// Whether a predecessor exists.
    pub exists: bool,
    /// The predecessor (key or rank), or the marker described above.
    pub pos: u64,
}

impl PredResult {
    /// A query that found its predecessor.
    #[inline]
    pub const fn found(pos: u64) -> Self {
        Self { exists: true, pos }
    }

    /// A query with no predecessor; `pos` is the deterministic marker.
    #[inline]
    pub const fn none(pos: u64) -> Self {
        Self { exists: false, pos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The literal boundary table every structure must satisfy.
    const BOUNDARY: &[(&[u64], u64, PredResult)] = &[
        (&[], 0, PredResult::none(1)),
        (&[5], 4, PredResult::none(0)),
        (&[5], 5, PredResult::found(5)),
        (&[5], 6, PredResult::found(5)),
        (&[1, 3, 7, 15, 31], 10, PredResult::found(7)),
        (&[1, 3, 7, 15, 31], 31, PredResult::found(31)),
        (&[1, 3, 7, 15, 31], 100, PredResult::found(31)),
    ];

    #[test]
    fn test_boundary_table_all_structures() {
        for &(keys, x, want) in BOUNDARY {
            let mut octrie = Octrie::new();
            let mut bitset = BitsetIndex::with_sampling(6);
            let mut list = ListIndex::with_sampling(6);
            let mut batched = BatchedBitsetIndex::with_sampling(6);
            for &k in keys {
                octrie.insert(k);
                bitset.insert(k);
                list.insert(k);
                batched.insert(k);
            }
            assert_eq!(octrie.predecessor(x), want, "octrie S={keys:?} x={x}");
            assert_eq!(bitset.predecessor(x), want, "bitset S={keys:?} x={x}");
            assert_eq!(list.predecessor(x), want, "list S={keys:?} x={x}");
            assert_eq!(batched.predecessor(x), want, "batched S={keys:?} x={x}");
        }
    }

    #[test]
    fn test_structures_agree_end_to_end() {
        let keys = [
            17u64, 3, 29, 11, 41, 5, 23, 37, 13, 19, 31, 7, 43, 47, 2, 53, 61, 59, 67, 71,
        ];
        let mut octrie = Octrie::new();
        let mut bitset = BitsetIndex::with_sampling(6);
        let mut list = ListIndex::with_sampling(6);
        let mut batched_bitset = BatchedBitsetIndex::with_sampling(6).with_flush_threshold(7);
        let mut batched_list = BatchedListIndex::with_sampling(6).with_flush_threshold(7);
        for &k in &keys {
            octrie.insert(k);
            bitset.insert(k);
            list.insert(k);
            batched_bitset.insert(k);
            batched_list.insert(k);
        }
        for x in 0..=80u64 {
            let want = octrie.predecessor(x);
            assert_eq!(bitset.predecessor(x), want, "bitset x={x}");
            assert_eq!(list.predecessor(x), want, "list x={x}");
            assert_eq!(batched_bitset.predecessor(x), want, "batched bitset x={x}");
            assert_eq!(batched_list.predecessor(x), want, "batched list x={x}");
        }
    }

    #[test]
    fn test_max_edge_is_inclusive() {
        // predecessor(max) must report max itself.
        let mut octrie = Octrie::new();
        let mut bitset = BitsetIndex::new();
        for k in [10u64, 20, 30] {
            octrie.insert(k);
            bitset.insert(k);
        }
        assert_eq!(octrie.predecessor(30), PredResult::found(30));
        assert_eq!(bitset.predecessor(30), PredResult::found(30));
    }
}

#[cfg(test)]
mod proptests;
