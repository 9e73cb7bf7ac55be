use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest_derive::Arbitrary;

use crate::{BatchedBitsetIndex, BitsetIndex, ListIndex, Octrie, PredResult};

/// Reference model implementing the predecessor contract over a BTreeSet.
#[derive(Default)]
struct Model {
    set: BTreeSet<u64>,
}

impl Model {
    fn insert(&mut self, key: u64) {
        self.set.insert(key);
    }

    fn remove(&mut self, key: u64) -> bool {
        self.set.remove(&key)
    }

    fn predecessor(&self, x: u64) -> PredResult {
        if self.set.is_empty() {
            return PredResult::none(1);
        }
        match self.set.range(..=x).next_back() {
            Some(&k) => PredResult::found(k),
            None => PredResult::none(0),
        }
    }

    fn len(&self) -> usize {
        self.set.len()
    }
}

/// Actions to test against both implementations.
#[derive(Arbitrary, Debug, Clone)]
enum Action {
    Insert(Key),
    Remove(Key),
    Pred(Key),
}

/// Wrapper for key generation with a custom strategy.
#[derive(Debug, Clone, Copy)]
struct Key(u64);

impl Arbitrary for Key {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            // Dense small keys: lots of duplicates and near-misses
            (0u64..64).prop_map(Key),
            // One bucket's worth of spread
            (0u64..4096).prop_map(Key),
            // Clustered keys sharing a high prefix
            (0u64..16, 0u64..256).prop_map(|(c, off)| Key((c << 14) | off)),
            // Spread wide enough to force top-layer growth and gap fills,
            // while keeping the dense top array test-sized
            (0u64..(1 << 20)).prop_map(Key),
        ]
        .boxed()
    }
}

/// Harness executing actions on the octrie and the model, asserting
/// agreement after every step.
#[derive(Default)]
struct OctrieTest {
    trie: Octrie,
    model: Model,
}

impl OctrieTest {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Insert(Key(k)) => {
                self.trie.insert(k);
                self.model.insert(k);
            }
            Action::Remove(Key(k)) => {
                let got = self.trie.remove(k);
                let want = self.model.remove(k);
                assert_eq!(got, want, "remove mismatch: key={k}");
            }
            Action::Pred(Key(x)) => {
                assert_eq!(
                    self.trie.predecessor(x),
                    self.model.predecessor(x),
                    "pred mismatch: x={x}"
                );
            }
        }
        assert_eq!(self.trie.len(), self.model.len(), "length mismatch");
        assert_eq!(self.trie.is_empty(), self.model.set.is_empty());
    }
}

/// Harness executing insert/pred actions on every index variant at once.
struct IndexTest {
    bitset: BitsetIndex,
    list: ListIndex,
    batched: BatchedBitsetIndex,
    model: Model,
}

impl Default for IndexTest {
    fn default() -> Self {
        Self {
            bitset: BitsetIndex::with_sampling(8),
            list: ListIndex::with_sampling(8),
            batched: BatchedBitsetIndex::with_sampling(8).with_flush_threshold(16),
            model: Model::default(),
        }
    }
}

impl IndexTest {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Insert(Key(k)) | Action::Remove(Key(k)) => {
                // The index does not support removal; treat Remove as Insert
                // so the action distribution still mixes keys.
                self.bitset.insert(k);
                self.list.insert(k);
                self.batched.insert(k);
                self.model.insert(k);
            }
            Action::Pred(Key(x)) => {
                let want = self.model.predecessor(x);
                assert_eq!(self.bitset.predecessor(x), want, "bitset x={x}");
                assert_eq!(self.list.predecessor(x), want, "list x={x}");
                assert_eq!(self.batched.predecessor(x), want, "batched x={x}");
            }
        }
        assert_eq!(self.bitset.len(), self.model.len(), "bitset length mismatch");
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn proptest_octrie_vs_btreeset(actions in prop::collection::vec(any::<Action>(), 1..128)) {
        let mut test = OctrieTest::default();
        for action in actions {
            test.execute(action);
        }
    }

    #[test]
    fn proptest_indexes_vs_btreeset(actions in prop::collection::vec(any::<Action>(), 1..128)) {
        let mut test = IndexTest::default();
        for action in actions {
            test.execute(action);
        }
    }
}
