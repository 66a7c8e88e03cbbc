#![cfg(test)]

// Property tests for EntryStore kept inside the crate so they can reach the
// slot array and the consistency check.

use crate::entry_store::EntryStore;
use crate::equality::keys_equal;
use crate::hasher::hash_key;
use crate::key::Key;
use proptest::prelude::*;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

// Scalars drawn from a tiny range so `1`, `1.0` and `"1"` keep colliding.
#[derive(Clone, Debug, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn key(&self) -> Key {
        match self {
            Scalar::Int(i) => Key::from(*i),
            Scalar::Float(f) => Key::from(*f),
            Scalar::Str(s) => Key::from(s.as_str()),
        }
    }
}

// Pool-indexed operations so shrinking moves towards earlier keys.
#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Remove(usize),
    Find(usize),
    Mutate(usize, i32),
    Iterate,
    Clear,
}

fn arb_scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        (0i64..4).prop_map(Scalar::Int),
        (0i64..4).prop_map(|i| Scalar::Float(i as f64)),
        Just(Scalar::Float(0.5)),
        (0i64..4).prop_map(|i| Scalar::Str(i.to_string())),
        Just(Scalar::Str(String::new())),
    ]
}

fn arb_scenario() -> impl Strategy<Value = (Vec<Scalar>, Vec<Op>)> {
    proptest::collection::vec(arb_scalar(), 1..=16).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            4 => idx.clone().prop_map(Op::Remove),
            2 => idx.clone().prop_map(Op::Find),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| Op::Mutate(i, d)),
            1 => Just(Op::Iterate),
            1 => Just(Op::Clear),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn put<S: BuildHasher>(sut: &mut EntryStore<i32, S>, key: &Scalar, value: i32) -> Option<i32> {
    let key = key.key();
    sut.insert_or_update(hash_key(&key), key, value, keys_equal)
}

fn find<S: BuildHasher>(sut: &EntryStore<i32, S>, key: &Scalar) -> Option<i32> {
    let key = key.key();
    sut.get(&hash_key(&key), &key, keys_equal).map(|e| e.value)
}

fn position(model: &[(Scalar, i32)], k: &Scalar) -> Option<usize> {
    model.iter().position(|(m, _)| m == k)
}

// Property: state-machine equivalence against an ordered Vec model.
// - insert overwrites in place and returns the previous value;
// - remove returns the stored value and re-insertion goes to the end;
// - iteration order equals the model's order at every step;
// - buckets and slots stay consistent across tombstoning and compaction.
fn run_scenario<S: BuildHasher>(
    mut sut: EntryStore<i32, S>,
    pool: &[Scalar],
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model: Vec<(Scalar, i32)> = Vec::new();
    for op in ops {
        match op {
            Op::Insert(i, v) => {
                let k = &pool[i];
                let previous = put(&mut sut, k, v);
                match position(&model, k) {
                    Some(at) => {
                        prop_assert_eq!(previous, Some(model[at].1));
                        model[at].1 = v;
                    }
                    None => {
                        prop_assert_eq!(previous, None);
                        model.push((k.clone(), v));
                    }
                }
            }
            Op::Remove(i) => {
                let k = &pool[i];
                let key = k.key();
                let removed = sut.remove(&hash_key(&key), &key, keys_equal).map(|e| e.value);
                let expected = position(&model, k).map(|at| model.remove(at).1);
                prop_assert_eq!(removed, expected);
            }
            Op::Find(i) => {
                let k = &pool[i];
                let expected = position(&model, k).map(|at| model[at].1);
                prop_assert_eq!(find(&sut, k), expected);
            }
            Op::Mutate(i, d) => {
                let k = &pool[i];
                let key = k.key();
                if let Some(entry) = sut.get_mut(&hash_key(&key), &key, keys_equal) {
                    entry.value = entry.value.saturating_add(d);
                    let at = position(&model, k).expect("model has live key");
                    model[at].1 = model[at].1.saturating_add(d);
                } else {
                    prop_assert!(position(&model, k).is_none());
                }
            }
            Op::Iterate => {
                let live: Vec<(Key, i32)> = sut
                    .slots()
                    .iter()
                    .flatten()
                    .map(|e| (e.key.clone(), e.value))
                    .collect();
                prop_assert_eq!(live.len(), model.len());
                for ((key, value), (m, mv)) in live.iter().zip(&model) {
                    prop_assert!(keys_equal(key, &m.key()), "order diverged at {:?}", m);
                    prop_assert_eq!(value, mv);
                }
            }
            Op::Clear => {
                sut.clear();
                model.clear();
            }
        }

        sut.assert_consistent();
        prop_assert_eq!(sut.len(), model.len());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut: EntryStore<i32> = EntryStore::with_capacity_and_hasher(0, RandomState::new());
        run_scenario(sut, &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress token comparison and
// equality resolution within the index.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut: EntryStore<i32, ConstBuildHasher> =
            EntryStore::with_capacity_and_hasher(0, ConstBuildHasher);
        run_scenario(sut, &pool, ops)?;
    }
}
