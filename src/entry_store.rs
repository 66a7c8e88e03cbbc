//! EntryStore: append-only slot array with a hash-bucketed index, tombstone
//! deletion and order-preserving compaction.

use crate::hasher::HashToken;
use crate::key::Key;
use core::hash::BuildHasher;
use core::mem;
use hashbrown::hash_table::Entry as TableEntry;
use hashbrown::HashTable;
use std::collections::hash_map::RandomState;

/// Maps this small are never compacted.
const COMPACT_MIN_LIVE: usize = 8;

#[derive(Clone, Debug)]
pub(crate) struct Entry<V> {
    pub(crate) hash: HashToken,
    pub(crate) key: Key,
    pub(crate) value: V,
}

/// Collision chain: live slots whose key produced `token`, in slot order.
#[derive(Clone, Debug)]
struct Bucket {
    token: HashToken,
    hash: u64,
    slots: Vec<usize>,
}

#[derive(Clone)]
pub(crate) struct EntryStore<V, S = RandomState> {
    hasher: S,
    index: HashTable<Bucket>,
    slots: Vec<Option<Entry<V>>>, // `None` is a tombstone
    live: usize,
    epoch: u64,
}

impl<V, S> EntryStore<V, S>
where
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            live: 0,
            epoch: 0,
        }
    }

    pub(crate) fn hasher(&self) -> &S {
        &self.hasher
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Allocated slots, tombstones included.
    pub(crate) fn slot_len(&self) -> usize {
        self.slots.len()
    }

    /// Advanced by every compaction and `clear`; slot positions observed in
    /// an earlier epoch are meaningless.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn slot(&self, slot: usize) -> Option<&Entry<V>> {
        self.slots.get(slot)?.as_ref()
    }

    pub(crate) fn slots(&self) -> &[Option<Entry<V>>] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<Entry<V>>] {
        &mut self.slots
    }

    pub(crate) fn into_slots(self) -> Vec<Option<Entry<V>>> {
        self.slots
    }

    fn bucket_hash(&self, token: &HashToken) -> u64 {
        self.hasher.hash_one(token)
    }

    fn find_slot<F>(&self, token: &HashToken, key: &Key, eq: F) -> Option<usize>
    where
        F: Fn(&Key, &Key) -> bool,
    {
        let bucket = self
            .index
            .find(self.bucket_hash(token), |b| b.token == *token)?;
        bucket.slots.iter().copied().find(|&slot| {
            self.slots
                .get(slot)
                .and_then(Option::as_ref)
                .is_some_and(|entry| eq(&entry.key, key))
        })
    }

    /// Entry whose stored key `eq`s `key`. The stored key is always the first
    /// argument of `eq`.
    pub(crate) fn get<F>(&self, token: &HashToken, key: &Key, eq: F) -> Option<&Entry<V>>
    where
        F: Fn(&Key, &Key) -> bool,
    {
        let slot = self.find_slot(token, key, eq)?;
        self.slot(slot)
    }

    pub(crate) fn get_mut<F>(&mut self, token: &HashToken, key: &Key, eq: F) -> Option<&mut Entry<V>>
    where
        F: Fn(&Key, &Key) -> bool,
    {
        let slot = self.find_slot(token, key, eq)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Overwrite the value of a matching entry in place, or append a new
    /// entry at the end of the slot array. Returns the replaced value.
    pub(crate) fn insert_or_update<F>(&mut self, token: HashToken, key: Key, value: V, eq: F) -> Option<V>
    where
        F: Fn(&Key, &Key) -> bool,
    {
        if let Some(entry) = self.get_mut(&token, &key, &eq) {
            return Some(mem::replace(&mut entry.value, value));
        }
        self.append(Entry {
            hash: token,
            key: key.detached(),
            value,
        });
        None
    }

    /// Tombstone the matching entry and unlink it from its bucket, then
    /// compact if the slot array has become mostly tombstones.
    pub(crate) fn remove<F>(&mut self, token: &HashToken, key: &Key, eq: F) -> Option<Entry<V>>
    where
        F: Fn(&Key, &Key) -> bool,
    {
        let hash = self.bucket_hash(token);
        let Ok(mut bucket) = self.index.find_entry(hash, |b| b.token == *token) else {
            return None;
        };
        let slots = &self.slots;
        let position = bucket.get().slots.iter().position(|&slot| {
            slots
                .get(slot)
                .and_then(Option::as_ref)
                .is_some_and(|entry| eq(&entry.key, key))
        })?;
        let slot = bucket.get_mut().slots.remove(position);
        if bucket.get().slots.is_empty() {
            bucket.remove();
        }

        let entry = self.slots.get_mut(slot)?.take()?;
        self.live -= 1;
        self.maybe_compact();
        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.live = 0;
        self.epoch = self.epoch.wrapping_add(1);
        log::trace!("cleared entry store");
    }

    fn append(&mut self, entry: Entry<V>) {
        let slot = self.slots.len();
        self.link(&entry.hash, slot);
        self.slots.push(Some(entry));
        self.live += 1;
    }

    fn link(&mut self, token: &HashToken, slot: usize) {
        let hash = self.bucket_hash(token);
        match self.index.entry(hash, |b| b.token == *token, |b| b.hash) {
            TableEntry::Occupied(mut bucket) => bucket.get_mut().slots.push(slot),
            TableEntry::Vacant(vacant) => {
                vacant.insert(Bucket {
                    token: token.clone(),
                    hash,
                    slots: vec![slot],
                });
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.live > COMPACT_MIN_LIVE && self.live < self.slots.len() / 2 {
            self.compact();
        }
    }

    /// Rebuild slots and index from the live entries, in their current order.
    fn compact(&mut self) {
        let allocated = self.slots.len();
        let survivors = mem::replace(&mut self.slots, Vec::with_capacity(self.live));
        self.index.clear();
        self.live = 0;
        for entry in survivors.into_iter().flatten() {
            self.append(entry);
        }
        self.epoch = self.epoch.wrapping_add(1);
        log::debug!(
            "compacted entry store from {allocated} to {} slots",
            self.slots.len()
        );
    }

    /// Panics unless every live slot sits in exactly one bucket, under the
    /// token stored in its entry, and `live` matches the slot array.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let live = self.slots.iter().filter(|slot| slot.is_some()).count();
        assert_eq!(live, self.live, "live count");

        let mut seen = vec![0usize; self.slots.len()];
        for bucket in self.index.iter() {
            assert!(!bucket.slots.is_empty(), "empty bucket left behind");
            assert_eq!(bucket.hash, self.bucket_hash(&bucket.token));
            assert!(
                bucket.slots.windows(2).all(|w| w[0] < w[1]),
                "chain out of slot order"
            );
            for &slot in &bucket.slots {
                let entry = self.slots[slot].as_ref().expect("chain points at a tombstone");
                assert_eq!(entry.hash, bucket.token);
                seen[slot] += 1;
            }
        }
        for (slot, entry) in self.slots.iter().enumerate() {
            assert_eq!(seen[slot], usize::from(entry.is_some()), "slot {slot}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equality::keys_equal;
    use crate::hasher::hash_key;
    use crate::key::Aggregate;

    fn store() -> EntryStore<i32> {
        EntryStore::with_capacity_and_hasher(0, RandomState::new())
    }

    fn put<S: BuildHasher>(s: &mut EntryStore<i32, S>, key: impl Into<Key>, value: i32) -> Option<i32> {
        let key = key.into();
        s.insert_or_update(hash_key(&key), key, value, keys_equal)
    }

    fn get<S: BuildHasher>(s: &EntryStore<i32, S>, key: impl Into<Key>) -> Option<i32> {
        let key = key.into();
        s.get(&hash_key(&key), &key, keys_equal).map(|e| e.value)
    }

    fn del<S: BuildHasher>(s: &mut EntryStore<i32, S>, key: impl Into<Key>) -> Option<i32> {
        let key = key.into();
        s.remove(&hash_key(&key), &key, keys_equal).map(|e| e.value)
    }

    fn live_ints<S: BuildHasher>(s: &EntryStore<i32, S>) -> Vec<i64> {
        s.slots()
            .iter()
            .flatten()
            .filter_map(|e| e.key.as_int())
            .collect()
    }

    /// Invariant: updating a present key keeps its slot and returns the old value.
    #[test]
    fn update_in_place() {
        let mut s = store();
        assert_eq!(put(&mut s, 1, 10), None);
        assert_eq!(put(&mut s, 2, 20), None);
        assert_eq!(put(&mut s, 1, 11), Some(10));
        assert_eq!(s.slot_len(), 2);
        assert_eq!(live_ints(&s), [1, 2]);
        assert_eq!(get(&s, 1), Some(11));
        s.assert_consistent();
    }

    /// Invariant: loosely-equal scalars share one bucket but stay separate entries.
    #[test]
    fn colliding_tokens_share_a_bucket() {
        let mut s = store();
        put(&mut s, 1, 1);
        put(&mut s, 1.0, 2);
        put(&mut s, "1", 3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.index.len(), 1);
        assert_eq!(get(&s, 1), Some(1));
        assert_eq!(get(&s, 1.0), Some(2));
        assert_eq!(get(&s, "1"), Some(3));
        s.assert_consistent();
    }

    /// Invariant: removing the last slot of a chain drops the bucket.
    #[test]
    fn empty_buckets_are_dropped() {
        let mut s = store();
        put(&mut s, "a", 1);
        put(&mut s, "b", 2);
        assert_eq!(del(&mut s, "a"), Some(1));
        assert_eq!(s.index.len(), 1);
        assert_eq!(del(&mut s, "a"), None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.slot_len(), 2, "tombstone stays until compaction");
        s.assert_consistent();
    }

    /// Invariant: after `remove`, reinserting the same key appends a fresh
    /// entry at the end.
    #[test]
    fn remove_then_reinsert_moves_to_end() {
        let mut s = store();
        for k in 1..=3 {
            put(&mut s, k, k as i32);
        }
        del(&mut s, 2);
        put(&mut s, 2, 4);
        assert_eq!(live_ints(&s), [1, 3, 2]);
        assert_eq!(get(&s, 2), Some(4));
        s.assert_consistent();
    }

    /// Invariant: compaction only starts above 8 live entries and below half
    /// of the allocated slots, and preserves order.
    #[test]
    fn compaction_thresholds_and_order() {
        let mut s = store();
        for k in 0..100i64 {
            put(&mut s, k, k as i32);
        }
        for k in 0..50i64 {
            del(&mut s, k);
        }
        assert_eq!(s.slot_len(), 100, "50 live is not below half of 100");
        assert_eq!(s.epoch(), 0);
        del(&mut s, 50);
        assert_eq!(s.len(), 49);
        assert_eq!(s.slot_len(), 49);
        assert_eq!(s.epoch(), 1);
        assert_eq!(live_ints(&s), (51..100).collect::<Vec<_>>());
        assert_eq!(get(&s, 99), Some(99));
        s.assert_consistent();

        let mut small = store();
        for k in 0..16i64 {
            put(&mut small, k, 0);
        }
        for k in 0..12i64 {
            del(&mut small, k);
        }
        assert_eq!(small.len(), 4);
        assert_eq!(small.slot_len(), 16, "maps of 8 or fewer are never compacted");
        small.assert_consistent();
    }

    /// Invariant: stored aggregate keys are detached from the caller's aggregate.
    #[test]
    fn stored_aggregates_are_copies() {
        let mut s = store();
        let a = Aggregate::from_keys([1, 2]);
        put(&mut s, &a, 1);
        a.push(3);
        assert_eq!(get(&s, Aggregate::from_keys([1, 2])), Some(1));
        assert_eq!(get(&s, &a), None);
    }

    #[test]
    fn clear_resets_and_bumps_epoch() {
        let mut s = store();
        put(&mut s, 1, 1);
        s.clear();
        assert_eq!(s.len(), 0);
        assert_eq!(s.slot_len(), 0);
        assert_eq!(s.epoch(), 1);
        assert_eq!(get(&s, 1), None);
        s.assert_consistent();
    }

    /// Invariant: lookups work when every token lands in the same `u64`
    /// bucket; token comparison and key equality resolve the right entry.
    #[test]
    fn collision_handling_with_const_hasher() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            } // force all tokens into the same hash bucket
        }

        let mut s: EntryStore<i32, ConstBuildHasher> =
            EntryStore::with_capacity_and_hasher(0, ConstBuildHasher);
        put(&mut s, "a", 1);
        put(&mut s, "b", 2);
        put(&mut s, Aggregate::from_keys(["a"]), 3);
        assert_eq!(s.index.len(), 3);
        assert_eq!(get(&s, "a"), Some(1));
        assert_eq!(get(&s, "b"), Some(2));
        assert_eq!(get(&s, Aggregate::from_keys(["a"])), Some(3));
        assert_eq!(del(&mut s, "a"), Some(1));
        assert_eq!(get(&s, "b"), Some(2));
        s.assert_consistent();
    }
}
