//! Map: the public insertion-ordered map over dynamic keys.

use crate::entry_store::{Entry, EntryStore};
use crate::equality::keys_equal;
use crate::error::Error;
use crate::hasher::hash_key;
use crate::key::Key;
use core::fmt;
use core::hash::BuildHasher;
use core::iter::FusedIterator;
use std::collections::hash_map::RandomState;

/// Insertion-ordered map from any [`Key`] to `V`.
///
/// Every operation hashes the key to a [`HashToken`](crate::HashToken),
/// narrows to the bucket for that token, and confirms candidates with
/// [`keys_equal`] using the stored key as the first operand.
///
/// Iteration follows insertion order. Overwriting a present key keeps its
/// position; deleting and re-inserting moves it to the end.
///
/// It is a logic error to mutate an aggregate obtained from the map's own
/// keys: the stored token would no longer match its contents.
#[derive(Clone)]
pub struct Map<V, S = RandomState> {
    store: EntryStore<V, S>,
}

impl<V> Map<V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Rebuild a map from ordered `(key, value)` pairs, as produced by
    /// [`Map::to_pairs`]. A repeated key keeps its first position and its
    /// last value.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
    {
        let map: Self = pairs.into_iter().collect();
        log::trace!("rebuilt map with {} entries from pairs", map.len());
        map
    }
}

impl<V, S> Default for Map<V, S>
where
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<V, S> Map<V, S>
where
    S: BuildHasher,
{
    /// Use `hasher` to place hash tokens in buckets. It is set once here and
    /// used for the lifetime of the map.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            store: EntryStore::with_capacity_and_hasher(capacity, hasher),
        }
    }

    pub fn hasher(&self) -> &S {
        self.store.hasher()
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Insert or overwrite, returning `self` for chaining.
    pub fn set(&mut self, key: impl Into<Key>, value: V) -> &mut Self {
        self.insert(key, value);
        self
    }

    /// Insert or overwrite, returning the previous value.
    pub fn insert(&mut self, key: impl Into<Key>, value: V) -> Option<V> {
        let key = key.into();
        let token = hash_key(&key);
        self.store.insert_or_update(token, key, value, keys_equal)
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// The stored key and its value. The stored key may differ from `key`
    /// when they are only logically equal.
    pub fn get_key_value(&self, key: impl Into<Key>) -> Option<(&Key, &V)> {
        let key = key.into();
        let token = hash_key(&key);
        self.store
            .get(&token, &key, keys_equal)
            .map(|entry| (&entry.key, &entry.value))
    }

    pub fn get_mut(&mut self, key: impl Into<Key>) -> Option<&mut V> {
        let key = key.into();
        let token = hash_key(&key);
        self.store
            .get_mut(&token, &key, keys_equal)
            .map(|entry| &mut entry.value)
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Remove `key`; true if an entry was removed.
    pub fn delete(&mut self, key: impl Into<Key>) -> bool {
        self.remove(key).is_some()
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: impl Into<Key>) -> Option<V> {
        let key = key.into();
        let token = hash_key(&key);
        self.store
            .remove(&token, &key, keys_equal)
            .map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn keys(&self) -> Keys<'_, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, V> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Alias of [`Map::iter`].
    pub fn entries(&self) -> Iter<'_, V> {
        self.iter()
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            slots: self.store.slots().iter(),
            remaining: self.store.len(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        let remaining = self.store.len();
        IterMut {
            slots: self.store.slots_mut().iter_mut(),
            remaining,
        }
    }

    /// Call `f(value, key)` for every entry in order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&V, &Key),
    {
        for (key, value) in self.iter() {
            f(value, key);
        }
    }

    /// Ordered snapshot for persistence; see [`Map::from_pairs`].
    pub fn to_pairs(&self) -> Vec<(Key, V)>
    where
        V: Clone,
    {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// A cursor positioned before the first entry.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            position: 0,
            epoch: self.store.epoch(),
        }
    }

    /// Step `cursor` to the next live entry.
    ///
    /// The cursor does not borrow the map, so the map may change between
    /// calls: entries appended behind the cursor's position are still
    /// reached, entries deleted before the cursor gets to them are skipped.
    /// Once a delete has compacted the map (or it was cleared) the cursor's
    /// position is meaningless and this returns [`Error::StaleCursor`].
    pub fn advance(&self, cursor: &mut Cursor) -> Result<Option<(&Key, &V)>, Error> {
        if cursor.epoch != self.store.epoch() {
            return Err(Error::StaleCursor);
        }
        while cursor.position < self.store.slot_len() {
            let slot = cursor.position;
            cursor.position += 1;
            if let Some(entry) = self.store.slot(slot) {
                return Ok(Some((&entry.key, &entry.value)));
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &EntryStore<V, S> {
        &self.store
    }
}

/// Position of an in-flight walk over a [`Map`]; see [`Map::advance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    epoch: u64,
}

impl<V, S> fmt::Debug for Map<V, S>
where
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Same entries in the same order, keys compared with [`keys_equal`]
/// (`self`'s key first).
impl<V, S> PartialEq for Map<V, S>
where
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((ka, va), (kb, vb))| keys_equal(ka, kb) && va == vb)
    }
}

impl<K, V, S> FromIterator<(K, V)> for Map<V, S>
where
    K: Into<Key>,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for Map<V, S>
where
    K: Into<Key>,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

/// Entries in insertion order.
pub struct Iter<'a, V> {
    slots: core::slice::Iter<'a, Option<Entry<V>>>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Key, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.slots.find_map(Option::as_ref)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some((&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
impl<V> FusedIterator for Iter<'_, V> {}

/// Entries in insertion order, values mutable.
pub struct IterMut<'a, V> {
    slots: core::slice::IterMut<'a, Option<Entry<V>>>,
    remaining: usize,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = (&'a Key, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.slots.find_map(Option::as_mut)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some((&entry.key, &mut entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for IterMut<'_, V> {}
impl<V> FusedIterator for IterMut<'_, V> {}

pub struct Keys<'a, V> {
    inner: Iter<'a, V>,
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a Key;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Keys<'_, V> {}
impl<V> FusedIterator for Keys<'_, V> {}

pub struct Values<'a, V> {
    inner: Iter<'a, V>,
}

impl<'a, V> Iterator for Values<'a, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Values<'_, V> {}
impl<V> FusedIterator for Values<'_, V> {}

pub struct ValuesMut<'a, V> {
    inner: IterMut<'a, V>,
}

impl<'a, V> Iterator for ValuesMut<'a, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for ValuesMut<'_, V> {}
impl<V> FusedIterator for ValuesMut<'_, V> {}

/// Owning iterator in insertion order.
pub struct IntoIter<V> {
    slots: std::vec::IntoIter<Option<Entry<V>>>,
    remaining: usize,
}

impl<V> Iterator for IntoIter<V> {
    type Item = (Key, V);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.slots.by_ref().flatten().next()?;
        self.remaining = self.remaining.saturating_sub(1);
        Some((entry.key, entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for IntoIter<V> {}
impl<V> FusedIterator for IntoIter<V> {}

impl<V, S> IntoIterator for Map<V, S>
where
    S: BuildHasher,
{
    type Item = (Key, V);
    type IntoIter = IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        let remaining = self.store.len();
        IntoIter {
            slots: self.store.into_slots().into_iter(),
            remaining,
        }
    }
}

impl<'a, V, S> IntoIterator for &'a Map<V, S>
where
    S: BuildHasher,
{
    type Item = (&'a Key, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, V, S> IntoIterator for &'a mut Map<V, S>
where
    S: BuildHasher,
{
    type Item = (&'a Key, &'a mut V);
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Aggregate;

    /// Invariant: 100 sequential keys with 51 deleted leave fewer than 100
    /// slots, 49 entries, and the survivors in their original order.
    #[test]
    fn packs_the_structure_when_it_shrinks() {
        let mut map = Map::new();
        for i in 0..100i64 {
            map.set(i, true);
        }
        for i in 0..51i64 {
            assert!(map.delete(i));
        }
        assert!(map.store().slot_len() < 100);
        assert_eq!(map.count(), 49);
        let keys: Vec<i64> = map.keys().filter_map(Key::as_int).collect();
        assert_eq!(keys, (51..100).collect::<Vec<_>>());
        map.store().assert_consistent();
    }

    /// Invariant: bulk load keeps the first position of a repeated key and
    /// its last value, and sets the live count to the distinct keys.
    #[test]
    fn from_pairs_is_last_write_wins_at_first_position() {
        let map = Map::from_pairs([(Key::from("a"), 1), (Key::from("b"), 2), (Key::from("a"), 3)]);
        assert_eq!(map.count(), 2);
        let keys: Vec<&str> = map.keys().filter_map(Key::as_str).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(map.get("a"), Some(&3));
        assert_eq!(map.store().slot_len(), 2);
    }

    #[test]
    fn cursor_goes_stale_after_compaction() {
        let mut map = Map::new();
        for i in 0..20i64 {
            map.set(i, i);
        }
        let mut cursor = map.cursor();
        assert_eq!(map.advance(&mut cursor).map(|e| e.map(|(_, v)| *v)), Ok(Some(0)));
        for i in 0..11i64 {
            map.delete(i);
        }
        assert_eq!(map.store().epoch(), 1);
        assert!(matches!(map.advance(&mut cursor), Err(Error::StaleCursor)));
    }

    #[test]
    fn iterators_are_exact_size() {
        let mut map = Map::new();
        map.set(1, "a").set(2, "b").set(3, "c");
        map.delete(2);
        let mut it = map.iter();
        assert_eq!(it.len(), 2);
        it.next();
        assert_eq!(it.len(), 1);
        assert_eq!(map.keys().len(), 2);
        assert_eq!(map.clone().into_iter().len(), 2);
    }

    #[test]
    fn aggregate_keys_are_snapshots() {
        let mut map = Map::new();
        let key = Aggregate::from_keys(["x"]);
        map.set(&key, 1);
        key.push("y");
        let stored = map.keys().next().and_then(Key::as_aggregate).cloned();
        let stored = stored.expect("aggregate key");
        assert!(!stored.ptr_eq(&key));
        assert_eq!(stored.len(), 1);
    }
}
