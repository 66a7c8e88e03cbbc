use serde::de::{self, MapAccess, SeqAccess, Unexpected, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::hash::BuildHasher;
use std::marker::PhantomData;

use crate::{Aggregate, Error, Index, Key, Map};

// Upper bound on preallocation driven by an untrusted size hint.
const MAX_PREALLOCATE: usize = 4096;

impl Serialize for Index {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        match self {
            Index::Int(i) => serializer.serialize_i64(*i),
            Index::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Index {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(IndexVisitor)
    }
}

struct IndexVisitor;

impl Visitor<'_> for IndexVisitor {
    type Value = Index;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "an integer or string index")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Index, E> {
        Ok(Index::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Index, E> {
        i64::try_from(v)
            .map(Index::Int)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    // Text formats quote map keys; decimal integers in canonical form are
    // integer indices, everything else stays a string.
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Index, E> {
        match v.parse::<i64>() {
            Ok(i) if i.to_string() == v => Ok(Index::Int(i)),
            _ => Ok(Index::from(v)),
        }
    }
}

impl Serialize for Key {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        if let Key::Aggregate(aggregate) = self {
            if aggregate.is_cyclic() {
                return Err(ser::Error::custom(Error::CyclicAggregate));
            }
        }
        Acyclic(self).serialize(serializer)
    }
}

/// A key already checked to contain no cycles.
struct Acyclic<'a>(&'a Key);

impl Serialize for Acyclic<'_> {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        match self.0 {
            Key::Null => serializer.serialize_unit(),
            Key::Bool(b) => serializer.serialize_bool(*b),
            Key::Int(i) => serializer.serialize_i64(*i),
            // Text formats have no NaN or infinity; they would come back as
            // null and collide with the null key.
            Key::Float(f) if !f.is_finite() => Err(ser::Error::custom(Error::Unserializable {
                kind: "non-finite float",
            })),
            Key::Float(f) => serializer.serialize_f64(*f),
            Key::Str(s) => serializer.serialize_str(s),
            Key::Aggregate(aggregate) => serialize_aggregate(aggregate, serializer),
            other => Err(ser::Error::custom(Error::Unserializable { kind: other.kind() })),
        }
    }
}

fn serialize_aggregate<Sr>(aggregate: &Aggregate, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
where
    Sr: Serializer,
{
    let Some(entries) = aggregate.try_entries() else {
        return Err(ser::Error::custom("aggregate is being mutated"));
    };
    let is_list = entries
        .iter()
        .enumerate()
        .all(|(position, (index, _))| matches!(index, Index::Int(i) if usize::try_from(*i) == Ok(position)));

    if is_list {
        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for (_, value) in entries.iter() {
            seq.serialize_element(&Acyclic(value))?;
        }
        seq.end()
    } else {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (index, value) in entries.iter() {
            map.serialize_entry(index, &Acyclic(value))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(KeyVisitor)
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = Key;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a scalar, sequence or map key")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Key, E> {
        Ok(Key::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Key, E> {
        Ok(Key::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Key, D::Error>
    where
        D: Deserializer<'de>,
    {
        Key::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Key, E> {
        Ok(Key::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Key, E> {
        Ok(Key::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Key, E> {
        i64::try_from(v)
            .map(Key::Int)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Key, E> {
        Ok(Key::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Key, E> {
        Ok(Key::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Key, E> {
        Ok(Key::from(v))
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Key, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let aggregate = Aggregate::new();
        while let Some(element) = access.next_element::<Key>()? {
            aggregate.push(element);
        }
        Ok(Key::Aggregate(aggregate))
    }

    fn visit_map<M>(self, mut access: M) -> Result<Key, M::Error>
    where
        M: MapAccess<'de>,
    {
        let aggregate = Aggregate::new();
        while let Some((index, element)) = access.next_entry::<Index, Key>()? {
            aggregate.set(index, element);
        }
        Ok(Key::Aggregate(aggregate))
    }
}

impl<V, S> Serialize for Map<V, S>
where
    V: Serialize,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

impl<'de, V, S> Deserialize<'de> for Map<V, S>
where
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(PairsVisitor::new())
    }
}

struct PairsVisitor<V, S> {
    _marker: PhantomData<Map<V, S>>,
}

impl<V, S> PairsVisitor<V, S> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<'de, V, S> Visitor<'de> for PairsVisitor<V, S>
where
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    type Value = Map<V, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a sequence of [key, value] pairs")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let capacity = access.size_hint().unwrap_or(0).min(MAX_PREALLOCATE);
        let mut map = Map::with_capacity_and_hasher(capacity, S::default());
        while let Some((key, value)) = access.next_element::<(Key, V)>()? {
            map.insert(key, value);
        }
        log::trace!("deserialized map with {} entries", map.len());
        Ok(map)
    }
}
