//! Capability that lets external key types supply their own hash and equality.

use crate::hasher::HashToken;
use crate::key::Key;

/// Opt-in override of identity semantics for object keys.
///
/// Wrap a value with [`ObjectRef::hashable`](crate::ObjectRef::hashable) to
/// have the map key it by `hash`/`equals` instead of by allocation.
///
/// Contract: whenever `a.equals(b)` holds, `a.hash() == b.hash()`. The map
/// only ever consults the capability of the first operand, and lookups always
/// pass the stored key first, so an asymmetric `equals` is observable.
///
/// `hash` and `equals` may run while an aggregate containing the object is
/// being hashed or compared. Mutating that aggregate from inside them is
/// allowed; the walk in progress sees the elements as they were when it
/// reached the aggregate.
///
/// ```
/// use anykey_map::{HashToken, Hashable, Key, Map, ObjectRef};
///
/// struct Point {
///     x: i64,
///     y: i64,
/// }
///
/// impl Hashable for Point {
///     fn hash(&self) -> HashToken {
///         HashToken::from(format!("{},{}", self.x, self.y))
///     }
///
///     fn equals(&self, other: &Key) -> bool {
///         other
///             .as_object()
///             .and_then(|o| o.downcast_ref::<Point>())
///             .is_some_and(|p| p.x == self.x && p.y == self.y)
///     }
/// }
///
/// let mut map = Map::new();
/// map.set(ObjectRef::hashable(Point { x: 1, y: 2 }), "a");
/// assert_eq!(map.get(ObjectRef::hashable(Point { x: 1, y: 2 })), Some(&"a"));
/// assert!(!map.has(ObjectRef::hashable(Point { x: 2, y: 1 })));
/// ```
pub trait Hashable {
    /// Any token; tokens only pick a bucket and never replace `equals`.
    fn hash(&self) -> HashToken;

    /// Logical equality, including the type check on `other`.
    fn equals(&self, other: &Key) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hash_key, keys_equal, Aggregate, ObjectRef};

    struct AcceptsAnything;

    impl Hashable for AcceptsAnything {
        fn hash(&self) -> HashToken {
            HashToken::from("any")
        }

        fn equals(&self, _other: &Key) -> bool {
            true
        }
    }

    /// Invariant: only the first operand's capability is consulted.
    #[test]
    fn delegation_is_asymmetric() {
        let permissive = Key::from(ObjectRef::hashable(AcceptsAnything));
        let plain = Key::from(ObjectRef::new(AcceptsAnything));
        assert!(keys_equal(&permissive, &plain));
        assert!(keys_equal(&permissive, &Key::Int(3)));
        assert!(!keys_equal(&plain, &permissive));
        assert!(!keys_equal(&Key::Int(3), &permissive));
    }

    /// Appends to the aggregate it lives in whenever it is consulted.
    struct Grows(Aggregate);

    impl Hashable for Grows {
        fn hash(&self) -> HashToken {
            self.0.push("hashed");
            HashToken::from("grows")
        }

        fn equals(&self, other: &Key) -> bool {
            self.0.push("compared");
            other.as_object().is_some_and(|o| o.downcast_ref::<Grows>().is_some())
        }
    }

    /// Invariant: a capability may mutate the aggregate being walked.
    #[test]
    fn capability_may_mutate_the_aggregate_under_walk() {
        let host = Aggregate::new();
        host.push(ObjectRef::hashable(Grows(host.clone())));

        let before = hash_key(&Key::from(&host));
        assert_eq!(host.len(), 2);

        let copy = host.deep_copy();
        assert!(keys_equal(&Key::from(&copy), &Key::from(&host)));
        assert_eq!(host.len(), 3);
        assert_eq!(copy.len(), 2);
        assert_ne!(hash_key(&Key::from(&host)), before);
    }

    #[test]
    fn hash_comes_from_the_capability() {
        let key = Key::from(ObjectRef::hashable(AcceptsAnything));
        assert_eq!(key.hash_token(), HashToken::from("any"));
    }
}
