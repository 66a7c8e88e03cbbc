//! Dynamic key model: scalars, handles, object references and aggregates.
//!
//! `Key` is the tagged variant every map operation dispatches on. Scalars
//! compare by value, handles by `(kind, id)`, objects by identity unless they
//! carry the [`Hashable`] capability, and aggregates structurally.
//!
//! Aggregates are shared (`Rc<RefCell<..>>`) so they can refer to
//! themselves. Self-referential aggregates are `Rc` cycles and are never
//! reclaimed; the map stores its own cycle-preserving copy of every aggregate
//! key it inserts.

use crate::equality::keys_equal;
use crate::hashable::Hashable;
use crate::hasher::{hash_key, HashToken};
use core::any::Any;
use core::cell::{Ref, RefCell};
use core::fmt;
use hashbrown::{HashMap, HashSet};
use std::rc::Rc;

/// Position label of an aggregate element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    Int(i64),
    Str(Rc<str>),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Int(i) => write!(f, "{i}"),
            Index::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Index {
    fn from(i: i64) -> Self {
        Index::Int(i)
    }
}

impl From<i32> for Index {
    fn from(i: i32) -> Self {
        Index::Int(i64::from(i))
    }
}

impl From<&str> for Index {
    fn from(s: &str) -> Self {
        Index::Str(Rc::from(s))
    }
}

impl From<String> for Index {
    fn from(s: String) -> Self {
        Index::Str(Rc::from(s))
    }
}

/// Opaque identity-bearing value such as an OS handle.
///
/// Two handles are the same key when both their kind and id match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: Rc<str>,
    id: u64,
}

impl Handle {
    pub fn new(kind: impl Into<Rc<str>>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Handle for an open file descriptor.
    #[cfg(unix)]
    pub fn from_fd<F: std::os::fd::AsRawFd>(fd: &F) -> Self {
        Self::new("fd", fd.as_raw_fd() as u64)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Identity-bearing reference to an arbitrary object.
///
/// Plain objects are keyed by the address of their allocation. Objects built
/// with [`ObjectRef::hashable`] carry the [`Hashable`] capability and are
/// keyed by whatever their `hash`/`equals` say.
#[derive(Clone)]
pub struct ObjectRef {
    object: Rc<dyn Any>,
    capability: Option<Rc<dyn Hashable>>,
}

impl ObjectRef {
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    pub fn from_rc<T: Any>(object: Rc<T>) -> Self {
        Self {
            object,
            capability: None,
        }
    }

    pub fn hashable<T: Hashable + Any>(value: T) -> Self {
        Self::hashable_from_rc(Rc::new(value))
    }

    pub fn hashable_from_rc<T: Hashable + Any>(object: Rc<T>) -> Self {
        let capability: Rc<dyn Hashable> = object.clone();
        Self {
            object,
            capability: Some(capability),
        }
    }

    pub fn capability(&self) -> Option<&dyn Hashable> {
        self.capability.as_deref()
    }

    pub fn is_hashable(&self) -> bool {
        self.capability.is_some()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.object).downcast_ref::<T>()
    }

    /// True when both refer to the same allocation.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("hashable", &self.is_hashable())
            .finish()
    }
}

#[derive(Default)]
struct Elements {
    entries: Vec<(Index, Key)>,
    next_int: i64,
}

/// Shared, ordered `Index -> Key` mapping that may contain itself.
///
/// Cloning an `Aggregate` clones the reference, not the contents; use
/// [`Aggregate::deep_copy`] for an independent copy.
#[derive(Clone, Default)]
pub struct Aggregate(Rc<RefCell<Elements>>);

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate holding `keys` at indices `0..n`.
    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let aggregate = Self::new();
        for key in keys {
            aggregate.push(key);
        }
        aggregate
    }

    /// Append at the next integer index (one past the largest integer index
    /// used so far).
    pub fn push(&self, key: impl Into<Key>) {
        let key = key.into();
        let mut elements = self.0.borrow_mut();
        let index = elements.next_int;
        elements.entries.push((Index::Int(index), key));
        elements.next_int = index.saturating_add(1);
    }

    /// Replace the element at `index` in place, or append it.
    pub fn set(&self, index: impl Into<Index>, key: impl Into<Key>) {
        let (index, key) = (index.into(), key.into());
        let mut elements = self.0.borrow_mut();
        if let Index::Int(i) = index {
            if i >= elements.next_int {
                elements.next_int = i.saturating_add(1);
            }
        }
        let position = elements.entries.iter().position(|(at, _)| *at == index);
        match position {
            Some(position) => {
                let replaced = core::mem::replace(&mut elements.entries[position].1, key);
                // The replaced key may own the last handle to an object whose
                // drop glue reads this aggregate.
                drop(elements);
                drop(replaced);
            }
            None => elements.entries.push((index, key)),
        }
    }

    pub fn get(&self, index: impl Into<Index>) -> Option<Key> {
        let index = index.into();
        self.0
            .borrow()
            .entries
            .iter()
            .find(|(at, _)| *at == index)
            .map(|(_, key)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shallow copy of the elements in order.
    pub fn to_vec(&self) -> Vec<(Index, Key)> {
        self.0.borrow().entries.clone()
    }

    /// True when both refer to the same aggregate.
    pub fn ptr_eq(&self, other: &Aggregate) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Independent copy of the whole reachable graph. Shared and cyclic
    /// references inside the aggregate are reproduced between the copies.
    pub fn deep_copy(&self) -> Aggregate {
        let mut copies = HashMap::new();
        self.copy_into(&mut copies)
    }

    fn copy_into(&self, copies: &mut HashMap<usize, Aggregate>) -> Aggregate {
        if let Some(copy) = copies.get(&self.addr()) {
            return copy.clone();
        }
        let copy = Aggregate::new();
        copies.insert(self.addr(), copy.clone());

        let source = self.0.borrow();
        let entries = source
            .entries
            .iter()
            .map(|(index, key)| {
                let key = match key {
                    Key::Aggregate(inner) => Key::Aggregate(inner.copy_into(copies)),
                    other => other.clone(),
                };
                (index.clone(), key)
            })
            .collect();
        let next_int = source.next_int;
        drop(source);

        *copy.0.borrow_mut() = Elements { entries, next_int };
        copy
    }

    /// True when the aggregate can reach itself or one of its ancestors.
    pub fn is_cyclic(&self) -> bool {
        self.reaches(&mut Vec::new(), &mut HashSet::new())
    }

    /// Depth-first search for a back edge. `acyclic` holds aggregates whose
    /// whole reachable graph is already known to be free of cycles, so shared
    /// sub-aggregates are walked once.
    fn reaches(&self, path: &mut Vec<usize>, acyclic: &mut HashSet<usize>) -> bool {
        let addr = self.addr();
        if path.contains(&addr) {
            return true;
        }
        if acyclic.contains(&addr) {
            return false;
        }
        let Some(entries) = self.try_entries() else {
            return false;
        };
        path.push(addr);
        let cyclic = entries
            .iter()
            .any(|(_, key)| matches!(key, Key::Aggregate(inner) if inner.reaches(path, acyclic)));
        path.pop();
        if !cyclic {
            acyclic.insert(addr);
        }
        cyclic
    }

    /// Borrow the elements, or `None` while the aggregate is being mutated.
    pub(crate) fn try_entries(&self) -> Option<Ref<'_, [(Index, Key)]>> {
        self.0
            .try_borrow()
            .ok()
            .map(|elements| Ref::map(elements, |e| e.entries.as_slice()))
    }

    /// Copy of the elements, or `None` while the aggregate is being mutated.
    /// Walks that may call into user code iterate a snapshot so that code is
    /// free to mutate the aggregate.
    pub(crate) fn try_snapshot(&self) -> Option<Vec<(Index, Key)>> {
        self.try_entries().map(|entries| entries.to_vec())
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Hold the aggregate mutably borrowed, as if a mutation were in progress.
    #[cfg(test)]
    pub(crate) fn lock_for_test(&self) -> core::cell::RefMut<'_, Vec<(Index, Key)>> {
        core::cell::RefMut::map(self.0.borrow_mut(), |e| &mut e.entries)
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: the aggregate may contain itself.
        let len = self.try_entries().map(|entries| entries.len());
        f.debug_struct("Aggregate")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &len)
            .finish()
    }
}

/// Any value usable as a map key.
#[derive(Clone)]
pub enum Key {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Handle(Handle),
    Object(ObjectRef),
    Aggregate(Aggregate),
}

impl Key {
    /// Canonical hash token; see [`hash_key`].
    pub fn hash_token(&self) -> HashToken {
        hash_key(self)
    }

    /// Logical equality with `self` as the first operand; see [`keys_equal`].
    pub fn equals(&self, other: &Key) -> bool {
        keys_equal(self, other)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Key::Null => "null",
            Key::Bool(_) => "bool",
            Key::Int(_) => "int",
            Key::Float(_) => "float",
            Key::Str(_) => "string",
            Key::Handle(_) => "handle",
            Key::Object(_) => "object",
            Key::Aggregate(_) => "aggregate",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Key::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Key::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Key::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Key::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&Aggregate> {
        match self {
            Key::Aggregate(a) => Some(a),
            _ => None,
        }
    }

    /// The form a key takes once the map owns it: aggregates are copied so
    /// later mutation of the caller's aggregate cannot change a stored key.
    pub(crate) fn detached(self) -> Key {
        match self {
            Key::Aggregate(aggregate) => Key::Aggregate(aggregate.deep_copy()),
            other => other,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => f.write_str("Null"),
            Key::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Key::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Key::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Key::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Key::Handle(h) => h.fmt(f),
            Key::Object(o) => o.fmt(f),
            Key::Aggregate(a) => a.fmt(f),
        }
    }
}

impl From<()> for Key {
    fn from(_: ()) -> Self {
        Key::Null
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<f64> for Key {
    fn from(f: f64) -> Self {
        Key::Float(f)
    }
}

impl From<f32> for Key {
    fn from(f: f32) -> Self {
        Key::Float(f64::from(f))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Key {
    fn from(s: Rc<str>) -> Self {
        Key::Str(s)
    }
}

impl From<Handle> for Key {
    fn from(h: Handle) -> Self {
        Key::Handle(h)
    }
}

impl From<&Handle> for Key {
    fn from(h: &Handle) -> Self {
        Key::Handle(h.clone())
    }
}

impl From<ObjectRef> for Key {
    fn from(o: ObjectRef) -> Self {
        Key::Object(o)
    }
}

impl From<&ObjectRef> for Key {
    fn from(o: &ObjectRef) -> Self {
        Key::Object(o.clone())
    }
}

impl From<Aggregate> for Key {
    fn from(a: Aggregate) -> Self {
        Key::Aggregate(a)
    }
}

impl From<&Aggregate> for Key {
    fn from(a: &Aggregate) -> Self {
        Key::Aggregate(a.clone())
    }
}

impl From<&Key> for Key {
    fn from(k: &Key) -> Self {
        k.clone()
    }
}
