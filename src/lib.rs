//! anykey-map: an insertion-ordered map whose keys may be any dynamic value,
//! including aggregates that contain themselves.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a dictionary keyed by scalars, OS handles, object references and
//!   (possibly self-referential) aggregates, with strict key equality and
//!   stable insertion order.
//! - Layers:
//!   - `key`: the `Key` variant and its building blocks (`Index`, `Handle`,
//!     `ObjectRef`, `Aggregate`).
//!   - `hasher`: derives a canonical `HashToken` per key. Tokens only pick a
//!     bucket and may collide; `1`, `1.0` and `"1"` share one.
//!   - `equality`: decides whether two keys are the same key. Objects with
//!     the `Hashable` capability decide for themselves.
//!   - `EntryStore`: append-only slot array with tombstones, plus a hashbrown
//!     index from token to the chain of slots holding that token.
//!   - `Map<V, S>`: public API that wires the three together.
//!
//! Constraints
//! - Single-threaded: keys share `Rc`s, so `Map` is `!Send`/`!Sync`.
//! - Hashing and equality terminate on every key, cyclic or not.
//! - A key that compares equal must produce the same token.
//! - Iteration follows first insertion; overwrites keep their position.
//!
//! Hasher and rehashing invariants
//! - Each bucket stores the `u64` of its token, so growing the index never
//!   re-derives tokens or walks aggregates.
//! - The caller's `S: BuildHasher` only ever hashes tokens, never keys.
//!
//! Deletion and compaction
//! - Deleting tombstones the slot; iteration skips tombstones.
//! - When more than 8 entries are live and fewer than half of the slots are,
//!   the store is rebuilt in order. Each rebuild (and `clear`) advances an
//!   epoch so a `Cursor` created earlier reports `Error::StaleCursor`
//!   instead of yielding arbitrary entries.
//!
//! Notes and non-goals
//! - Aggregate keys are copied on insert; mutating the caller's aggregate
//!   afterwards does not move the entry.
//! - Self-referential aggregates are `Rc` cycles and are never freed.
//! - No thread-safe variant and no sorting or range queries.

mod entry_store;
mod entry_store_proptest;
pub mod equality;
mod error;
pub mod hashable;
pub mod hasher;
pub mod key;
mod map;
#[cfg(feature = "serde")]
mod serde_impls;

// Public surface
pub use equality::keys_equal;
pub use error::Error;
pub use hashable::Hashable;
pub use hasher::{hash_key, HashToken};
pub use key::{Aggregate, Handle, Index, Key, ObjectRef};
pub use map::{Cursor, IntoIter, Iter, IterMut, Keys, Map, Values, ValuesMut};
