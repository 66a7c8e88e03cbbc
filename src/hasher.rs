//! KeyHasher: canonical hash tokens for dynamic keys.
//!
//! A token only selects a bucket; equality always has the final word. Tokens
//! are therefore allowed to collide (`1`, `1.0` and `"1"` share one) but must
//! agree for keys that compare equal.

use crate::key::{Aggregate, Key};
use core::fmt;
use core::hash::Hasher;
use hashbrown::HashMap;
use std::rc::Rc;

const HANDLE_TAG: char = '\u{4}';
const OBJECT_TAG: char = '\u{5}';

// 2^63: every float in [-LIMIT, LIMIT) with no fraction fits in an i64.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Opaque canonical value derived from a key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashToken(Rc<str>);

impl HashToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HashToken").field(&&*self.0).finish()
    }
}

impl From<&str> for HashToken {
    fn from(s: &str) -> Self {
        HashToken(Rc::from(s))
    }
}

impl From<String> for HashToken {
    fn from(s: String) -> Self {
        HashToken(Rc::from(s))
    }
}

impl From<Rc<str>> for HashToken {
    fn from(s: Rc<str>) -> Self {
        HashToken(s)
    }
}

impl From<i64> for HashToken {
    fn from(i: i64) -> Self {
        HashToken::from(i.to_string())
    }
}

impl From<i32> for HashToken {
    fn from(i: i32) -> Self {
        HashToken::from(i64::from(i))
    }
}

impl From<u64> for HashToken {
    fn from(i: u64) -> Self {
        HashToken::from(i.to_string())
    }
}

impl From<bool> for HashToken {
    fn from(b: bool) -> Self {
        HashToken::from(if b { "1" } else { "0" })
    }
}

/// Derive the hash token for `key`.
///
/// Aggregates are hashed structurally and terminate on self-references.
pub fn hash_key(key: &Key) -> HashToken {
    match key {
        Key::Null => HashToken::from(""),
        Key::Bool(b) => HashToken::from(*b),
        Key::Int(i) => HashToken::from(*i),
        Key::Float(f) => float_token(*f),
        Key::Str(s) => HashToken(s.clone()),
        Key::Handle(h) => HashToken::from(format!("{HANDLE_TAG}{}#{}", h.kind(), h.id())),
        Key::Object(o) => match o.capability() {
            Some(capability) => capability.hash(),
            None => HashToken::from(format!("{OBJECT_TAG}{:x}", o.addr())),
        },
        Key::Aggregate(a) => HashToken::from(StructuralHasher::default().node(a).text),
    }
}

fn float_token(f: f64) -> HashToken {
    if f.is_nan() {
        HashToken::from("NAN")
    } else if f.is_infinite() {
        HashToken::from(if f > 0.0 { "INF" } else { "-INF" })
    } else if f.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&f) {
        HashToken::from(f as i64)
    } else {
        HashToken::from(f.to_string())
    }
}

/// Text of one aggregate produced by [`StructuralHasher::node`].
struct Node {
    text: String,
    // Shallowest path depth a back-reference inside this aggregate points at.
    reach: Option<usize>,
}

/// Depth-first structural hash of one aggregate key.
///
/// Every element of an aggregate emits one field, `len:index` followed by
/// - `=len:token` for non-aggregate values,
/// - `@digest` for a nested aggregate, the digest of its own text,
/// - `^ref<d>` when the nested aggregate is the aggregate itself (`d == 0`)
///   or its `d`-th ancestor.
///
/// Length prefixes keep fields unambiguous, and digests keep each text
/// proportional to its own element count. An aggregate whose back-references
/// all stay inside it hashes the same wherever it is reached, so its digest
/// is computed once per walk.
#[derive(Default)]
struct StructuralHasher {
    // address -> depth, for aggregates on the current path
    path: HashMap<usize, usize>,
    // address -> digest, for aggregates with no reference above themselves
    closed: HashMap<usize, u64>,
}

impl StructuralHasher {
    fn node(&mut self, aggregate: &Aggregate) -> Node {
        let depth = self.path.len();
        let Some(elements) = aggregate.try_snapshot() else {
            log::debug!("aggregate at depth {depth} is being mutated; hashing it as a back-reference");
            return Node {
                text: String::from("busy"),
                reach: Some(depth),
            };
        };

        self.path.insert(aggregate.addr(), depth);
        let mut text = String::new();
        let mut reach = None;
        for (index, value) in &elements {
            push_prefixed(&mut text, &index.to_string());
            match value {
                Key::Aggregate(child) => match self.path.get(&child.addr()) {
                    Some(&level) => {
                        reach = shallower(reach, Some(level));
                        text.push_str(&format!("^ref{}", depth - level));
                    }
                    None => {
                        let (digest, child_reach) = self.child(child);
                        reach = shallower(reach, child_reach);
                        text.push_str(&format!("@{digest:016x}"));
                    }
                },
                other => {
                    text.push('=');
                    push_prefixed(&mut text, hash_key(other).as_str());
                }
            }
        }
        self.path.remove(&aggregate.addr());
        Node { text, reach }
    }

    fn child(&mut self, child: &Aggregate) -> (u64, Option<usize>) {
        if let Some(&digest) = self.closed.get(&child.addr()) {
            return (digest, None);
        }
        let depth = self.path.len();
        let node = self.node(child);
        let digest = digest(&node.text);
        if node.reach.map_or(true, |level| level > depth) {
            self.closed.insert(child.addr(), digest);
        }
        (digest, node.reach)
    }
}

fn shallower(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn push_prefixed(out: &mut String, text: &str) {
    out.push_str(&text.len().to_string());
    out.push(':');
    out.push_str(text);
}

/// Fixed-seed hasher for nested aggregate digests; tokens must not depend on
/// per-process random state.
struct DigestHasher {
    state: u64,
}

impl DigestHasher {
    const SEED: u64 = 0x16f1_1fe8_9b0d_677c;
    const MULTIPLIER: u64 = 0x517c_c1b7_2722_0a95;
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self { state: Self::SEED }
    }
}

impl Hasher for DigestHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ u64::from(byte);
        }
    }

    fn finish(&self) -> u64 {
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

fn digest(text: &str) -> u64 {
    let mut hasher = DigestHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}
