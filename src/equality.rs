//! KeyEqualityChecker: logical key equality with capability delegation and
//! cycle-safe structural comparison of aggregates.

use crate::key::{Aggregate, Index, Key};
use hashbrown::HashSet;

/// Decide whether `a` and `b` are the same key.
///
/// - `a` carrying the [`Hashable`](crate::Hashable) capability decides alone
///   via `a.equals(b)`; the capability of `b` is never consulted.
/// - Two aggregates are equal when they have the same indices in the same
///   order, equal elements, and back-references to the same ancestor level.
/// - Everything else is strict: `Int(1)`, `Float(1.0)` and `Str("1")` are
///   three different keys. `NaN` equals `NaN` so it can be looked up again.
pub fn keys_equal(a: &Key, b: &Key) -> bool {
    match (a, b) {
        (Key::Object(object), _) => match object.capability() {
            Some(capability) => capability.equals(b),
            None => matches!(b, Key::Object(other) if object.ptr_eq(other)),
        },
        (Key::Aggregate(x), Key::Aggregate(y)) => {
            x.ptr_eq(y) || Comparison::default().aggregates(x, y).is_ok()
        }
        (Key::Null, Key::Null) => true,
        (Key::Bool(x), Key::Bool(y)) => x == y,
        (Key::Int(x), Key::Int(y)) => x == y,
        (Key::Float(x), Key::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Key::Str(x), Key::Str(y)) => x == y,
        (Key::Handle(x), Key::Handle(y)) => x == y,
        _ => false,
    }
}

struct Mismatch;

/// Shallowest path level a back-reference below a pair pointed at.
type Reach = Option<usize>;

/// State of one structural comparison.
#[derive(Default)]
struct Comparison {
    // Aggregate identity pairs currently being compared, outermost first.
    path: Vec<(usize, usize)>,
    // Pairs already found equal without referring above themselves; such a
    // pair compares equal wherever it is reached again.
    settled: HashSet<(usize, usize)>,
}

impl Comparison {
    fn aggregates(&mut self, a: &Aggregate, b: &Aggregate) -> Result<Reach, Mismatch> {
        // An aggregate under mutation cannot be walked; treat it as a mismatch.
        let (Some(left), Some(right)) = (a.try_snapshot(), b.try_snapshot()) else {
            return Err(Mismatch);
        };
        if left.len() != right.len() {
            return Err(Mismatch);
        }

        let pair = (a.addr(), b.addr());
        let level = self.path.len();
        self.path.push(pair);
        let reach = self.elements(&left, &right);
        self.path.pop();

        let reach = reach?;
        if reach.map_or(true, |shallowest| shallowest > level) {
            self.settled.insert(pair);
        }
        Ok(reach)
    }

    /// Compare one level: indices and scalar elements first, nested
    /// aggregates afterwards.
    fn elements(&mut self, left: &[(Index, Key)], right: &[(Index, Key)]) -> Result<Reach, Mismatch> {
        let mut reach = None;
        let mut deferred = Vec::new();
        for ((left_index, left_value), (right_index, right_value)) in left.iter().zip(right) {
            if left_index != right_index {
                return Err(Mismatch);
            }
            match (left_value, right_value) {
                (Key::Aggregate(x), Key::Aggregate(y)) => {
                    let left_level = self.path.iter().position(|&(l, _)| l == x.addr());
                    let right_level = self.path.iter().position(|&(_, r)| r == y.addr());
                    match (left_level, right_level) {
                        // Both sides close a cycle to the same ancestor level.
                        (Some(l), Some(r)) if l == r => reach = shallower(reach, Some(l)),
                        (None, None) => deferred.push((x, y)),
                        _ => return Err(Mismatch),
                    }
                }
                _ => {
                    if !keys_equal(left_value, right_value) {
                        return Err(Mismatch);
                    }
                }
            }
        }
        for (x, y) in deferred {
            if self.settled.contains(&(x.addr(), y.addr())) {
                continue;
            }
            reach = shallower(reach, self.aggregates(x, y)?);
        }
        Ok(reach)
    }
}

fn shallower(a: Reach, b: Reach) -> Reach {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
