use thiserror::Error;

/// Errors reported by [`Map`](crate::Map) and its serialization support.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cursor is stale: the map was compacted or cleared after it was created")]
    StaleCursor,
    #[error("aggregate key refers to itself and cannot be serialized")]
    CyclicAggregate,
    #[error("{kind} keys cannot be serialized")]
    Unserializable { kind: &'static str },
}
