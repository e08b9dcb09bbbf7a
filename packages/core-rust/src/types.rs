use std::sync::Arc;

use serde_json::{Map, Value};

/// Opaque plain mapping stored under one physical key.
///
/// The store never interprets the shape beyond "is a JSON object".
pub type Record = Map<String, Value>;

/// A record shared between the cache, the pending buffer and readers.
///
/// Cloning a `SharedRecord` copies the reference, not the mapping.
pub type SharedRecord = Arc<Record>;

/// Consumes `value`, returning the mapping if it is a plain JSON object.
///
/// Arrays, `null` and scalars are not records.
#[must_use]
pub fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Copies a record whose entries are primitives or arrays of primitives.
///
/// Records are acyclic by construction, so no cycle tracking is done. Nested
/// objects are cloned as a whole.
#[must_use]
pub fn shallow_copy(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| {
            let copied = match value {
                Value::Array(items) => Value::Array(items.iter().cloned().collect()),
                other => other.clone(),
            };
            (key.clone(), copied)
        })
        .collect()
}
