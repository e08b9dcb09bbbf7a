//! Validation strategies injected into item handles.
//!
//! The store never interprets a record. Each item is given an
//! [`ItemSchema`] that decides whether a stored record is acceptable and
//! produces a default when nothing is stored.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::types::{into_record, Record};

/// Outcome of validating a stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// The record is acceptable; the carried value is what readers get.
    Valid(Record),
    /// The record is corrupt; the carried value replaces it in the store.
    Invalid(Record),
}

impl Validation {
    /// Whether the stored record was acceptable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The record readers should observe.
    #[must_use]
    pub fn into_record(self) -> Record {
        match self {
            Self::Valid(record) | Self::Invalid(record) => record,
        }
    }
}

/// Validation and default-construction strategy for one logical key.
///
/// Used as `Arc<dyn ItemSchema>`.
pub trait ItemSchema: Send + Sync {
    /// Checks a raw stored record for `key`.
    ///
    /// Implementations should not panic for plain mappings; a panic is
    /// treated as [`Validation::Invalid`] with [`create_default`] as the
    /// replacement.
    ///
    /// [`create_default`]: ItemSchema::create_default
    fn validate(&self, key: &str, raw: &Record) -> Validation;

    /// Produces the record used when `key` has no stored value. Must be pure.
    fn create_default(&self, key: &str) -> Record;
}

type ValidateFn = dyn Fn(&str, &Record) -> Validation + Send + Sync;
type FactoryFn = dyn Fn(&str) -> Record + Send + Sync;

/// [`ItemSchema`] built from a validator closure and a factory closure.
#[derive(Clone)]
pub struct FnSchema {
    validate: Arc<ValidateFn>,
    factory: Arc<FactoryFn>,
}

impl FnSchema {
    /// Creates a schema from a validator and a default factory.
    pub fn new<V, F>(validate: V, factory: F) -> Self
    where
        V: Fn(&str, &Record) -> Validation + Send + Sync + 'static,
        F: Fn(&str) -> Record + Send + Sync + 'static,
    {
        Self {
            validate: Arc::new(validate),
            factory: Arc::new(factory),
        }
    }

    /// Schema that accepts every record and defaults to `default`.
    #[must_use]
    pub fn accept_all(default: Record) -> Self {
        Self::new(
            |_, raw| Validation::Valid(raw.clone()),
            move |_| default.clone(),
        )
    }
}

impl ItemSchema for FnSchema {
    fn validate(&self, key: &str, raw: &Record) -> Validation {
        (self.validate)(key, raw)
    }

    fn create_default(&self, key: &str) -> Record {
        (self.factory)(key)
    }
}

impl std::fmt::Debug for FnSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSchema").finish_non_exhaustive()
    }
}

/// [`ItemSchema`] that validates by deserializing into `T`.
///
/// A record that deserializes is normalised by serializing `T` back. A record
/// that does not is replaced with `T::default()`.
pub struct SerdeSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    /// Creates the schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `value` into a record, or an empty record if `T` does not
/// serialize to a JSON object.
pub fn to_record<T: Serialize>(value: &T) -> Record {
    serde_json::to_value(value)
        .ok()
        .and_then(into_record)
        .unwrap_or_default()
}

/// Deserializes a record into `T`.
///
/// # Errors
///
/// Returns the `serde_json` error if the record does not match `T`.
pub fn from_record<T: DeserializeOwned>(record: &Record) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(record.clone()))
}

impl<T> ItemSchema for SerdeSchema<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn validate(&self, key: &str, raw: &Record) -> Validation {
        match from_record::<T>(raw) {
            Ok(value) => Validation::Valid(to_record(&value)),
            Err(err) => {
                tracing::debug!(key, error = %err, "record does not match its schema");
                Validation::Invalid(to_record(&T::default()))
            }
        }
    }

    fn create_default(&self, _key: &str) -> Record {
        to_record(&T::default())
    }
}
