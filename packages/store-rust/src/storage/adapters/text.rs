//! [`StorageAdapter`] over a synchronous string key/value store.
//!
//! Records are stored as JSON text. Entries that fail to parse, or parse to
//! something other than an object, are deleted on read and reported absent.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use preset_store_core::{into_record, Record};
use thiserror::Error;

use crate::storage::adapter::StorageAdapter;

/// Failure reported by a [`TextStore`] write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextStoreError {
    /// The store's capacity would be exceeded.
    #[error("text store quota exceeded ({needed} bytes needed, {capacity} available)")]
    QuotaExceeded {
        /// Bytes the store would hold after the write.
        needed: usize,
        /// Configured capacity in bytes.
        capacity: usize,
    },
    /// Any other store failure.
    #[error("text store failure: {0}")]
    Other(String),
}

/// Synchronous string → string store, the shape of a browser-style local
/// storage.
pub trait TextStore: Send + Sync {
    /// Every key currently stored.
    fn keys(&self) -> Vec<String>;

    /// Reads the raw text under `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Writes raw text under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`TextStoreError`] if the write was refused.
    fn set_item(&self, key: &str, value: &str) -> Result<(), TextStoreError>;

    /// Deletes `key`.
    fn remove_item(&self, key: &str);

    /// Deletes everything.
    fn clear(&self);
}

/// Adapter turning a [`TextStore`] into a [`StorageAdapter`].
#[derive(Debug)]
pub struct TextStoreAdapter<S> {
    store: S,
}

impl<S: TextStore> TextStoreAdapter<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    fn read(&self, key: &str) -> Option<Record> {
        let text = self.store.get_item(key)?;
        let record = serde_json::from_str(&text).ok().and_then(into_record);
        if record.is_none() {
            tracing::debug!(key, "dropping stored entry that is not a JSON object");
            self.store.remove_item(key);
        }
        record
    }
}

#[async_trait]
impl<S: TextStore> StorageAdapter for TextStoreAdapter<S> {
    async fn all(&self) -> BTreeMap<String, Record> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|key| self.read(&key).map(|record| (key, record)))
            .collect()
    }

    async fn get(&self, key: &str) -> Option<Record> {
        self.read(key)
    }

    async fn set(&self, key: &str, record: &Record) {
        let text = match serde_json::to_string(record) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(key, error = %err, "record could not be encoded");
                return;
            }
        };
        if let Err(err) = self.store.set_item(key, &text) {
            tracing::debug!(key, error = %err, "text store write failed");
        }
    }

    async fn remove(&self, key: &str) {
        self.store.remove_item(key);
    }

    async fn clear(&self) {
        self.store.clear();
    }
}

/// In-memory [`TextStore`] with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryTextStore {
    items: Mutex<BTreeMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryTextStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses writes once keys plus values exceed
    /// `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::default(),
            capacity: Some(capacity),
        }
    }
}

impl TextStore for MemoryTextStore {
    fn keys(&self) -> Vec<String> {
        self.items.lock().keys().cloned().collect()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), TextStoreError> {
        let mut items = self.items.lock();
        if let Some(capacity) = self.capacity {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > capacity {
                return Err(TextStoreError::QuotaExceeded { needed, capacity });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }

    fn clear(&self) {
        self.items.lock().clear();
    }
}
