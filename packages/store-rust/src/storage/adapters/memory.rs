//! In-memory [`StorageAdapter`] backed by [`DashMap`].
//!
//! Holds records for the lifetime of the process only. Used for tests and for
//! sessions where nothing needs to survive a restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use preset_store_core::Record;

use crate::storage::adapter::StorageAdapter;

/// In-memory backend. Never fails.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    entries: DashMap<String, Record>,
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter pre-populated with `records`.
    #[must_use]
    pub fn seeded<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, Record)>,
    {
        let adapter = Self::new();
        adapter.seed(records);
        adapter
    }

    /// Inserts records directly, bypassing any engine.
    pub fn seed<I>(&self, records: I)
    where
        I: IntoIterator<Item = (String, Record)>,
    {
        for (key, record) in records {
            self.entries.insert(key, record);
        }
    }

    /// Point-in-time copy of every stored record, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Record> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn all(&self) -> BTreeMap<String, Record> {
        self.snapshot()
    }

    async fn get(&self, key: &str) -> Option<Record> {
        self.entries.get(key).map(|r| r.clone())
    }

    async fn set(&self, key: &str, record: &Record) {
        self.entries.insert(key.to_string(), record.clone());
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}
