//! Persistence backend trait for the cache engine.
//!
//! Defines [`StorageAdapter`], the uniform async key → record interface the
//! [`CacheEngine`](super::CacheEngine) reads its initial snapshot from and
//! flushes pending writes to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use preset_store_core::Record;

/// Uniform asynchronous key → record backend.
///
/// Every operation is individually best-effort: implementations catch their
/// own errors and normalise them to "absent" for reads and to a silent no-op
/// for writes. Nothing an adapter does may fail the engine.
///
/// Values that are not plain mappings must never be returned; adapters drop
/// (and, where possible, delete) them.
///
/// Used as `Arc<dyn StorageAdapter>`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Reads every stored record.
    async fn all(&self) -> BTreeMap<String, Record>;

    /// Reads a single record, or `None` if absent or unreadable.
    async fn get(&self, key: &str) -> Option<Record>;

    /// Stores a record.
    async fn set(&self, key: &str, record: &Record);

    /// Deletes a record.
    async fn remove(&self, key: &str);

    /// Deletes every record.
    async fn clear(&self);
}
