//! Durable [`StorageAdapter`] backed by a single-file [`redb`] database.
//!
//! Records are stored as JSON text in one table. redb calls block, so each
//! operation runs on the blocking pool. Failures are logged at `debug` and
//! normalised per the adapter contract.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use preset_store_core::{into_record, Record};
use redb::{Database, ReadableTable, TableDefinition, TableError};

use crate::storage::adapter::StorageAdapter;

const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");

/// redb-backed backend.
#[derive(Clone)]
pub struct RedbAdapter {
    db: Arc<Database>,
}

impl RedbAdapter {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a redb
    /// database.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                tracing::debug!(op, error = %err, "redb operation failed");
                None
            }
            Err(err) => {
                tracing::debug!(op, error = %err, "redb task did not complete");
                None
            }
        }
    }
}

impl std::fmt::Debug for RedbAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbAdapter").finish_non_exhaustive()
    }
}

fn parse(text: &str) -> Option<Record> {
    serde_json::from_str(text).ok().and_then(into_record)
}

fn remove_keys(db: &Database, keys: &[String]) -> anyhow::Result<()> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(RECORDS)?;
        for key in keys {
            table.remove(key.as_str())?;
        }
    }
    txn.commit()?;
    Ok(())
}

fn read_all(db: &Database) -> anyhow::Result<BTreeMap<String, Record>> {
    let txn = db.begin_read()?;
    let table = match txn.open_table(RECORDS) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut records = BTreeMap::new();
    let mut rejected = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let key = key.value().to_string();
        match parse(value.value()) {
            Some(record) => {
                records.insert(key, record);
            }
            None => rejected.push(key),
        }
    }
    drop(table);
    drop(txn);
    if !rejected.is_empty() {
        tracing::debug!(count = rejected.len(), "dropping stored entries that are not JSON objects");
        remove_keys(db, &rejected)?;
    }
    Ok(records)
}

fn read_one(db: &Database, key: &str) -> anyhow::Result<Option<Record>> {
    let txn = db.begin_read()?;
    let table = match txn.open_table(RECORDS) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Some(text) = table.get(key)?.map(|guard| guard.value().to_string()) else {
        return Ok(None);
    };
    drop(table);
    drop(txn);
    match parse(&text) {
        Some(record) => Ok(Some(record)),
        None => {
            remove_keys(db, &[key.to_string()])?;
            Ok(None)
        }
    }
}

#[async_trait]
impl StorageAdapter for RedbAdapter {
    async fn all(&self) -> BTreeMap<String, Record> {
        self.blocking("all", read_all).await.unwrap_or_default()
    }

    async fn get(&self, key: &str) -> Option<Record> {
        let key = key.to_string();
        self.blocking("get", move |db| read_one(db, &key))
            .await
            .flatten()
    }

    async fn set(&self, key: &str, record: &Record) {
        let key = key.to_string();
        let text = match serde_json::to_string(record) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "record could not be encoded");
                return;
            }
        };
        self.blocking("set", move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(RECORDS)?;
                table.insert(key.as_str(), text.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await;
    }

    async fn remove(&self, key: &str) {
        let key = key.to_string();
        self.blocking("remove", move |db| remove_keys(db, &[key])).await;
    }

    async fn clear(&self) {
        self.blocking("clear", |db| {
            let txn = db.begin_write()?;
            txn.delete_table(RECORDS)?;
            txn.commit()?;
            Ok(())
        })
        .await;
    }
}
