//! Bulk export and import of the whole cache.
//!
//! The export format is a flat JSON object from physical key to record.
//! Importing replaces the cache, the pending buffer and the backend contents
//! in one locked span.

use std::collections::BTreeMap;

use preset_store_core::{into_record, shallow_copy, EventKind};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::diagnostics::Diagnostic;
use super::engine::{CacheEngine, Notifications};

/// Why an import was refused. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// The text was not JSON.
    #[error("imported text is not valid JSON: {0}")]
    Parse(String),
    /// The top-level value was not an object.
    #[error(
        "imported JSON must be an object of records, for example \
         {{ \"root.settings\": {{...}}, \"compilerOption.default.module\": {{...}} }}"
    )]
    NotAnObject,
    /// The value under a key was not an object.
    #[error("imported value for `{0}` is not an object")]
    InvalidRecord(String),
}

/// Outcome of a successful import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Records now in the cache.
    pub imported: usize,
    /// Previously cached keys absent from the import.
    pub removed: usize,
    /// Keys skipped for lying outside both key namespaces.
    pub ignored: Vec<String>,
}

impl CacheEngine {
    /// Pretty-printed JSON of every cached record, ending in a newline.
    #[must_use]
    pub fn to_json_text(&self) -> String {
        let records: serde_json::Map<String, Value> = self
            .all()
            .into_iter()
            .map(|(key, record)| (key, Value::Object(shallow_copy(&record))))
            .collect();
        format!("{:#}\n", Value::Object(records))
    }

    /// Parses `text` and imports it with [`from_json`](Self::from_json).
    ///
    /// # Errors
    ///
    /// As [`from_json`](Self::from_json), plus [`ImportError::Parse`].
    pub async fn from_json_text(&self, text: &str) -> Result<ImportReport, ImportError> {
        match serde_json::from_str(text) {
            Ok(json) => self.from_json(json).await,
            Err(err) => Err(self.reject(ImportError::Parse(err.to_string()))),
        }
    }

    /// Replaces everything with the records in `json`.
    ///
    /// Every previously cached key ends up `removed` unless the import holds
    /// it, every imported key ends up `updated`, and every live item gets one
    /// event with its final status and revalidates on its next read. The
    /// backend is cleared and rewritten before any event is emitted. Keys
    /// outside both namespaces are skipped and reported.
    ///
    /// # Errors
    ///
    /// Refuses a non-object top level or any non-object record, before
    /// changing anything.
    pub async fn from_json(&self, json: Value) -> Result<ImportReport, ImportError> {
        let mut token = self.inner.lock.acquire().await;
        let Value::Object(entries) = json else {
            return Err(self.reject(ImportError::NotAnObject));
        };
        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match into_record(value) {
                Some(record) => records.push((key, record)),
                None => return Err(self.reject(ImportError::InvalidRecord(key))),
            }
        }

        let mut report = ImportReport::default();
        let mut notes = Notifications::default();
        {
            let mut state = self.inner.state.lock();
            let mut status: BTreeMap<String, EventKind> = state
                .cache
                .keys()
                .map(|key| (key.clone(), EventKind::Removed))
                .collect();
            let items = state.live_items();
            for item in &items {
                item.forget_all();
            }
            state.cache.clear();
            state.pending.clear();

            for (key, record) in records {
                if self.inner.keys.classify(&key).is_err() {
                    report.ignored.push(key);
                    continue;
                }
                status.insert(key.clone(), EventKind::Updated);
                state.put(key, record.into());
            }

            report.imported = state.cache.len();
            for (key, kind) in status {
                if kind == EventKind::Removed {
                    report.removed += 1;
                }
                notes.engine(key, kind);
            }
            for item in items {
                let kind = if state.cache.contains_key(&item.physical_key()) {
                    EventKind::Updated
                } else {
                    EventKind::Removed
                };
                notes.item(item, kind);
            }
        }
        if !report.ignored.is_empty() {
            notes.diagnostic(Diagnostic::ImportKeysIgnored {
                keys: report.ignored.clone(),
            });
        }

        self.inner.adapter.clear().await;
        self.inner.flush(Some(&token)).await;
        notes.deliver(&self.inner);
        token.release();
        tracing::debug!(
            imported = report.imported,
            removed = report.removed,
            "import applied"
        );
        Ok(report)
    }

    fn reject(&self, err: ImportError) -> ImportError {
        self.inner.report(Diagnostic::ImportRejected {
            reason: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use preset_store_core::{listener, FnSchema, Record, StorageEvent};
    use serde_json::json;

    use super::*;
    use crate::storage::diagnostics::NullSink;
    use crate::storage::engine::tests::{
        collecting_sink, config, record, recorder, Call, RecordingAdapter,
    };

    #[tokio::test]
    async fn export_is_pretty_sorted_json() {
        let adapter = RecordingAdapter::seeded(vec![
            ("root.settings", json!({ "theme": "dark" })),
            ("compilerOption.default.strict", json!({ "value": true })),
        ]);
        let engine = CacheEngine::new(config(50), adapter, Arc::new(NullSink));
        engine.when_ready().await;

        assert_eq!(
            engine.to_json_text(),
            "{\n  \"compilerOption.default.strict\": {\n    \"value\": true\n  },\n  \
             \"root.settings\": {\n    \"theme\": \"dark\"\n  }\n}\n"
        );
    }

    #[tokio::test]
    async fn import_replaces_cache_and_backend() {
        let adapter = RecordingAdapter::seeded(vec![
            ("a.old", json!({ "v": 1 })),
            ("a.kept", json!({ "v": 2 })),
        ]);
        let engine = CacheEngine::new(config(50), adapter.clone(), Arc::new(NullSink));
        engine.when_ready().await;
        let seen = recorder(&engine);

        let report = engine
            .from_json(json!({
                "a.kept": { "v": 20 },
                "compilerOption.default.strict": { "value": true }
            }))
            .await
            .unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                removed: 1,
                ignored: vec![]
            }
        );

        let calls = adapter.calls();
        assert_eq!(calls.first(), Some(&Call::Clear));
        assert_eq!(calls.len(), 3);
        assert_eq!(adapter.inner.len(), 2);
        assert_eq!(
            *seen.lock(),
            vec![
                StorageEvent::updated("a.kept"),
                StorageEvent::removed("a.old"),
                StorageEvent::updated("compilerOption.default.strict"),
            ]
        );
    }

    #[tokio::test]
    async fn import_notifies_every_item_and_forces_revalidation() {
        let adapter = RecordingAdapter::seeded(vec![("a.b", json!({ "v": 1 }))]);
        let engine = CacheEngine::new(config(50), adapter, Arc::new(NullSink));
        engine.when_ready().await;
        let calls = Arc::new(Mutex::new(0_usize));
        let counted = Arc::clone(&calls);
        let plain = engine
            .storage_item(
                "a.b",
                FnSchema::new(
                    move |_key: &str, raw: &Record| {
                        *counted.lock() += 1;
                        preset_store_core::Validation::Valid(raw.clone())
                    },
                    |_key: &str| record(json!({ "v": 0 })),
                ),
            )
            .unwrap();
        let option = engine
            .storage_option("strict", FnSchema::accept_all(record(json!({}))))
            .unwrap();
        let _ = plain.get();
        let _ = plain.get();
        assert_eq!(*calls.lock(), 1);

        let events: Arc<Mutex<Vec<StorageEvent>>> = Arc::default();
        for item in [&plain, &option] {
            let sink = Arc::clone(&events);
            item.on(listener(move |e| sink.lock().push(e.clone())));
        }

        engine.from_json(json!({ "a.b": { "v": 5 } })).await.unwrap();
        assert_eq!(*plain.get(), record(json!({ "v": 5 })));
        assert_eq!(*calls.lock(), 2);

        let mut events = events.lock().clone();
        events.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            events,
            vec![StorageEvent::updated("a.b"), StorageEvent::removed("strict")]
        );
    }

    #[tokio::test]
    async fn malformed_imports_change_nothing() {
        let adapter = RecordingAdapter::seeded(vec![("a.b", json!({ "v": 1 }))]);
        let (sink, diagnostics) = collecting_sink();
        let engine = CacheEngine::new(config(50), adapter.clone(), sink);
        engine.when_ready().await;

        assert_eq!(
            engine.from_json(json!([1, 2])).await,
            Err(ImportError::NotAnObject)
        );
        assert_eq!(
            engine
                .from_json(json!({ "a.c": { "v": 2 }, "a.d": "text" }))
                .await,
            Err(ImportError::InvalidRecord("a.d".to_string()))
        );
        assert!(matches!(
            engine.from_json_text("{ nope").await,
            Err(ImportError::Parse(_))
        ));

        assert_eq!(engine.all().len(), 1);
        assert!(adapter.calls().is_empty());
        assert_eq!(diagnostics.lock().len(), 3);
        assert!(diagnostics
            .lock()
            .iter()
            .all(|d| matches!(d, Diagnostic::ImportRejected { .. })));
    }

    #[tokio::test]
    async fn keys_outside_both_namespaces_are_skipped() {
        let (sink, diagnostics) = collecting_sink();
        let engine = CacheEngine::new(config(50), RecordingAdapter::seeded(vec![]), sink);
        engine.when_ready().await;

        let report = engine
            .from_json_text(
                r#"{ "root": {}, "compilerOption.x": {}, "compilerOption.p.name": {}, "a.b": {} }"#,
            )
            .await
            .unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.ignored, vec!["compilerOption.x", "root"]);
        assert_eq!(
            *diagnostics.lock(),
            vec![Diagnostic::ImportKeysIgnored {
                keys: vec!["compilerOption.x".to_string(), "root".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn export_then_import_restores_state() {
        let adapter = RecordingAdapter::seeded(vec![
            ("root.settings", json!({ "theme": "dark", "tabs": ["a", "b"] })),
            ("compilerOption.default.module", json!({ "value": "esm" })),
        ]);
        let engine = CacheEngine::new(config(50), adapter, Arc::new(NullSink));
        engine.when_ready().await;
        let text = engine.to_json_text();

        engine.clear();
        assert!(engine.all().is_empty());
        engine.from_json_text(&text).await.unwrap();
        assert_eq!(engine.to_json_text(), text);
    }
}
