//! Preset remapping.
//!
//! A preset is a namespace of option records (`prefix.<preset>.<name>`).
//! Switching presets rebinds every live option handle and re-notifies each
//! one, even when its physical key did not change, so consumers re-read.

use std::sync::Arc;

use preset_store_core::{EventKind, KeyError, KeyKind};

use super::engine::{CacheEngine, Notifications, State};

impl CacheEngine {
    /// The active preset.
    #[must_use]
    pub fn preset(&self) -> String {
        self.inner.preset.load().as_ref().clone()
    }

    /// Makes `name` the active preset and re-notifies every option handle.
    ///
    /// # Errors
    ///
    /// Refuses empty names and names containing a dot.
    pub fn change_preset(&self, name: &str) -> Result<(), KeyError> {
        self.inner.keys.check_preset_name(name)?;
        let notes = {
            let mut state = self.inner.state.lock();
            self.switch_locked(&mut state, name)
        };
        notes.deliver(&self.inner);
        Ok(())
    }

    /// Creates the preset `name` from the active one and switches to it.
    ///
    /// Every option record of the active preset is copied (by reference)
    /// under `name` and scheduled for persistence. Adding the active preset
    /// only re-notifies.
    ///
    /// # Errors
    ///
    /// Refuses empty names and names containing a dot.
    pub fn add_preset(&self, name: &str) -> Result<(), KeyError> {
        self.inner.keys.check_preset_name(name)?;
        let notes = {
            let mut state = self.inner.state.lock();
            let source = self.preset();
            if source != name {
                let copies: Vec<(String, _)> = state
                    .cache
                    .iter()
                    .filter_map(|(key, record)| match self.inner.keys.classify(key) {
                        Ok(KeyKind::Option { preset, name: option }) if preset == source => Some((
                            self.inner.keys.option_key(name, option),
                            Arc::clone(record),
                        )),
                        _ => None,
                    })
                    .collect();
                if !copies.is_empty() {
                    tracing::debug!(from = %source, to = name, count = copies.len(), "copying preset");
                    for (key, record) in copies {
                        state.put(key, record);
                    }
                    self.inner.schedule_flush(&mut state);
                }
            }
            self.switch_locked(&mut state, name)
        };
        notes.deliver(&self.inner);
        Ok(())
    }

    /// Deletes every option record of the preset `name`.
    ///
    /// Switches to `fallback` when given, or re-selects `name` when it was
    /// active. Removing an inactive preset without a fallback switches
    /// nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// Refuses invalid preset names, for `name` and `fallback` alike.
    pub fn remove_preset(&self, name: &str, fallback: Option<&str>) -> Result<(), KeyError> {
        self.inner.keys.check_preset_name(name)?;
        if let Some(fallback) = fallback {
            self.inner.keys.check_preset_name(fallback)?;
        }
        let notes = {
            let mut state = self.inner.state.lock();
            let prefix = self.inner.keys.preset_prefix(name);
            let doomed: Vec<String> = state
                .cache
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            for key in &doomed {
                state.tombstone(key);
            }
            if !doomed.is_empty() {
                self.inner.schedule_flush(&mut state);
            }
            if **self.inner.preset.load() == name || fallback.is_some() {
                self.switch_locked(&mut state, fallback.unwrap_or(name))
            } else {
                Notifications::default()
            }
        };
        notes.deliver(&self.inner);
        Ok(())
    }

    /// Deletes every option record whose preset is not in `existing`.
    /// Returns the number of records deleted.
    ///
    /// Re-selects the active preset (re-notifying every option handle) if
    /// its records were among those deleted, or if `existing` is empty.
    pub fn cleanup_presets<S: AsRef<str>>(&self, existing: &[S]) -> usize {
        let (removed, notes) = {
            let mut state = self.inner.state.lock();
            let active = self.preset();
            let mut hit_active = false;
            let doomed: Vec<String> = state
                .cache
                .keys()
                .filter(|key| match self.inner.keys.classify(key) {
                    Ok(KeyKind::Option { preset, .. }) => {
                        let stale = !existing.iter().any(|e| e.as_ref() == preset);
                        hit_active |= stale && preset == active;
                        stale
                    }
                    _ => false,
                })
                .cloned()
                .collect();
            for key in &doomed {
                state.tombstone(key);
            }
            if !doomed.is_empty() {
                self.inner.schedule_flush(&mut state);
            }
            let notes = if hit_active || existing.is_empty() {
                self.switch_locked(&mut state, &active)
            } else {
                Notifications::default()
            };
            (doomed.len(), notes)
        };
        if removed > 0 {
            tracing::debug!(removed, "removed records of deleted presets");
        }
        notes.deliver(&self.inner);
        removed
    }

    /// Sets the active preset and rebinds every live option handle. Must be
    /// called with `state` locked; the returned notifications are delivered
    /// by the caller once it is released.
    fn switch_locked(&self, state: &mut State, name: &str) -> Notifications {
        self.inner.preset.store(Arc::new(name.to_string()));
        let mut notes = Notifications::default();
        for item in state.live_options() {
            item.rebind(self.inner.keys.option_key(name, &item.key()));
            notes.item(item, EventKind::Updated);
        }
        notes
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use preset_store_core::{listener, FnSchema, StorageEvent};
    use serde_json::json;

    use super::*;
    use crate::storage::adapters::MemoryAdapter;
    use crate::storage::diagnostics::NullSink;
    use crate::storage::engine::tests::{config, record, recorder, RecordingAdapter};
    use crate::storage::item::StorageItem;

    fn option(engine: &CacheEngine, name: &str) -> StorageItem {
        engine
            .storage_option(name, FnSchema::accept_all(record(json!({ "v": 0 }))))
            .unwrap()
    }

    fn counter(item: &StorageItem) -> Arc<Mutex<Vec<StorageEvent>>> {
        let seen: Arc<Mutex<Vec<StorageEvent>>> = Arc::default();
        let sink = Arc::clone(&seen);
        item.on(listener(move |e| sink.lock().push(e.clone())));
        seen
    }

    async fn ready_engine() -> CacheEngine {
        let engine = CacheEngine::with_adapter(Arc::new(MemoryAdapter::new()));
        engine.when_ready().await;
        engine
    }

    #[tokio::test]
    async fn switching_to_active_preset_still_notifies() {
        let engine = ready_engine().await;
        let item = option(&engine, "strict");
        let seen = counter(&item);

        engine.change_preset("default").unwrap();
        assert_eq!(*seen.lock(), vec![StorageEvent::updated("strict")]);
        assert_eq!(item.physical_key(), "compilerOption.default.strict");
    }

    #[tokio::test]
    async fn presets_are_isolated() {
        let engine = ready_engine().await;
        let item = option(&engine, "target");

        item.set(record(json!({ "v": 1 })));
        engine.change_preset("b").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": 0 })));
        item.set(record(json!({ "v": 2 })));

        engine.change_preset("default").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": 1 })));
        engine.change_preset("b").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": 2 })));
        assert_eq!(item.preset().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn add_preset_clones_active_records() {
        let engine = ready_engine().await;
        engine.change_preset("p1").unwrap();
        let item = option(&engine, "module");
        item.set(record(json!({ "v": "esm" })));

        engine.add_preset("p2").unwrap();
        assert_eq!(engine.preset(), "p2");
        let original = engine.get("compilerOption.p1.module").unwrap();
        let copy = engine.get("compilerOption.p2.module").unwrap();
        assert!(Arc::ptr_eq(&original, &copy));

        engine.change_preset("p1").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": "esm" })));
        engine.change_preset("p2").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": "esm" })));

        item.set(record(json!({ "v": "cjs" })));
        engine.change_preset("p1").unwrap();
        assert_eq!(*item.get(), record(json!({ "v": "esm" })));
    }

    #[tokio::test(start_paused = true)]
    async fn add_preset_schedules_copies() {
        let adapter = RecordingAdapter::seeded(vec![
            ("compilerOption.default.a", json!({ "v": 1 })),
            ("compilerOption.default.b", json!({ "v": 2 })),
            ("compilerOption.other.c", json!({ "v": 3 })),
        ]);
        let engine = CacheEngine::new(config(50), adapter.clone(), Arc::new(NullSink));
        engine.when_ready().await;

        engine.add_preset("copy").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stored: Vec<String> = adapter.inner.snapshot().into_keys().collect();
        assert_eq!(
            stored,
            vec![
                "compilerOption.copy.a",
                "compilerOption.copy.b",
                "compilerOption.default.a",
                "compilerOption.default.b",
                "compilerOption.other.c"
            ]
        );
    }

    #[tokio::test]
    async fn adding_the_active_preset_only_notifies() {
        let engine = ready_engine().await;
        let item = option(&engine, "strict");
        item.set(record(json!({ "v": 1 })));
        let seen = counter(&item);

        engine.add_preset("default").unwrap();
        assert_eq!(engine.all().len(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn remove_inactive_preset_without_fallback_is_silent() {
        let engine = ready_engine().await;
        let item = option(&engine, "strict");
        engine
            .set("compilerOption.old.strict", record(json!({ "v": 9 })))
            .unwrap();
        let seen = counter(&item);

        engine.remove_preset("old", None).unwrap();
        assert_eq!(engine.get("compilerOption.old.strict"), None);
        assert_eq!(engine.preset(), "default");
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn remove_active_preset_switches_to_fallback() {
        let engine = ready_engine().await;
        let item = option(&engine, "strict");
        engine.change_preset("p1").unwrap();
        item.set(record(json!({ "v": 1 })));
        engine
            .set("compilerOption.p2.strict", record(json!({ "v": 2 })))
            .unwrap();
        let seen = counter(&item);

        engine.remove_preset("p1", Some("p2")).unwrap();
        assert_eq!(engine.preset(), "p2");
        assert_eq!(*item.get(), record(json!({ "v": 2 })));
        assert_eq!(*seen.lock(), vec![StorageEvent::updated("strict")]);
        assert_eq!(engine.get("compilerOption.p1.strict"), None);
    }

    #[tokio::test]
    async fn remove_active_preset_without_fallback_reselects_it() {
        let engine = ready_engine().await;
        let item = option(&engine, "strict");
        item.set(record(json!({ "v": 1 })));
        let seen = counter(&item);

        engine.remove_preset("default", None).unwrap();
        assert_eq!(engine.preset(), "default");
        assert_eq!(*item.get(), record(json!({ "v": 0 })));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_drops_unknown_presets() {
        let engine = ready_engine().await;
        for key in [
            "compilerOption.default.a",
            "compilerOption.keep.a",
            "compilerOption.gone.a",
            "root.settings",
        ] {
            engine.set(key, record(json!({ "v": 1 }))).unwrap();
        }
        let item = option(&engine, "a");
        let seen = counter(&item);

        assert_eq!(engine.cleanup_presets(&["default", "keep"]), 1);
        assert_eq!(
            engine.all().into_keys().collect::<Vec<_>>(),
            vec![
                "compilerOption.default.a",
                "compilerOption.keep.a",
                "root.settings"
            ]
        );
        // The active preset survived, so no re-notification.
        assert!(seen.lock().is_empty());

        assert_eq!(engine.cleanup_presets(&["keep"]), 1);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(*item.get(), record(json!({ "v": 0 })));
    }

    #[tokio::test]
    async fn cleanup_with_no_presets_notifies() {
        let engine = ready_engine().await;
        let item = option(&engine, "a");
        let seen = counter(&item);

        assert_eq!(engine.cleanup_presets::<&str>(&[]), 0);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn invalid_preset_names_are_refused() {
        let engine = ready_engine().await;
        assert!(engine.change_preset("").is_err());
        assert!(engine.add_preset("a.b").is_err());
        assert!(engine.remove_preset("default", Some("x.y")).is_err());
        assert_eq!(engine.preset(), "default");
    }

    #[tokio::test]
    async fn switching_presets_leaves_engine_listeners_alone() {
        let engine = ready_engine().await;
        let _item = option(&engine, "strict");
        let seen = recorder(&engine);
        engine.change_preset("p9").unwrap();
        engine.add_preset("p10").unwrap();
        assert!(seen.lock().is_empty());
    }
}
