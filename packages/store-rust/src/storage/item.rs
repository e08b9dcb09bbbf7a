//! Item handles: validated, subscribable views over one logical key.
//!
//! A plain item is bound to one physical key for life. An option item is
//! bound to a logical name and follows the active preset; its physical key
//! is rewritten on every preset switch while its listeners stay attached.
//!
//! Handles are memoized per logical key. The engine keeps only weak
//! references, so a handle and its listeners go away with the last clone.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use preset_store_core::schema::{from_record, to_record};
use preset_store_core::{
    EventEmitter, EventKind, ItemSchema, KeyError, Listener, SerdeSchema, SharedRecord,
    StorageEvent, Validation,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::diagnostics::Diagnostic;
use super::engine::CacheEngine;

struct Slot {
    physical_key: String,
    /// Physical keys validated since the last load or import.
    verified: HashSet<String>,
}

/// State shared by every clone of one handle. The engine holds it weakly.
pub(super) struct ItemShared {
    /// Logical name; `None` for plain items.
    name: Option<String>,
    slot: Mutex<Slot>,
    emitter: EventEmitter,
    schema: Arc<dyn ItemSchema>,
}

impl ItemShared {
    fn new(name: Option<String>, physical_key: String, schema: Arc<dyn ItemSchema>) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot {
                physical_key,
                verified: HashSet::new(),
            }),
            emitter: EventEmitter::new(),
            schema,
        }
    }

    pub(super) fn is_option(&self) -> bool {
        self.name.is_some()
    }

    /// Key carried by this item's events and passed to its schema.
    pub(super) fn key(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.physical_key(),
        }
    }

    pub(super) fn physical_key(&self) -> String {
        self.slot.lock().physical_key.clone()
    }

    /// Points an option item at a new physical key.
    pub(super) fn rebind(&self, physical_key: String) {
        self.slot.lock().physical_key = physical_key;
    }

    /// Forces revalidation of `physical_key` on the next read.
    pub(super) fn forget(&self, physical_key: &str) {
        self.slot.lock().verified.remove(physical_key);
    }

    /// Forces revalidation of every physical key.
    pub(super) fn forget_all(&self) {
        self.slot.lock().verified.clear();
    }

    pub(super) fn emit(&self, kind: EventKind) {
        self.emitter.emit(&StorageEvent {
            key: self.key(),
            kind,
        });
    }
}

/// Handle to one logical key. Cheap to clone.
#[derive(Clone)]
pub struct StorageItem {
    shared: Arc<ItemShared>,
    engine: CacheEngine,
}

impl StorageItem {
    /// The current record.
    ///
    /// Returns the schema default when nothing is stored (without caching or
    /// writing it). A stored record is validated on the first read after a
    /// load, import or outside write, and readers get the record the schema
    /// returns. When that differs from what is stored (a correction, or a
    /// normalised form of a valid record) it replaces the stored record.
    #[must_use]
    pub fn get(&self) -> SharedRecord {
        let (physical_key, raw, verified) = {
            let state = self.engine.inner.state.lock();
            let slot = self.shared.slot.lock();
            let raw = state.cache.get(&slot.physical_key).cloned();
            let verified = slot.verified.contains(&slot.physical_key);
            (slot.physical_key.clone(), raw, verified)
        };
        let key = self.shared.key();
        let Some(raw) = raw else {
            return Arc::new(self.shared.schema.create_default(&key));
        };
        if verified {
            return raw;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.shared.schema.validate(&key, &raw)));
        let replacement = match outcome {
            Ok(Validation::Valid(valid)) if valid == *raw => None,
            Ok(Validation::Valid(fixed) | Validation::Invalid(fixed)) => Some(fixed),
            Err(_) => {
                self.engine
                    .inner
                    .report(Diagnostic::ValidatorPanicked { key: key.clone() });
                Some(self.shared.schema.create_default(&key))
            }
        };
        let value = match replacement {
            Some(fixed) => {
                let fixed = Arc::new(fixed);
                self.engine.repair(&physical_key, &raw, Arc::clone(&fixed));
                fixed
            }
            None => raw,
        };
        self.mark_verified(&physical_key, &value);
        value
    }

    /// Trusts `physical_key` from now on, unless it no longer holds `value`.
    fn mark_verified(&self, physical_key: &str, value: &SharedRecord) {
        let state = self.engine.inner.state.lock();
        if state
            .cache
            .get(physical_key)
            .is_some_and(|current| Arc::ptr_eq(current, value))
        {
            self.shared
                .slot
                .lock()
                .verified
                .insert(physical_key.to_string());
        }
    }

    /// Writes `record` under the item's current physical key.
    pub fn set(&self, record: impl Into<SharedRecord>) {
        self.engine.write_through(&self.shared, record.into());
    }

    /// Subscribes to this item's events.
    pub fn on(&self, listener: Listener) {
        self.shared.emitter.on(listener);
    }

    /// Unsubscribes a listener added with [`on`](Self::on).
    pub fn off(&self, listener: &Listener) {
        self.shared.emitter.off(listener);
    }

    /// The physical key of a plain item, or the logical name of an option.
    #[must_use]
    pub fn key(&self) -> String {
        self.shared.key()
    }

    /// The key the item currently reads and writes.
    #[must_use]
    pub fn physical_key(&self) -> String {
        self.shared.physical_key()
    }

    /// Whether the item follows the active preset.
    #[must_use]
    pub fn is_option(&self) -> bool {
        self.shared.is_option()
    }

    /// The preset an option item is bound to.
    #[must_use]
    pub fn preset(&self) -> Option<String> {
        if !self.is_option() {
            return None;
        }
        match self.engine.key_space().classify(&self.physical_key()) {
            Ok(preset_store_core::KeyKind::Option { preset, .. }) => Some(preset.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StorageItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageItem")
            .field("key", &self.key())
            .field("physical_key", &self.physical_key())
            .field("listeners", &self.shared.emitter.len())
            .finish()
    }
}

/// [`StorageItem`] viewed through a serde type.
pub struct TypedItem<T> {
    item: StorageItem,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedItem<T> {
    fn clone(&self) -> Self {
        Self {
            item: self.item.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> TypedItem<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// The current value. Falls back to `T::default()` if the stored record
    /// does not deserialize.
    #[must_use]
    pub fn get(&self) -> T {
        from_record(&self.item.get()).unwrap_or_default()
    }

    /// Stores `value`.
    pub fn set(&self, value: &T) {
        self.item.set(to_record(value));
    }

    /// The untyped handle.
    #[must_use]
    pub fn untyped(&self) -> &StorageItem {
        &self.item
    }
}

impl CacheEngine {
    /// Handle for the plain key `key`, created on first request.
    ///
    /// A memoized handle keeps the schema it was created with.
    ///
    /// # Errors
    ///
    /// Refuses undotted keys and keys in the option namespace.
    pub fn storage_item<S>(&self, key: &str, schema: S) -> Result<StorageItem, KeyError>
    where
        S: ItemSchema + 'static,
    {
        if let Err(err) = self.inner.keys.check_plain(key) {
            self.inner.report(Diagnostic::ForbiddenKey(err.clone()));
            return Err(err);
        }
        let mut state = self.inner.state.lock();
        if let Some(shared) = state.plain_items.get(key).and_then(std::sync::Weak::upgrade) {
            return Ok(self.handle(shared));
        }
        let shared = Arc::new(ItemShared::new(None, key.to_string(), Arc::new(schema)));
        state.plain_items.retain(|_, item| item.strong_count() > 0);
        state
            .plain_items
            .insert(key.to_string(), Arc::downgrade(&shared));
        Ok(self.handle(shared))
    }

    /// Handle for the option `name` under the active preset, created on first
    /// request.
    ///
    /// A memoized handle keeps the schema it was created with.
    ///
    /// # Errors
    ///
    /// Refuses empty names and names containing a dot.
    pub fn storage_option<S>(&self, name: &str, schema: S) -> Result<StorageItem, KeyError>
    where
        S: ItemSchema + 'static,
    {
        if let Err(err) = self.inner.keys.check_option_name(name) {
            self.inner.report(Diagnostic::ForbiddenKey(err.clone()));
            return Err(err);
        }
        let mut state = self.inner.state.lock();
        if let Some(shared) = state.option_items.get(name).and_then(std::sync::Weak::upgrade) {
            return Ok(self.handle(shared));
        }
        let physical_key = self.inner.keys.option_key(&self.inner.preset.load(), name);
        let shared = Arc::new(ItemShared::new(
            Some(name.to_string()),
            physical_key,
            Arc::new(schema),
        ));
        state.option_items.retain(|_, item| item.strong_count() > 0);
        state
            .option_items
            .insert(name.to_string(), Arc::downgrade(&shared));
        Ok(self.handle(shared))
    }

    /// Typed handle for the plain key `key`, validated through serde.
    ///
    /// # Errors
    ///
    /// As [`storage_item`](Self::storage_item).
    pub fn typed_item<T>(&self, key: &str) -> Result<TypedItem<T>, KeyError>
    where
        T: Serialize + DeserializeOwned + Default + 'static,
    {
        Ok(TypedItem {
            item: self.storage_item(key, SerdeSchema::<T>::new())?,
            _marker: PhantomData,
        })
    }

    /// Typed handle for the option `name`, validated through serde.
    ///
    /// # Errors
    ///
    /// As [`storage_option`](Self::storage_option).
    pub fn typed_option<T>(&self, name: &str) -> Result<TypedItem<T>, KeyError>
    where
        T: Serialize + DeserializeOwned + Default + 'static,
    {
        Ok(TypedItem {
            item: self.storage_option(name, SerdeSchema::<T>::new())?,
            _marker: PhantomData,
        })
    }

    fn handle(&self, shared: Arc<ItemShared>) -> StorageItem {
        StorageItem {
            shared,
            engine: self.clone(),
        }
    }
}
