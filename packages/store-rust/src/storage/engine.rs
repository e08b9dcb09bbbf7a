//! The authoritative in-process record cache.
//!
//! [`CacheEngine`] maps physical keys to their last accepted record. Reads are
//! served from memory only. Writes update memory synchronously, emit events
//! synchronously, and land in a pending buffer that a single shared debounce
//! timer flushes to the [`StorageAdapter`].
//!
//! Spans that await the adapter (the initial load, flushes and bulk imports)
//! are serialised by an [`AsyncLock`]. Everything else runs under a short
//! synchronous state lock that is never held while listeners run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use preset_store_core::{
    AsyncLock, EventEmitter, EventKind, KeyError, KeyKind, KeySpace, Listener, ReleaseToken,
    SharedRecord, StorageEvent,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::adapter::StorageAdapter;
use super::config::StoreConfig;
use super::diagnostics::{Diagnostic, DiagnosticSink, NullSink};
use super::item::ItemShared;

/// A buffered change awaiting the next flush.
#[derive(Debug, Clone)]
pub(super) enum Pending {
    Write(SharedRecord),
    Tombstone,
}

impl Pending {
    fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }
}

/// Mutable engine state, guarded by [`EngineInner::state`].
#[derive(Default)]
pub(super) struct State {
    pub(super) cache: BTreeMap<String, SharedRecord>,
    pub(super) pending: HashMap<String, Pending>,
    /// Armed debounce timer and its sequence number.
    timer: Option<(u64, JoinHandle<()>)>,
    timer_seq: u64,
    pub(super) plain_items: HashMap<String, Weak<ItemShared>>,
    pub(super) option_items: HashMap<String, Weak<ItemShared>>,
}

impl State {
    /// Caches `record` and queues it for the next flush.
    pub(super) fn put(&mut self, key: String, record: SharedRecord) {
        self.cache.insert(key.clone(), Arc::clone(&record));
        self.pending.insert(key, Pending::Write(record));
    }

    /// Drops `key` from the cache and queues its deletion. Returns whether
    /// the key was cached.
    pub(super) fn tombstone(&mut self, key: &str) -> bool {
        if self.cache.remove(key).is_some() {
            self.pending.insert(key.to_string(), Pending::Tombstone);
            true
        } else {
            false
        }
    }

    /// The live handle whose current physical key is `key`.
    pub(super) fn bound_item(
        &self,
        keys: &KeySpace,
        preset: &str,
        key: &str,
    ) -> Option<Arc<ItemShared>> {
        match keys.classify(key) {
            Ok(KeyKind::Option { preset: p, name }) if p == preset => {
                self.option_items.get(name).and_then(Weak::upgrade)
            }
            Ok(KeyKind::Plain) => self.plain_items.get(key).and_then(Weak::upgrade),
            _ => None,
        }
    }

    /// The live handle for the logical key behind `key`, whatever preset the
    /// key belongs to.
    fn owner_item(&self, keys: &KeySpace, key: &str) -> Option<Arc<ItemShared>> {
        match keys.classify(key) {
            Ok(KeyKind::Option { name, .. }) => self.option_items.get(name).and_then(Weak::upgrade),
            Ok(KeyKind::Plain) => self.plain_items.get(key).and_then(Weak::upgrade),
            Err(_) => None,
        }
    }

    /// Every live option handle. Dead entries are pruned.
    pub(super) fn live_options(&mut self) -> Vec<Arc<ItemShared>> {
        self.option_items.retain(|_, item| item.strong_count() > 0);
        self.option_items.values().filter_map(Weak::upgrade).collect()
    }

    /// Every live handle of either kind. Dead entries are pruned.
    pub(super) fn live_items(&mut self) -> Vec<Arc<ItemShared>> {
        self.plain_items.retain(|_, item| item.strong_count() > 0);
        let mut items: Vec<_> = self.plain_items.values().filter_map(Weak::upgrade).collect();
        items.extend(self.live_options());
        items
    }

    fn take_timer(&mut self) {
        if let Some((_, timer)) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Events and diagnostics gathered under the state lock, delivered after it
/// is released.
#[derive(Default)]
pub(super) struct Notifications {
    engine: Vec<StorageEvent>,
    items: Vec<(Arc<ItemShared>, EventKind)>,
    diagnostics: Vec<Diagnostic>,
}

impl Notifications {
    pub(super) fn engine(&mut self, key: impl Into<String>, kind: EventKind) {
        self.engine.push(StorageEvent {
            key: key.into(),
            kind,
        });
    }

    pub(super) fn item(&mut self, item: Arc<ItemShared>, kind: EventKind) {
        self.items.push((item, kind));
    }

    pub(super) fn diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(super) fn deliver(self, inner: &EngineInner) {
        for diagnostic in self.diagnostics {
            inner.report(diagnostic);
        }
        for event in &self.engine {
            inner.events.emit(event);
        }
        for (item, kind) in self.items {
            item.emit(kind);
        }
    }
}

pub(super) struct EngineInner {
    pub(super) keys: KeySpace,
    debounce: Duration,
    pub(super) adapter: Arc<dyn StorageAdapter>,
    sink: Arc<dyn DiagnosticSink>,
    pub(super) lock: AsyncLock,
    events: EventEmitter,
    pub(super) state: Mutex<State>,
    /// Active preset. Written only while `state` is locked.
    pub(super) preset: ArcSwap<String>,
    ready: watch::Sender<bool>,
    runtime: Handle,
}

impl EngineInner {
    pub(super) fn report(&self, diagnostic: Diagnostic) {
        diagnostic.log();
        self.sink.report(&diagnostic);
    }

    /// (Re)arms the shared debounce timer. Any armed timer is cancelled.
    pub(super) fn schedule_flush(self: &Arc<Self>, state: &mut State) {
        state.take_timer();
        state.timer_seq += 1;
        let seq = state.timer_seq;
        let inner = Arc::clone(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            {
                let mut state = inner.state.lock();
                if state.timer.as_ref().map(|(current, _)| *current) != Some(seq) {
                    return;
                }
                // From here on the flush can no longer be aborted by a reschedule.
                state.timer = None;
            }
            inner.flush(None).await;
        });
        state.timer = Some((seq, timer));
    }

    /// Writes the pending buffer to the adapter.
    ///
    /// Skips lock acquisition when `held` is the lock's current holder.
    pub(super) async fn flush(&self, held: Option<&ReleaseToken>) {
        let _token = match held {
            Some(token) if self.lock.has(token) => None,
            _ => Some(self.lock.acquire().await),
        };
        let batch: Vec<(String, Pending)> = self.state.lock().pending.drain().collect();
        if batch.is_empty() {
            return;
        }

        let removes = batch.iter().filter(|(_, p)| p.is_tombstone()).count();
        let writes = batch.len() - removes;
        let adapter = &self.adapter;
        join_all(batch.iter().map(|(key, pending)| async move {
            match pending {
                Pending::Write(record) => adapter.set(key, record).await,
                Pending::Tombstone => adapter.remove(key).await,
            }
        }))
        .await;

        metrics::counter!("preset_store_flushes_total").increment(1);
        metrics::counter!("preset_store_adapter_writes_total").increment(writes as u64);
        metrics::counter!("preset_store_adapter_removes_total").increment(removes as u64);
        tracing::debug!(writes, removes, "flushed pending records");
    }

    /// Loads the adapter snapshot and reconciles it with whatever was written
    /// in the meantime.
    async fn initialize(self: Arc<Self>) {
        let mut token = self.lock.acquire().await;
        let snapshot = self.adapter.all().await;
        let mut notes = Notifications::default();
        {
            let mut state = self.state.lock();
            let preset = self.preset.load();
            let mut malformed = false;
            for (key, record) in snapshot {
                match self.keys.classify(&key) {
                    Ok(_) => {}
                    Err(KeyError::MalformedOption(_)) => {
                        state.pending.insert(key.clone(), Pending::Tombstone);
                        notes.diagnostic(Diagnostic::MalformedOptionKey { key });
                        malformed = true;
                        continue;
                    }
                    // Undotted keys are reserved; leave them alone.
                    Err(_) => continue,
                }
                if let Some(discarded) = state.pending.remove(&key) {
                    notes.diagnostic(Diagnostic::PendingWriteDiscarded {
                        key: key.clone(),
                        removal: discarded.is_tombstone(),
                    });
                }
                if let Some(owner) = state.owner_item(&self.keys, &key) {
                    owner.forget(&key);
                }
                if let Some(item) = state.bound_item(&self.keys, &preset, &key) {
                    notes.item(item, EventKind::Updated);
                }
                state.cache.insert(key.clone(), Arc::new(record));
                notes.engine(key, EventKind::Updated);
            }
            if malformed {
                self.schedule_flush(&mut state);
            }
        }
        let loaded = notes.engine.len();
        notes.deliver(&self);
        token.release();
        self.ready.send_replace(true);
        tracing::debug!(records = loaded, "storage initialized");
    }
}

/// Debounced write-back cache over a [`StorageAdapter`].
///
/// Cloning yields another handle to the same engine.
///
/// The adapter snapshot is loaded in the background right after
/// construction. Until [`when_ready`](Self::when_ready) resolves the cache may
/// be empty, and any write to a key that turns out to exist in the snapshot is
/// overwritten by the stored record (with a
/// [`Diagnostic::PendingWriteDiscarded`] warning). Writers should await
/// readiness first.
#[derive(Clone)]
pub struct CacheEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl CacheEngine {
    /// Creates an engine and starts loading the adapter snapshot.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        config: StoreConfig,
        adapter: Arc<dyn StorageAdapter>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let StoreConfig {
            debounce,
            option_prefix,
            initial_preset,
        } = config;
        let (ready, _) = watch::channel(false);
        let inner = Arc::new(EngineInner {
            keys: KeySpace::new(option_prefix),
            debounce,
            adapter,
            sink,
            lock: AsyncLock::new(),
            events: EventEmitter::new(),
            state: Mutex::new(State::default()),
            preset: ArcSwap::from_pointee(initial_preset),
            ready,
            runtime: Handle::current(),
        });
        inner.runtime.spawn(Arc::clone(&inner).initialize());
        Self { inner }
    }

    /// Creates an engine with the default configuration and no diagnostic
    /// sink.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::new(StoreConfig::default(), adapter, Arc::new(NullSink))
    }

    /// Resolves once the initial snapshot has been reconciled.
    pub async fn when_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Whether the initial snapshot has been reconciled.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Key grammar used by this engine.
    #[must_use]
    pub fn key_space(&self) -> &KeySpace {
        &self.inner.keys
    }

    /// The cached record under `key`. Never touches the adapter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<SharedRecord> {
        self.inner.state.lock().cache.get(key).cloned()
    }

    /// Snapshot of every cached record.
    #[must_use]
    pub fn all(&self) -> BTreeMap<String, SharedRecord> {
        self.inner.state.lock().cache.clone()
    }

    /// Stores `record` under `key` and schedules it for persistence.
    ///
    /// Emits `updated` on the engine listeners and on the item bound to `key`,
    /// if any.
    ///
    /// # Errors
    ///
    /// Refuses undotted keys and malformed option keys.
    pub fn set(&self, key: &str, record: impl Into<SharedRecord>) -> Result<(), KeyError> {
        self.check_key(key)?;
        let mut notes = Notifications::default();
        {
            let mut state = self.inner.state.lock();
            state.put(key.to_string(), record.into());
            self.inner.schedule_flush(&mut state);
            if let Some(owner) = state.owner_item(&self.inner.keys, key) {
                owner.forget(key);
            }
            if let Some(item) = state.bound_item(&self.inner.keys, &self.inner.preset.load(), key) {
                notes.item(item, EventKind::Updated);
            }
        }
        notes.engine(key, EventKind::Updated);
        notes.deliver(&self.inner);
        Ok(())
    }

    /// Deletes `key` and schedules the deletion. Returns whether the key was
    /// cached; nothing is emitted otherwise.
    ///
    /// # Errors
    ///
    /// Refuses undotted keys and malformed option keys.
    pub fn remove(&self, key: &str) -> Result<bool, KeyError> {
        self.check_key(key)?;
        let mut notes = Notifications::default();
        {
            let mut state = self.inner.state.lock();
            if !state.tombstone(key) {
                return Ok(false);
            }
            self.inner.schedule_flush(&mut state);
            if let Some(item) = state.bound_item(&self.inner.keys, &self.inner.preset.load(), key) {
                notes.item(item, EventKind::Removed);
            }
        }
        notes.engine(key, EventKind::Removed);
        notes.deliver(&self.inner);
        Ok(true)
    }

    /// Deletes every cached record in one batch.
    ///
    /// Emits one `removed` per deleted key on the engine listeners and one per
    /// item bound to a deleted key.
    pub fn clear(&self) {
        let mut notes = Notifications::default();
        {
            let mut state = self.inner.state.lock();
            let keys: Vec<String> = state.cache.keys().cloned().collect();
            if keys.is_empty() {
                return;
            }
            let preset = self.inner.preset.load();
            for key in keys {
                state.tombstone(&key);
                if let Some(item) = state.bound_item(&self.inner.keys, &preset, &key) {
                    notes.item(item, EventKind::Removed);
                }
                notes.engine(key, EventKind::Removed);
            }
            self.inner.schedule_flush(&mut state);
        }
        notes.deliver(&self.inner);
    }

    /// Flushes the pending buffer now, cancelling the debounce timer.
    pub async fn save(&self) {
        self.inner.state.lock().take_timer();
        self.inner.flush(None).await;
    }

    /// Subscribes to every event on the engine.
    pub fn on(&self, listener: Listener) {
        self.inner.events.on(listener);
    }

    /// Unsubscribes a listener added with [`on`](Self::on).
    pub fn off(&self, listener: &Listener) {
        self.inner.events.off(listener);
    }

    /// Caches a validator's replacement for `stale` under `key` without
    /// emitting anything. Ignored if `key` changed since `stale` was read.
    pub(super) fn repair(&self, key: &str, stale: &SharedRecord, fixed: SharedRecord) {
        let mut state = self.inner.state.lock();
        if !state.cache.get(key).is_some_and(|current| Arc::ptr_eq(current, stale)) {
            return;
        }
        state.put(key.to_string(), fixed);
        self.inner.schedule_flush(&mut state);
        drop(state);
        metrics::counter!("preset_store_validation_repairs_total").increment(1);
        tracing::debug!(key, "replaced stored record with its validated form");
    }

    /// Write issued by an item handle.
    ///
    /// Option items notify only their own listeners; plain items also notify
    /// the engine listeners.
    pub(super) fn write_through(&self, item: &Arc<ItemShared>, record: SharedRecord) {
        let key = {
            let mut state = self.inner.state.lock();
            let key = item.physical_key();
            state.put(key.clone(), record);
            self.inner.schedule_flush(&mut state);
            key
        };
        if !item.is_option() {
            self.inner.events.emit(&StorageEvent::updated(key));
        }
        item.emit(EventKind::Updated);
    }

    fn check_key(&self, key: &str) -> Result<(), KeyError> {
        self.inner.keys.classify(key).map(|_| ()).map_err(|err| {
            self.inner.report(Diagnostic::ForbiddenKey(err.clone()));
            err
        })
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CacheEngine")
            .field("option_prefix", &self.inner.keys.prefix())
            .field("preset", &**self.inner.preset.load())
            .field("records", &state.cache.len())
            .field("pending", &state.pending.len())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
