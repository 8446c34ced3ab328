//! StateManager - reactive key/value store
//!
//! Values are `serde_json::Value`s keyed by name. Writes that are deep-equal
//! to the stored value are ignored; real changes are recorded in a bounded
//! history, delivered synchronously to the key's watchers in registration
//! order and announced on the manager's bus. Watcher lists are snapshotted
//! under the lock and invoked after it is released, so watchers may read or
//! write state freely.

use std::collections::{BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::equality::deep_equal_opt;
use super::messages::{Change, ChangeRecord, SetOptions, StateError, StateResponse, Update, WatchFn, WatchOptions};
use super::persist::{FileSnapshot, MemorySnapshot, SnapshotStore};
use crate::config::StateConfig;
use crate::events::{EventBus, Ring, panic_message};

/// Emitted after a single key changes: `{key, value, oldValue}`
pub const STATE_CHANGED: &str = "state:changed";
/// Emitted after a key is removed: `{key, value: null, oldValue}`
pub const STATE_DELETED: &str = "state:deleted";
/// Emitted once per batch (and reset) with the list of changes
pub const STATE_BATCH_CHANGED: &str = "state:batchChanged";

/// Derives a value from other state on every read
pub type ComputedFn = Arc<dyn Fn(&StateManager) -> Value + Send + Sync>;

struct Store {
    values: HashMap<String, Value>,
    computed: HashMap<String, ComputedFn>,
    watchers: HashMap<String, Vec<WatchFn>>,
    history: Ring<ChangeRecord>,
}

impl Store {
    fn record(&mut self, change: &Change) {
        self.history.push(ChangeRecord {
            change: change.clone(),
            timestamp: Utc::now(),
        });
    }

    fn watchers_for(&self, key: &str) -> Vec<WatchFn> {
        self.watchers.get(key).cloned().unwrap_or_default()
    }
}

struct StateInner {
    config: StateConfig,
    store: Mutex<Store>,
    bus: EventBus,
    snapshot: Arc<dyn SnapshotStore>,
}

impl StateInner {
    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a shared state store
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<StateInner>,
}

impl StateManager {
    /// Create a manager with its own bus
    ///
    /// Persisted keys go to the configured file, or to memory when no
    /// persist path is set.
    pub fn new(config: StateConfig) -> Self {
        Self::with_bus(config, EventBus::with_defaults())
    }

    /// Create a manager that announces changes on a shared bus
    pub fn with_bus(config: StateConfig, bus: EventBus) -> Self {
        let snapshot: Arc<dyn SnapshotStore> = match config.expanded_persist_path() {
            Some(path) => Arc::new(FileSnapshot::new(path)),
            None => Arc::new(MemorySnapshot::new()),
        };
        Self::with_parts(config, bus, snapshot)
    }

    pub fn with_defaults() -> Self {
        Self::new(StateConfig::default())
    }

    /// Create a manager that announces changes on `bus` and persists to `snapshot`
    pub fn with_parts(config: StateConfig, bus: EventBus, snapshot: Arc<dyn SnapshotStore>) -> Self {
        debug!(history_capacity = config.history_capacity, ?snapshot, "StateManager::with_parts");
        let store = Store {
            values: HashMap::new(),
            computed: HashMap::new(),
            watchers: HashMap::new(),
            history: Ring::new(config.history_capacity),
        };
        Self {
            inner: Arc::new(StateInner {
                config,
                store: Mutex::new(store),
                bus,
                snapshot,
            }),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.inner.store()
    }

    /// Current value; computed keys are recomputed on every call
    pub fn get(&self, key: &str) -> Option<Value> {
        let computed = {
            let store = self.store();
            match store.computed.get(key) {
                Some(f) => f.clone(),
                None => return store.values.get(key).cloned(),
            }
        };
        Some(computed(self))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Store a value
    ///
    /// Returns `Ok(false)` without side effects when `value` is deep-equal to
    /// the stored one. A persistence failure is returned after the in-memory
    /// change has been applied and announced.
    ///
    /// Strings that both parse as RFC 3339 timestamps compare by instant, so
    /// rewriting a timestamp in another offset keeps the stored text.
    /// `delete` the key first when the exact spelling matters.
    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> StateResponse<bool> {
        let (change, watchers) = {
            let mut store = self.store();
            if store.computed.contains_key(key) {
                warn!(key, "StateManager::set: key is computed");
                return Err(StateError::ComputedKey(key.to_string()));
            }
            let old = store.values.get(key).cloned();
            if deep_equal_opt(old.as_ref(), Some(&value)) {
                debug!(key, "StateManager::set: unchanged, skipping");
                return Ok(false);
            }
            store.values.insert(key.to_string(), value.clone());
            let change = Change::new(key, Some(value), old);
            store.record(&change);
            (change, store.watchers_for(key))
        };
        debug!(key, silent = opts.silent, persist = opts.persist, "StateManager::set");

        let persisted = match (&change.value, opts.persist) {
            (Some(value), true) => self.persist(key, value),
            _ => Ok(()),
        };
        if !opts.silent {
            notify(&watchers, &change);
            self.inner.bus.emit_sync(STATE_CHANGED, change.to_payload());
        }
        persisted.map(|()| true)
    }

    fn persist(&self, key: &str, value: &Value) -> StateResponse<()> {
        self.inner.snapshot.merge(key, value).inspect_err(|e| {
            error!(key, error = %e, "StateManager: failed to persist key");
        })
    }

    /// Derive the next value from the current one, then `set` it
    pub fn update(&self, key: &str, update: Update, opts: SetOptions) -> StateResponse<bool> {
        let current = self.get(key);
        let next = update.apply(current.as_ref());
        self.set(key, next, opts)
    }

    /// Remove a stored key; `Ok(false)` when it was not set
    ///
    /// With `persist` the key is also dropped from the durable snapshot.
    pub fn delete(&self, key: &str, opts: SetOptions) -> StateResponse<bool> {
        let (change, watchers) = {
            let mut store = self.store();
            let Some(old) = store.values.remove(key) else {
                debug!(key, "StateManager::delete: key not set");
                return Ok(false);
            };
            let change = Change::new(key, None, Some(old));
            store.record(&change);
            (change, store.watchers_for(key))
        };
        debug!(key, silent = opts.silent, "StateManager::delete");

        let persisted = if opts.persist {
            self.inner.snapshot.remove(key).inspect_err(|e| {
                error!(key, error = %e, "StateManager: failed to drop persisted key");
            })
        } else {
            Ok(())
        };
        if !opts.silent {
            notify(&watchers, &change);
            self.inner.bus.emit_sync(STATE_DELETED, change.to_payload());
        }
        persisted.map(|()| true)
    }

    /// Call `callback` whenever `key` changes
    pub fn watch<F>(&self, key: &str, callback: F, opts: WatchOptions) -> Watch
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.watch_shared(key, Arc::new(callback), opts)
    }

    /// Register an already shared callback; the same `Arc` is only added once per key
    pub fn watch_shared(&self, key: &str, callback: WatchFn, opts: WatchOptions) -> Watch {
        self.add_watcher(key, &callback);
        if opts.immediate {
            let change = Change::new(key, self.get(key), None);
            notify(std::slice::from_ref(&callback), &change);
        }
        Watch {
            state: Arc::downgrade(&self.inner),
            entries: vec![(key.to_string(), callback)],
        }
    }

    fn add_watcher(&self, key: &str, callback: &WatchFn) {
        let mut store = self.store();
        let list = store.watchers.entry(key.to_string()).or_default();
        if list.iter().any(|w| Arc::ptr_eq(w, callback)) {
            debug!(key, "StateManager::watch: callback already watching key");
        } else {
            list.push(callback.clone());
            debug!(key, watchers = list.len(), "StateManager::watch");
        }
    }

    /// Watch several keys with one callback; the returned handle removes all of them
    pub fn subscribe<F>(&self, keys: &[&str], callback: F) -> Watch
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let callback: WatchFn = Arc::new(callback);
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            self.add_watcher(key, &callback);
            entries.push((key.to_string(), callback.clone()));
        }
        Watch {
            state: Arc::downgrade(&self.inner),
            entries,
        }
    }

    /// Apply several values, then notify
    ///
    /// Every value is stored before the first watcher runs, so no watcher can
    /// observe a partly applied batch. Values deep-equal to the stored ones
    /// are skipped. A computed key anywhere in the batch rejects the whole
    /// batch before anything is written. A key listed twice keeps its last
    /// value and produces one change. Returns the applied changes.
    pub fn batch<I, K>(&self, updates: I, silent: bool) -> StateResponse<Vec<Change>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut merged: Vec<(String, Value)> = Vec::new();
        for (key, value) in updates {
            let key = key.into();
            match merged.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => merged.push((key, value)),
            }
        }
        let updates = merged;

        let notifications = {
            let mut store = self.store();
            if let Some((key, _)) = updates.iter().find(|(key, _)| store.computed.contains_key(key)) {
                warn!(key = %key, "StateManager::batch: key is computed, batch rejected");
                return Err(StateError::ComputedKey(key.clone()));
            }

            let mut changes = Vec::new();
            for (key, value) in updates {
                let old = store.values.get(&key).cloned();
                if deep_equal_opt(old.as_ref(), Some(&value)) {
                    continue;
                }
                store.values.insert(key.clone(), value.clone());
                let change = Change::new(key, Some(value), old);
                store.record(&change);
                changes.push(change);
            }
            changes
                .into_iter()
                .map(|change| {
                    let watchers = store.watchers_for(&change.key);
                    (change, watchers)
                })
                .collect::<Vec<_>>()
        };
        debug!(changes = notifications.len(), silent, "StateManager::batch");

        Ok(self.announce_all(notifications, silent))
    }

    fn announce_all(&self, notifications: Vec<(Change, Vec<WatchFn>)>, silent: bool) -> Vec<Change> {
        if !silent {
            for (change, watchers) in &notifications {
                notify(watchers, change);
            }
            if !notifications.is_empty() {
                let payload = notifications.iter().map(|(change, _)| change.to_payload()).collect();
                self.inner.bus.emit_sync(STATE_BATCH_CHANGED, Value::Array(payload));
            }
        }
        notifications.into_iter().map(|(change, _)| change).collect()
    }

    /// Register a derived key, dropping any value stored under the same name
    pub fn computed<F>(&self, key: &str, f: F)
    where
        F: Fn(&StateManager) -> Value + Send + Sync + 'static,
    {
        let mut store = self.store();
        if store.values.remove(key).is_some() {
            warn!(key, "StateManager::computed: stored value replaced by computed key");
        }
        store.computed.insert(key.to_string(), Arc::new(f));
        debug!(key, "StateManager::computed");
    }

    pub fn has(&self, key: &str) -> bool {
        let store = self.store();
        store.values.contains_key(key) || store.computed.contains_key(key)
    }

    /// Stored and computed keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let store = self.store();
        let keys: BTreeSet<&String> = store.values.keys().chain(store.computed.keys()).collect();
        keys.into_iter().cloned().collect()
    }

    /// Copy of every stored value (computed keys excluded)
    pub fn snapshot(&self) -> Map<String, Value> {
        self.store()
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Applied changes, oldest first
    pub fn history(&self) -> Vec<ChangeRecord> {
        self.store().history.to_vec()
    }

    pub fn clear_history(&self) {
        self.store().history.clear();
    }

    /// Remove every stored value; watchers and computed keys stay registered
    pub fn reset(&self, silent: bool) -> usize {
        let notifications = {
            let mut store = self.store();
            let mut drained: Vec<(String, Value)> = store.values.drain().collect();
            drained.sort_by(|a, b| a.0.cmp(&b.0));
            drained
                .into_iter()
                .map(|(key, old)| {
                    let change = Change::new(key, None, Some(old));
                    store.record(&change);
                    let watchers = store.watchers_for(&change.key);
                    (change, watchers)
                })
                .collect::<Vec<_>>()
        };
        info!(cleared = notifications.len(), silent, "StateManager::reset");
        self.announce_all(notifications, silent).len()
    }

    /// Restore allow-listed keys from the durable snapshot
    ///
    /// Values are written straight into the store: no watcher, event or
    /// history entry sees the restore. Computed keys are skipped.
    pub fn load_persisted_state(&self) -> StateResponse<usize> {
        let snapshot = self.inner.snapshot.load()?;
        let mut restored = 0;
        let mut store = self.store();
        for key in &self.inner.config.persisted_keys {
            let Some(value) = snapshot.get(key) else {
                continue;
            };
            if store.computed.contains_key(key) {
                warn!(key = %key, "StateManager::load_persisted_state: key is computed, skipping");
                continue;
            }
            if deep_equal_opt(store.values.get(key), Some(value)) {
                continue;
            }
            store.values.insert(key.clone(), value.clone());
            restored += 1;
        }
        info!(restored, allowed = self.inner.config.persisted_keys.len(), "StateManager::load_persisted_state");
        Ok(restored)
    }

    /// Bus carrying `state:*` events
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store();
        f.debug_struct("StateManager")
            .field("values", &store.values.len())
            .field("computed", &store.computed.len())
            .field("watched_keys", &store.watchers.len())
            .finish()
    }
}

/// Run watchers in order; a panicking watcher is logged and skipped
fn notify(watchers: &[WatchFn], change: &Change) {
    for watcher in watchers {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| watcher(change))) {
            error!(key = %change.key, panic = %panic_message(panic.as_ref()), "StateManager: watcher panicked");
        }
    }
}

/// Handle returned by `watch`/`subscribe`
#[must_use = "the watcher stays registered until unwatch is called"]
pub struct Watch {
    state: Weak<StateInner>,
    entries: Vec<(String, WatchFn)>,
}

impl Watch {
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Remove every registration this handle covers; returns how many were removed
    pub fn unwatch(&self) -> usize {
        let Some(inner) = self.state.upgrade() else {
            return 0;
        };
        let mut store = inner.store();
        let mut removed = 0;
        for (key, callback) in &self.entries {
            let now_empty = match store.watchers.get_mut(key) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|w| !Arc::ptr_eq(w, callback));
                    removed += before - list.len();
                    list.is_empty()
                }
                None => false,
            };
            if now_empty {
                store.watchers.remove(key);
            }
        }
        debug!(removed, "Watch::unwatch");
        removed
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch").field("keys", &self.keys()).finish()
    }
}
