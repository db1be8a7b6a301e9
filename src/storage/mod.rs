//! Storage: a typed, diffable key-value store scoped to one window.
//!
//! DESIGN
//! ======
//! A `Storage` owns the namespace `{appId}/_WM-STORAGE_/{storageId}` of the
//! attribute tree. Local writes are optimistic: `set_state` updates `state`
//! immediately and sends the write to the tree; the tree later echoes the
//! committed change back (to every participant, the writer included) and
//! `reconcile` turns each echoed batch into one diff event.
//!
//! Two pieces of bookkeeping keep those diffs honest:
//! - `last_value` remembers the value a key had before the first
//!   unacknowledged local write, so the diff at acknowledgment time reports
//!   the true previous value rather than the already-updated local one.
//! - the reference table maps each structured `Arc<Value>` to a stable
//!   reference key. An echo carrying a known key resolves to the same `Arc`
//!   the caller may still be holding, instead of a fresh equal copy.
//!
//! Structured values compare by identity (`Arc::ptr_eq`); primitives by
//! value. Replace a structured value with a new `Arc` to change it.
//!
//! ERROR HANDLING
//! ==============
//! Only construction fails loudly (empty id, non-object default state).
//! Writes without permission or after destruction log an error and return
//! false. A malformed key during adoption or reconciliation is logged and
//! skipped; the rest of the batch still applies.

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;

pub mod reference;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::consts::STORAGE_NS;
use crate::context::AppContext;
use crate::event::EventEmitter;
use crate::tree::{AttributeChange, ChangeKind, ScopeEvent, SubscriptionId};
use reference::{RefTable, RefValue, ReferenceError, is_structured};

// =============================================================================
// TYPES
// =============================================================================

/// A stored value. Structured values keep their identity through the `Arc`.
pub type StateValue = Arc<Value>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot create Storage with empty id")]
    EmptyId,
    #[error("default state for Storage {id} is not an object")]
    InvalidDefaultState { id: String },
    #[error("malformed value for key {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: ReferenceError,
    },
    #[error("upsert for key {key} carried no value")]
    MissingValue { key: String },
}

/// Before/after pair for one key. Only `old_value` set means removal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueDiff {
    pub new_value: Option<StateValue>,
    pub old_value: Option<StateValue>,
}

/// One reconciliation batch, in delivery order.
pub type StorageDiff = IndexMap<String, ValueDiff>;

fn same_value(a: Option<&StateValue>, b: Option<&StateValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if is_structured(a) || is_structured(b) {
                Arc::ptr_eq(a, b)
            } else {
                a == b
            }
        }
        _ => false,
    }
}

// =============================================================================
// INNER STATE
// =============================================================================

#[derive(Default)]
struct StorageInner {
    state: BTreeMap<String, StateValue>,
    /// Value before the first unacknowledged local write, per key.
    last_value: HashMap<String, Option<StateValue>>,
    refs: RefTable,
    destroyed: bool,
}

impl StorageInner {
    /// Take a value read from the tree into `state`, unwrapping references.
    fn adopt(&mut self, key: &str, raw: Value) -> Result<(), StorageError> {
        let value = match RefValue::classify(&raw).map_err(|source| StorageError::Malformed { key: key.to_string(), source })? {
            Some(reference) => self.resolve(key, reference),
            None => Arc::new(raw),
        };
        self.state.insert(key.to_string(), value);
        Ok(())
    }

    /// Keep the current `Arc` when it already carries this reference key.
    fn resolve(&mut self, key: &str, reference: RefValue) -> StateValue {
        if let Some(current) = self.state.get(key) {
            if is_structured(current) && self.refs.key_for(current) == Some(reference.k.as_str()) {
                return current.clone();
            }
        }
        let value = Arc::new(reference.v);
        if is_structured(&value) {
            self.refs.insert(&value, reference.k);
        }
        value
    }

    /// Tree payload for a local value: raw primitive or `{k, v}` wrapper.
    fn payload(&mut self, value: &StateValue) -> Value {
        if is_structured(value) {
            let k = self.refs.key_or_mint(value);
            RefValue { k, v: value.as_ref().clone() }.to_value()
        } else {
            value.as_ref().clone()
        }
    }

    fn reconcile_one(&mut self, change: &AttributeChange) -> Result<ValueDiff, StorageError> {
        let key = change.key.as_str();
        let mut old_value = self.last_value.remove(key).flatten();

        match change.kind {
            ChangeKind::Removed => {
                if let Some(current) = self.state.remove(key) {
                    old_value = Some(current);
                }
                Ok(ValueDiff { new_value: None, old_value })
            }
            ChangeKind::Upsert => {
                let raw = change
                    .value
                    .clone()
                    .ok_or_else(|| StorageError::MissingValue { key: key.to_string() })?;
                let incoming = match RefValue::classify(&raw)
                    .map_err(|source| StorageError::Malformed { key: key.to_string(), source })?
                {
                    Some(reference) => self.resolve(key, reference),
                    None => Arc::new(raw),
                };

                let current = self.state.get(key);
                let new_value = if same_value(current, Some(&incoming)) {
                    current.cloned().unwrap_or(incoming)
                } else {
                    old_value = current.cloned();
                    self.state.insert(key.to_string(), incoming.clone());
                    incoming
                };
                Ok(ValueDiff { new_value: Some(new_value), old_value })
            }
        }
    }
}

// =============================================================================
// STORAGE
// =============================================================================

struct StorageShared {
    id: String,
    context: AppContext,
    inner: Mutex<StorageInner>,
    on_state_changed: EventEmitter<StorageDiff>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl StorageShared {
    fn lock(&self) -> MutexGuard<'_, StorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            self.context.room().tree().unsubscribe(subscription);
        }
    }
}

impl Drop for StorageShared {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Handle to one storage namespace. Clones share state.
#[derive(Clone)]
pub struct Storage {
    shared: Arc<StorageShared>,
}

impl Storage {
    /// Open (or create) storage `id` under the window behind `context`.
    ///
    /// Existing tree state is adopted key by key. With write access and no
    /// prior state, the namespace is created and `default_state` applied.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EmptyId`] for an empty id and
    /// [`StorageError::InvalidDefaultState`] when `default_state` is not an object.
    pub fn new(context: &AppContext, id: &str, default_state: Option<Value>) -> Result<Self, StorageError> {
        if id.is_empty() {
            return Err(StorageError::EmptyId);
        }
        let default_state = match default_state {
            None => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => return Err(StorageError::InvalidDefaultState { id: id.to_string() }),
        };

        let mut inner = StorageInner::default();
        let raw_state = context.attributes_at(&[STORAGE_NS, id]);
        let has_prior_state = matches!(raw_state, Some(Value::Object(_)));
        if let Some(Value::Object(raw_state)) = raw_state {
            for (key, raw) in raw_state {
                if let Err(e) = inner.adopt(&key, raw) {
                    error!(storage_id = %id, %key, error = %e, "failed to adopt stored value");
                }
            }
        }

        let shared = Arc::new(StorageShared {
            id: id.to_string(),
            context: context.clone(),
            inner: Mutex::new(inner),
            on_state_changed: EventEmitter::new(),
            subscription: Mutex::new(None),
        });
        let storage = Self { shared };
        storage.listen();

        if context.is_writable() && !has_prior_state {
            if context.attributes_at(&[STORAGE_NS]).is_none() {
                context.update_attributes(&[STORAGE_NS], Some(Value::Object(Map::new())));
            }
            context.update_attributes(&[STORAGE_NS, id], Some(Value::Object(Map::new())));
            if let Some(defaults) = default_state {
                storage.set_state(defaults.into_iter().map(|(k, v)| (k, Some(Arc::new(v)))));
            }
        }
        debug!(storage_id = %id, app_id = %context.app_id(), "storage opened");
        Ok(storage)
    }

    fn listen(&self) {
        let weak: Weak<StorageShared> = Arc::downgrade(&self.shared);
        let app_id = self.shared.context.app_id().to_string();
        let scope = [app_id.as_str(), STORAGE_NS, self.shared.id.as_str()];
        let id = self.shared.context.room().tree().subscribe(
            &scope,
            Arc::new(move |event: &ScopeEvent| {
                if let Some(shared) = weak.upgrade() {
                    Self { shared }.handle_event(event);
                }
            }),
        );
        *self
            .shared
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    fn handle_event(&self, event: &ScopeEvent) {
        match event {
            ScopeEvent::Updated(changes) => self.reconcile(changes),
            ScopeEvent::Disposed => {
                debug!(storage_id = %self.shared.id, "storage namespace removed; destroying");
                self.destroy();
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Diff events, one per reconciled batch.
    #[must_use]
    pub fn on_state_changed(&self) -> &EventEmitter<StorageDiff> {
        &self.shared.on_state_changed
    }

    /// Snapshot of the current local state.
    #[must_use]
    pub fn state(&self) -> BTreeMap<String, StateValue> {
        let inner = self.shared.lock();
        if inner.destroyed {
            warn!(storage_id = %self.shared.id, "accessing state on destroyed storage");
        }
        inner.state.clone()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.shared.lock().state.get(key).cloned()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    /// Apply `patch` only for keys not already present.
    pub fn ensure_state<K>(&self, patch: impl IntoIterator<Item = (K, Option<StateValue>)>) -> bool
    where
        K: Into<String>,
    {
        let missing: Vec<(String, Option<StateValue>)> = {
            let inner = self.shared.lock();
            patch
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .filter(|(key, _)| !inner.state.contains_key(key))
                .collect()
        };
        self.set_state(missing)
    }

    /// Write keys optimistically. `None` deletes a key (tombstone in the tree).
    /// Returns false, after logging, when destroyed or not writable.
    pub fn set_state<K>(&self, patch: impl IntoIterator<Item = (K, Option<StateValue>)>) -> bool
    where
        K: Into<String>,
    {
        let id = self.shared.id.as_str();
        let writes: Vec<(String, Option<Value>)> = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                error!(storage_id = %id, "cannot set state on destroyed storage");
                return false;
            }
            if !self.shared.context.is_writable() {
                error!(storage_id = %id, "cannot set state without writable access");
                return false;
            }

            let mut writes = Vec::new();
            for (key, value) in patch {
                let key: String = key.into();
                let current = inner.state.get(&key).cloned();
                if same_value(current.as_ref(), value.as_ref()) {
                    continue;
                }
                inner.last_value.entry(key.clone()).or_insert(current);
                match value {
                    None => {
                        inner.state.remove(&key);
                        writes.push((key, None));
                    }
                    Some(value) => {
                        let payload = inner.payload(&value);
                        inner.state.insert(key.clone(), value);
                        writes.push((key, Some(payload)));
                    }
                }
            }
            writes
        };

        for (key, payload) in writes {
            self.shared
                .context
                .update_attributes(&[STORAGE_NS, id, key.as_str()], payload);
        }
        true
    }

    /// Clear the namespace. Local state follows when the removals are echoed.
    pub fn empty_store(&self) -> bool {
        let id = self.shared.id.as_str();
        if self.is_destroyed() {
            error!(storage_id = %id, "cannot empty destroyed storage");
            return false;
        }
        if !self.shared.context.is_writable() {
            error!(storage_id = %id, "cannot empty storage without writable access");
            return false;
        }
        self.shared
            .context
            .update_attributes(&[STORAGE_NS, id], Some(Value::Object(Map::new())))
    }

    /// Destroy this handle and remove the namespace from the tree.
    pub fn delete_store(&self) -> bool {
        let id = self.shared.id.as_str();
        if !self.shared.context.is_writable() {
            error!(storage_id = %id, "cannot delete storage without writable access");
            return false;
        }
        self.destroy();
        self.shared
            .context
            .update_attributes(&[STORAGE_NS, id], None)
    }

    /// Stop listening to the tree and drop every state listener. Every later
    /// mutator is a logged no-op.
    pub fn destroy(&self) {
        self.shared.lock().destroyed = true;
        self.shared.unsubscribe();
        self.shared.on_state_changed.clear();
    }

    /// Apply one echoed batch and emit its diff.
    pub fn reconcile(&self, changes: &[AttributeChange]) {
        let diff: StorageDiff = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                error!(storage_id = %self.shared.id, "cannot reconcile destroyed storage");
                return;
            }
            let mut diff = StorageDiff::new();
            for change in changes {
                match inner.reconcile_one(change) {
                    Ok(entry) => {
                        diff.insert(change.key.clone(), entry);
                    }
                    Err(e) => {
                        error!(storage_id = %self.shared.id, key = %change.key, error = %e, "failed to reconcile key");
                    }
                }
            }
            diff
        };
        if !diff.is_empty() {
            self.shared.on_state_changed.dispatch(&diff);
        }
    }
}
