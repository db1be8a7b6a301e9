//! In-process attribute tree with deferred change delivery.
//!
//! DESIGN
//! ======
//! `MemoryTree` stands in for the host's replicated tree. Writes land in the
//! shared JSON root immediately, but subscribers only hear about them when
//! `flush()` runs, which models the round trip to the replication service:
//! between a write and the next flush, a writer's local state is ahead of
//! the acknowledgment. Several participants may share one tree; each flush
//! notifies every subscriber, the writer included.
//!
//! Pending notifications for the same key coalesce to the latest value and
//! keep the position of the first occurrence, so a subscriber sees per-leaf
//! last-writer-wins rather than every intermediate write.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::tree::{AttributeChange, AttributeTree, ChangeCallback, ScopeEvent, SubscriptionId, TreeError, value_at};

// =============================================================================
// TYPES
// =============================================================================

enum Pending {
    Updated(IndexMap<String, AttributeChange>),
    Disposed,
}

struct Subscription {
    scope: Vec<String>,
    callback: ChangeCallback,
    pending: Vec<Pending>,
}

impl Subscription {
    fn push_change(&mut self, change: AttributeChange) {
        if let Some(Pending::Updated(batch)) = self.pending.last_mut() {
            batch.insert(change.key.clone(), change);
            return;
        }
        let mut batch = IndexMap::new();
        batch.insert(change.key.clone(), change);
        self.pending.push(Pending::Updated(batch));
    }

    /// Relation between this scope and a written path.
    fn overlap(&self, path: &[&str]) -> Overlap {
        let shared = self.scope.len().min(path.len());
        if !self.scope.iter().zip(path).take(shared).all(|(a, b)| a == b) {
            return Overlap::None;
        }
        if path.len() > self.scope.len() { Overlap::Child(path[self.scope.len()].to_string()) } else { Overlap::Whole }
    }
}

enum Overlap {
    None,
    /// The write touched one direct child key (or something below it).
    Child(String),
    /// The write replaced the scope object or one of its ancestors.
    Whole,
}

struct MemoryInner {
    root: Value,
    attached: bool,
    next_id: u64,
    subscriptions: BTreeMap<u64, Subscription>,
}

/// Shared in-memory attribute tree.
pub struct MemoryTree {
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Create an empty, attached tree.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    /// Create a tree seeded with existing state, e.g. a late joiner's view.
    #[must_use]
    pub fn with_root(root: Value) -> Self {
        Self {
            inner: Mutex::new(MemoryInner { root, attached: true, next_id: 1, subscriptions: BTreeMap::new() }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detached trees reject writes with [`TreeError::Detached`].
    pub fn set_attached(&self, attached: bool) {
        self.lock().attached = attached;
    }

    /// Clone of the whole tree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.lock().root.clone()
    }

    /// Number of undelivered notifications across all subscribers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock()
            .subscriptions
            .values()
            .map(|sub| sub.pending.len())
            .sum()
    }

    /// Deliver every queued notification. Returns the number of events sent.
    ///
    /// Callbacks run without the tree lock held, so they may write back into
    /// the tree; those writes queue for the next flush.
    pub fn flush(&self) -> usize {
        let deliveries: Vec<(ChangeCallback, Vec<ScopeEvent>)> = {
            let mut inner = self.lock();
            inner
                .subscriptions
                .values_mut()
                .filter(|sub| !sub.pending.is_empty())
                .map(|sub| {
                    let events = sub
                        .pending
                        .drain(..)
                        .map(|pending| match pending {
                            Pending::Updated(batch) => ScopeEvent::Updated(batch.into_values().collect()),
                            Pending::Disposed => ScopeEvent::Disposed,
                        })
                        .collect();
                    (sub.callback.clone(), events)
                })
                .collect()
        };

        let mut delivered = 0;
        for (callback, events) in deliveries {
            for event in &events {
                callback(event);
                delivered += 1;
            }
        }
        delivered
    }
}

// =============================================================================
// WRITES
// =============================================================================

fn write_leaf(root: &mut Value, path: &[&str], value: Option<Value>) -> Result<(), TreeError> {
    let Some((leaf, parents)) = path.split_last() else {
        return Err(TreeError::EmptyPath);
    };

    let mut node = root;
    for (depth, segment) in parents.iter().enumerate() {
        let Value::Object(map) = node else {
            return Err(TreeError::NotAnObject { path: path[..depth].join("/") });
        };
        if value.is_none() && !map.contains_key(*segment) {
            // Nothing to remove below a missing branch.
            return Ok(());
        }
        let child = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if child.is_null() {
            *child = Value::Object(Map::new());
        }
        node = child;
    }

    let Value::Object(map) = node else {
        return Err(TreeError::NotAnObject { path: parents.join("/") });
    };
    match value {
        Some(value) => {
            map.insert((*leaf).to_string(), value);
        }
        None => {
            map.remove(*leaf);
        }
    }
    Ok(())
}

fn diff_scope(sub: &mut Subscription, before: Option<&Value>, after: Option<&Value>) {
    let Some(Value::Object(after)) = after else {
        if before.is_some() {
            sub.pending.push(Pending::Disposed);
        }
        return;
    };
    let empty = Map::new();
    let before = before.and_then(Value::as_object).unwrap_or(&empty);

    for key in before.keys() {
        if !after.contains_key(key) {
            sub.push_change(AttributeChange::removed(key.clone()));
        }
    }
    for (key, value) in after {
        if before.get(key) != Some(value) {
            sub.push_change(AttributeChange::upsert(key.clone(), value.clone()));
        }
    }
}

impl AttributeTree for MemoryTree {
    fn get(&self, path: &[&str]) -> Option<Value> {
        value_at(&self.lock().root, path).cloned()
    }

    fn update(&self, path: &[&str], value: Option<Value>) -> Result<(), TreeError> {
        let mut inner = self.lock();
        if !inner.attached {
            return Err(TreeError::Detached);
        }

        let watchers: Vec<(u64, Overlap, Option<Value>)> = inner
            .subscriptions
            .iter()
            .filter_map(|(id, sub)| match sub.overlap(path) {
                Overlap::None => None,
                overlap => {
                    let scope: Vec<&str> = sub.scope.iter().map(String::as_str).collect();
                    Some((*id, overlap, value_at(&inner.root, &scope).cloned()))
                }
            })
            .collect();

        write_leaf(&mut inner.root, path, value)?;

        let MemoryInner { root, subscriptions, .. } = &mut *inner;
        for (id, overlap, before) in watchers {
            let Some(sub) = subscriptions.get_mut(&id) else {
                continue;
            };
            let scope: Vec<&str> = sub.scope.iter().map(String::as_str).collect();
            let after = value_at(root, &scope).cloned();
            match overlap {
                Overlap::None => {}
                Overlap::Child(key) => {
                    let old = before.as_ref().and_then(|v| v.get(&key));
                    let new = after.as_ref().and_then(|v| v.get(&key));
                    match (old, new) {
                        (Some(_), None) => sub.push_change(AttributeChange::removed(key)),
                        (old, Some(new)) if old != Some(new) => {
                            sub.push_change(AttributeChange::upsert(key, new.clone()));
                        }
                        _ => {}
                    }
                }
                Overlap::Whole => diff_scope(sub, before.as_ref(), after.as_ref()),
            }
        }
        Ok(())
    }

    fn subscribe(&self, scope: &[&str], callback: ChangeCallback) -> SubscriptionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.insert(
            id,
            Subscription { scope: scope.iter().map(|s| (*s).to_string()).collect(), callback, pending: Vec::new() },
        );
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscriptions.remove(&id.0);
    }
}
