//! Contract of the replicated attribute tree the session is built on.
//!
//! DESIGN
//! ======
//! The tree itself (transport, conflict resolution) belongs to the host.
//! This crate only needs path-based reads, leaf writes where `None` is a
//! tombstone, and scoped change notifications delivered per key. Each leaf
//! is last-writer-wins; notifications for different leaves carry no global
//! order, only per-leaf monotonicity.

use std::sync::Arc;

use serde_json::Value;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("cannot write the tree root")]
    EmptyPath,
    #[error("path crosses a non-object value at {path}")]
    NotAnObject { path: String },
    #[error("attribute tree is not attached")]
    Detached,
}

/// Whether a key was written or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Removed,
}

/// One committed key change inside a watched scope.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    /// Direct child key of the watched scope.
    pub key: String,
    pub kind: ChangeKind,
    /// Current value of the key. `None` for removals.
    pub value: Option<Value>,
}

impl AttributeChange {
    #[must_use]
    pub fn upsert(key: impl Into<String>, value: Value) -> Self {
        Self { key: key.into(), kind: ChangeKind::Upsert, value: Some(value) }
    }

    #[must_use]
    pub fn removed(key: impl Into<String>) -> Self {
        Self { key: key.into(), kind: ChangeKind::Removed, value: None }
    }
}

/// Notification delivered to a scope subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeEvent {
    /// A batch of key changes, in delivery order.
    Updated(Vec<AttributeChange>),
    /// The watched object itself was removed from the tree.
    Disposed,
}

/// Subscriber callback. Invoked outside any lock held by the tree.
pub type ChangeCallback = Arc<dyn Fn(&ScopeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// =============================================================================
// CONTRACT
// =============================================================================

/// Shared mutable tree of JSON values, replicated by the host.
pub trait AttributeTree: Send + Sync {
    /// Read the value at `path`. An empty path reads the root.
    fn get(&self, path: &[&str]) -> Option<Value>;

    /// Write a leaf. `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns a [`TreeError`] when the write cannot be applied.
    fn update(&self, path: &[&str], value: Option<Value>) -> Result<(), TreeError>;

    /// Watch the direct children of the object at `scope`.
    fn subscribe(&self, scope: &[&str], callback: ChangeCallback) -> SubscriptionId;

    /// Stop a watch. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

// =============================================================================
// PATH HELPERS
// =============================================================================

/// Resolve `path` inside `root`.
#[must_use]
pub fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| node.as_object()?.get(*segment))
}

/// Render a path for diagnostics, e.g. `apps/app-1/state`.
#[must_use]
pub fn display_path(path: &[&str]) -> String {
    path.join("/")
}
