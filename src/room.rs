//! Local participant's handle on the shared tree: identity, write gate, and
//! the "safe" write primitive every mutator goes through.
//!
//! DESIGN
//! ======
//! Writability is explicit state (`WriteGate`) handed to each component,
//! not a process-wide singleton, so tests can flip it without a session.
//! The gate is advisory: it stops this participant from attempting writes,
//! it cannot stop a remote peer (leaves stay last-writer-wins).
//!
//! ERROR HANDLING
//! ==============
//! `safe_update` never fails loudly. A closed gate or a tree error is
//! logged and reported as `false`; the session keeps running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::warn;

use crate::tree::{AttributeTree, display_path};

/// Shared "may the local participant write" flag.
#[derive(Debug, Clone)]
pub struct WriteGate(Arc<AtomicBool>);

impl WriteGate {
    #[must_use]
    pub fn new(writable: bool) -> Self {
        Self(Arc::new(AtomicBool::new(writable)))
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_writable(&self, writable: bool) {
        self.0.store(writable, Ordering::SeqCst);
    }
}

/// Tree access bound to one local participant.
#[derive(Clone)]
pub struct Room {
    tree: Arc<dyn AttributeTree>,
    gate: WriteGate,
    participant_id: String,
}

impl Room {
    #[must_use]
    pub fn new(tree: Arc<dyn AttributeTree>, gate: WriteGate, participant_id: impl Into<String>) -> Self {
        Self { tree, gate, participant_id: participant_id.into() }
    }

    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    #[must_use]
    pub fn tree(&self) -> &Arc<dyn AttributeTree> {
        &self.tree
    }

    #[must_use]
    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    #[must_use]
    pub fn can_operate(&self) -> bool {
        self.gate.is_writable()
    }

    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        self.tree.get(path)
    }

    /// Write one leaf if the gate is open. Returns false when skipped or rejected.
    pub fn safe_update(&self, path: &[&str], value: Option<Value>) -> bool {
        if !self.can_operate() {
            warn!(path = %display_path(path), "write skipped: participant is not writable");
            return false;
        }
        match self.tree.update(path, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, path = %display_path(path), "attribute write failed");
                false
            }
        }
    }

    /// Write several top-level fields. Returns false if any write was skipped.
    pub fn safe_set<'a>(&self, fields: impl IntoIterator<Item = (&'a str, Option<Value>)>) -> bool {
        fields
            .into_iter()
            .fold(true, |all, (field, value)| self.safe_update(&[field], value) && all)
    }
}
