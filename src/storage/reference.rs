//! Reference wrappers and the weak identity table behind them.
//!
//! DESIGN
//! ======
//! Structured values (objects, arrays) are written to the tree as
//! `{k, v}`: a reference key plus the value. Writing the same `Arc` again
//! reuses its key, so peers that already saw that key can tell nothing
//! changed, and an echoed write resolves back to the very same `Arc`.
//!
//! The table holds `Weak` handles only. Once every `Arc` to a value is
//! dropped its content is freed and the entry reads as dead; dead entries
//! are pruned on the next insert. Because a live `Weak` pins the
//! allocation (not the value), an address key cannot be reused by a new
//! `Arc` while its entry is still present.

#[cfg(test)]
#[path = "reference_test.rs"]
mod reference_test;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use uuid::Uuid;

/// Key of the reference id inside a wrapper.
const REF_KEY: &str = "k";
/// Key of the wrapped value inside a wrapper.
const REF_VALUE: &str = "v";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("reference key is not a string")]
    NonStringKey,
}

/// `{k, v}` envelope giving a structured value a stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RefValue {
    pub k: String,
    pub v: Value,
}

impl RefValue {
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "k": self.k, "v": self.v })
    }

    /// Recognize a wrapper: an object with exactly the keys `k` and `v`.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::NonStringKey`] for a `{k, v}` object whose
    /// `k` is not a string.
    pub fn classify(value: &Value) -> Result<Option<Self>, ReferenceError> {
        let Value::Object(map) = value else {
            return Ok(None);
        };
        if map.len() != 2 {
            return Ok(None);
        }
        let (Some(k), Some(v)) = (map.get(REF_KEY), map.get(REF_VALUE)) else {
            return Ok(None);
        };
        match k {
            Value::String(k) => Ok(Some(Self { k: k.clone(), v: v.clone() })),
            _ => Err(ReferenceError::NonStringKey),
        }
    }
}

fn mint_key() -> String {
    Uuid::new_v4().to_string()
}

/// Objects and arrays get reference wrappers; everything else is stored raw.
#[must_use]
pub fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

struct RefEntry {
    value: Weak<Value>,
    key: String,
}

/// Non-owning map from a live `Arc<Value>` to its reference key.
#[derive(Default)]
pub struct RefTable {
    entries: HashMap<usize, RefEntry>,
}

fn address(value: &Arc<Value>) -> usize {
    Arc::as_ptr(value).addr()
}

impl RefTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference key of `value`, if this exact `Arc` was associated and is alive.
    #[must_use]
    pub fn key_for(&self, value: &Arc<Value>) -> Option<&str> {
        let entry = self.entries.get(&address(value))?;
        (entry.value.strong_count() > 0).then_some(entry.key.as_str())
    }

    /// Associate `value` with `key`, replacing any previous association.
    pub fn insert(&mut self, value: &Arc<Value>, key: String) {
        self.prune();
        self.entries
            .insert(address(value), RefEntry { value: Arc::downgrade(value), key });
    }

    /// Existing key of `value`, or a freshly minted and recorded one.
    pub fn key_or_mint(&mut self, value: &Arc<Value>) -> String {
        if let Some(key) = self.key_for(value) {
            return key.to_string();
        }
        let key = mint_key();
        self.insert(value, key.clone());
        key
    }

    /// Drop entries whose value is gone.
    pub fn prune(&mut self) {
        self.entries
            .retain(|_, entry| entry.value.strong_count() > 0);
    }

    /// Number of live associations.
    #[cfg(test)]
    fn live(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.value.strong_count() > 0)
            .count()
    }
}
