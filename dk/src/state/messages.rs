//! State manager vocabulary
//!
//! Change records handed to watchers, option structs and errors.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from state operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Key is computed and cannot be written: {0}")]
    ComputedKey(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result of state operations
pub type StateResponse<T> = Result<T, StateError>;

/// One key transition as seen by watchers and bus listeners
///
/// `None` means the key had (or now has) no stored value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub key: String,
    pub value: Option<Value>,
    pub old_value: Option<Value>,
}

impl Change {
    pub fn new(key: impl Into<String>, value: Option<Value>, old_value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            value,
            old_value,
        }
    }

    /// Bus payload `{key, value, oldValue}`; missing values become null
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "key": self.key,
            "value": self.value.clone().unwrap_or(Value::Null),
            "oldValue": self.old_value.clone().unwrap_or(Value::Null),
        })
    }
}

/// History entry for one applied change
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    #[serde(flatten)]
    pub change: Change,
    pub timestamp: DateTime<Utc>,
}

/// Options for `set`, `update` and `delete`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Store without notifying watchers or the bus
    pub silent: bool,
    /// Also merge the value into the durable snapshot
    pub persist: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn persisted() -> Self {
        Self {
            persist: true,
            ..Self::default()
        }
    }
}

/// Options for `watch`
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Invoke once at registration with the current value
    pub immediate: bool,
}

impl WatchOptions {
    pub fn immediate() -> Self {
        Self { immediate: true }
    }
}

/// Watcher callback; shared so the same callback can watch several keys
pub type WatchFn = Arc<dyn Fn(&Change) + Send + Sync>;

/// How `update` derives the replacement value
pub enum Update {
    /// Receives the current value and returns the replacement
    With(Box<dyn FnOnce(Option<&Value>) -> Value + Send>),
    /// Shallow-merged onto a current object, otherwise replaces it
    Merge(Map<String, Value>),
}

impl Update {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(Option<&Value>) -> Value + Send + 'static,
    {
        Self::With(Box::new(f))
    }

    /// Compute the value to hand to `set`
    pub(crate) fn apply(self, current: Option<&Value>) -> Value {
        match self {
            Self::With(f) => f(current),
            Self::Merge(patch) => match current {
                Some(Value::Object(base)) => {
                    let mut merged = base.clone();
                    merged.extend(patch);
                    Value::Object(merged)
                }
                _ => Value::Object(patch),
            },
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::With(_) => f.write_str("With(..)"),
            Self::Merge(patch) => f.debug_tuple("Merge").field(patch).finish(),
        }
    }
}
