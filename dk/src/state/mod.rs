//! Reactive state store
//!
//! StateManager holds the dashboard's shared key/value state, notifies
//! watchers synchronously and persists selected keys between sessions.

mod equality;
mod manager;
mod messages;
mod persist;

pub use equality::{deep_equal, deep_equal_opt};
pub use manager::{ComputedFn, STATE_BATCH_CHANGED, STATE_CHANGED, STATE_DELETED, StateManager, Watch};
pub use messages::{Change, ChangeRecord, SetOptions, StateError, StateResponse, Update, WatchFn, WatchOptions};
pub use persist::{FileSnapshot, MemorySnapshot, SnapshotStore};
