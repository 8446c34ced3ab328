//! Event Bus Architecture
//!
//! Publish/subscribe hub shared by every panel of the dashboard. Components,
//! the state manager and the router all emit here; toasts, watchers and
//! other panels subscribe.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EVENT BUS                            │
//! │   history ring  →  middleware  →  listener snapshot          │
//! │                                   (priority desc, stable)    │
//! └─────────────────────────────────────────────────────────────┘
//!         ↑               ↑               ↑               ↑
//!     Component       StateManager      Router         Panels
//!     emits:          emits:            emits:         emit:
//!     - ready:<t>     - state:changed   - route:changed - notification:show
//!     - error         - state:deleted
//!     - destroyed:<t> - state:batchChanged
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dashkit::events::{EmitOptions, EventBus, ListenOptions};
//! use serde_json::json;
//!
//! let bus = EventBus::with_defaults();
//! let sub = bus.on("x", |env| println!("got {}", env.data), ListenOptions::default().with_priority(10))?;
//! bus.emit("x", json!({"v": 1}), EmitOptions::default()).await;
//! sub.unsubscribe();
//! ```
//!
//! # Dispatch
//!
//! - Sequential (default): listeners run one after another; a deferred reply
//!   is awaited (bounded by the timeout) before the next listener starts.
//! - Parallel: every listener starts, results are collected settle-all.
//! - `emit_sync`: sequential with no suspension; deferred replies are detached.

mod bus;
mod cancel;
mod history;
mod namespace;
mod pacing;
mod types;

pub use bus::{EventBus, Subscription};
pub use cancel::CancelToken;
pub use history::{HistoryEntry, Ring, SlowDispatch};
pub use namespace::Namespace;
pub use pacing::{Debouncer, Pacer, Throttler};
pub use types::{
    BusError, BusStats, DeferredReply, EmitOptions, Envelope, IntoReply, ListenOptions, ListenerError, ListenerFn,
    ListenerId, ListenerResult, MiddlewareFn, Reply,
};

pub(crate) use bus::panic_message;
