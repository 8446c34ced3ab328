//! Component lifecycle
//!
//! Panels implement [`Component`] and are driven by a [`ComponentHost`]:
//!
//! ```text
//! new ──► init ──► on_before_init → render → bind_events → load_data ──► ready
//!            │                                                         │
//!            └──────────── any failure ──► handle_error ◄── refresh ───┘
//!                                               │
//!                                  destroy ◄────┘ (Ready or Error only)
//! ```
//!
//! Listeners attached through [`Cx`] are tracked and detached on destroy.

mod cx;
mod errors;
mod host;
mod options;

pub use cx::{Cx, NOTIFICATION_SHOW};
pub use errors::{
    ComponentError, MSG_FORBIDDEN, MSG_GENERIC, MSG_NETWORK, MSG_NOT_FOUND, MSG_PARSE, MSG_RATE_LIMITED, MSG_SERVER,
    MSG_TIMEOUT, MSG_UNAUTHORIZED, MSG_UNAVAILABLE, describe_error, error_message,
};
pub use host::{COMPONENT_DESTROYED_PREFIX, COMPONENT_ERROR, COMPONENT_READY_PREFIX, Component, ComponentHost};
pub use options::{ComponentOptions, Lifecycle, NotificationLevel};
