//! Event bus vocabulary
//!
//! Listener identities, the envelope handed to callbacks, replies and
//! per-listener results, plus the option structs accepted by `on`/`emit`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::cancel::CancelToken;

/// Identity of one `on` registration
///
/// Rust closures have no reference identity, so `off` targets a listener by
/// the id returned at registration instead of by callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a listener receives for one emission
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Fully qualified event name
    pub event: String,
    /// Payload after middleware
    pub data: Value,
    /// Owner tag given at registration
    pub context: Option<String>,
    /// Cancelled when the bus stops waiting on this listener's deferred reply
    pub cancel: CancelToken,
}

/// Future produced by a listener that finishes its work asynchronously
pub type DeferredReply = BoxFuture<'static, Result<Value, ListenerError>>;

/// Immediate or deferred listener reply
pub enum Reply {
    Value(Value),
    Deferred(DeferredReply),
}

impl Reply {
    /// Reply carrying no value
    pub fn none() -> Self {
        Self::Value(Value::Null)
    }

    /// Reply that settles when `fut` completes
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, ListenerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(fut))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Conversion for anything a listener closure may return
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, ListenerError>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, ListenerError> {
        Ok(Reply::none())
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, ListenerError> {
        Ok(Reply::Value(self))
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, ListenerError> {
        Ok(self)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<ListenerError>,
{
    fn into_reply(self) -> Result<Reply, ListenerError> {
        match self {
            Ok(reply) => reply.into_reply(),
            Err(e) => Err(e.into()),
        }
    }
}

/// Type-erased, already wrapped listener callback
pub type ListenerFn = Arc<dyn Fn(&Envelope) -> Result<Reply, ListenerError> + Send + Sync>;

/// Payload transformer run before dispatch
pub type MiddlewareFn = Arc<dyn Fn(&str, Value) -> eyre::Result<Value> + Send + Sync>;

/// Failure of a single listener; never aborts its siblings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(String),

    #[error("listener panicked: {0}")]
    Panicked(String),

    #[error("listener timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<eyre::Report> for ListenerError {
    fn from(report: eyre::Report) -> Self {
        Self::Failed(format!("{:#}", report))
    }
}

impl From<BusError> for ListenerError {
    fn from(error: BusError) -> Self {
        Self::Failed(error.to_string())
    }
}

/// Programmer errors rejected at registration time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("invalid listener registration: {0}")]
    Validation(String),
}

/// Settled outcome of one listener for one emission
#[derive(Debug, Clone)]
pub enum ListenerResult {
    Fulfilled { listener: ListenerId, value: Value },
    Rejected { listener: ListenerId, error: ListenerError },
    /// Deferred reply handed to the runtime without waiting (`emit_sync`)
    Detached { listener: ListenerId },
}

impl ListenerResult {
    pub fn listener(&self) -> ListenerId {
        match self {
            Self::Fulfilled { listener, .. } | Self::Rejected { listener, .. } | Self::Detached { listener } => {
                *listener
            }
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ListenerError> {
        match self {
            Self::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Registration options for `on`/`once`
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Higher runs first; ties keep insertion order
    pub priority: i32,
    /// Remove after the first emission that reaches it
    pub once: bool,
    /// Owner tag, passed through to the envelope and usable with `off_context`
    pub context: Option<String>,
    /// Invoke only after this much silence since the last emission
    pub debounce: Option<Duration>,
    /// Invoke at most once per window
    pub throttle: Option<Duration>,
}

impl ListenOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn debounced(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    pub fn throttled(mut self, window: Duration) -> Self {
        self.throttle = Some(window);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BusError> {
        match (self.debounce, self.throttle) {
            (Some(_), Some(_)) => Err(BusError::Validation(
                "debounce and throttle cannot be combined".to_string(),
            )),
            (Some(d), None) | (None, Some(d)) if d.is_zero() => {
                Err(BusError::Validation("pacing delay must be greater than zero".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Dispatch options for `emit`
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Run all listeners concurrently and settle them all
    pub parallel: bool,
    /// Per-listener wait for deferred replies (bus default when None)
    pub timeout: Option<Duration>,
    /// Sequential only: stop at the first rejected listener
    pub stop_on_error: bool,
}

impl EmitOptions {
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }
}

/// Running counters kept by the bus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub emitted: u64,
    pub suppressed: u64,
    pub listener_failures: u64,
    pub timeouts: u64,
    pub middleware_failures: u64,
}
