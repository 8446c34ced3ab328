//! Event Bus - central pub/sub hub for the dashboard runtime
//!
//! Listeners are kept per event name, ordered by descending priority with
//! ties in insertion order. Every emission is recorded in a bounded history,
//! passed through middleware, then dispatched against a snapshot of the
//! listener list, so registrations made while a pass is running only affect
//! later passes. Listener failures (errors, panics, timeouts) are caught at
//! the dispatch boundary and reported as [`ListenerResult::Rejected`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::cancel::CancelToken;
use super::history::{Diagnostics, HistoryEntry, Ring, SlowDispatch};
use super::namespace::Namespace;
use super::pacing::{Debouncer, Pacer, Throttler};
use super::types::{
    BusError, BusStats, DeferredReply, EmitOptions, Envelope, IntoReply, ListenOptions, ListenerError, ListenerFn,
    ListenerId, ListenerResult, MiddlewareFn, Reply,
};
use crate::config::BusConfig;

/// One registration as stored in the listener table
#[derive(Clone)]
struct Listener {
    id: ListenerId,
    callback: ListenerFn,
    priority: i32,
    once: bool,
    context: Option<String>,
    pacer: Option<Pacer>,
}

impl Listener {
    fn envelope(&self, event: &str, data: &Value) -> Envelope {
        Envelope {
            event: event.to_string(),
            data: data.clone(),
            context: self.context.clone(),
            cancel: CancelToken::new(),
        }
    }

    fn dispose(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.dispose();
        }
    }
}

struct Registry {
    listeners: HashMap<String, Vec<Listener>>,
    middleware: Vec<MiddlewareFn>,
    history: Ring<HistoryEntry>,
    next_sequence: u64,
    diagnostics: Diagnostics,
    paused: bool,
    stats: BusStats,
}

struct BusInner {
    config: BusConfig,
    registry: Mutex<Registry>,
}

/// Cheaply cloneable handle to a shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the given tuning
    pub fn new(config: BusConfig) -> Self {
        debug!(history_capacity = config.history_capacity, timeout_ms = config.timeout_ms, "EventBus::new");
        let registry = Registry {
            listeners: HashMap::new(),
            middleware: Vec::new(),
            history: Ring::new(config.history_capacity),
            next_sequence: 0,
            diagnostics: Diagnostics::new(config.slow_threshold(), config.diagnostics_retention()),
            paused: false,
            stats: BusStats::default(),
        };
        Self {
            inner: Arc::new(BusInner {
                config,
                registry: Mutex::new(registry),
            }),
        }
    }

    /// Create a bus with default tuning
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener
    ///
    /// The callback may return `()`, a `Value`, a [`Reply`] or a `Result` of
    /// any of those. Returns a handle that can remove exactly this registration.
    pub fn on<F, R>(&self, event: &str, callback: F, opts: ListenOptions) -> Result<Subscription, BusError>
    where
        F: Fn(&Envelope) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let callback: ListenerFn = Arc::new(move |envelope: &Envelope| callback(envelope).into_reply());
        self.insert(event, callback, opts)
    }

    /// Register a listener that is removed after its first emission
    pub fn once<F, R>(&self, event: &str, callback: F, opts: ListenOptions) -> Result<Subscription, BusError>
    where
        F: Fn(&Envelope) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.on(event, callback, opts.once())
    }

    fn insert(&self, event: &str, callback: ListenerFn, opts: ListenOptions) -> Result<Subscription, BusError> {
        if event.trim().is_empty() {
            return Err(BusError::Validation("event name must not be empty".to_string()));
        }
        opts.validate()?;

        let (callback, pacer) = pace(callback, &opts);
        let listener = Listener {
            id: ListenerId::new(),
            callback,
            priority: opts.priority,
            once: opts.once,
            context: opts.context,
            pacer,
        };
        let id = listener.id;

        let mut registry = self.registry();
        let list = registry.listeners.entry(event.to_string()).or_default();
        list.push(listener);
        // sort_by is stable: equal priorities keep insertion order
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(event, %id, priority = opts.priority, once = opts.once, count = list.len(), "EventBus::on");

        Ok(Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        })
    }

    /// Remove listeners for `event`
    ///
    /// `None` removes every listener on the event; `Some(id)` removes only that
    /// registration. Returns the number removed.
    pub fn off(&self, event: &str, listener: Option<ListenerId>) -> usize {
        let removed = match listener {
            None => self.remove_where(|name, _| name == event),
            Some(id) => self.remove_where(|name, l| name == event && l.id == id),
        };
        debug!(event, ?listener, removed, "EventBus::off");
        removed
    }

    /// Remove every listener registered with the given context tag
    pub fn off_context(&self, context: &str) -> usize {
        let removed = self.remove_where(|_, l| l.context.as_deref() == Some(context));
        debug!(context, removed, "EventBus::off_context");
        removed
    }

    /// Remove every listener whose event lives under `prefix:`
    pub fn clear_namespace(&self, prefix: &str) -> usize {
        let scope = format!("{}:", prefix);
        let removed = self.remove_where(|name, _| name.starts_with(&scope));
        debug!(prefix, removed, "EventBus::clear_namespace");
        removed
    }

    /// Remove all listeners and middleware and forget history
    pub fn clear(&self) {
        let removed = self.remove_where(|_, _| true);
        let mut registry = self.registry();
        registry.middleware.clear();
        registry.history.clear();
        debug!(removed, "EventBus::clear");
    }

    fn remove_where(&self, pred: impl Fn(&str, &Listener) -> bool) -> usize {
        let mut removed = Vec::new();
        {
            let mut registry = self.registry();
            registry.listeners.retain(|name, list| {
                list.retain(|l| {
                    if pred(name.as_str(), l) {
                        removed.push(l.clone());
                        false
                    } else {
                        true
                    }
                });
                !list.is_empty()
            });
        }
        for listener in &removed {
            listener.dispose();
        }
        removed.len()
    }

    /// Append a payload transformer; runs in registration order
    pub fn use_middleware<F>(&self, middleware: F)
    where
        F: Fn(&str, Value) -> eyre::Result<Value> + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.middleware.push(Arc::new(middleware));
        debug!(count = registry.middleware.len(), "EventBus::use_middleware");
    }

    /// Emit an event and wait for every listener to settle
    ///
    /// Returns `None` while the bus is paused. Never fails: listener failures
    /// are returned as rejected results.
    pub async fn emit(&self, event: &str, data: Value, opts: EmitOptions) -> Option<Vec<ListenerResult>> {
        let started = Instant::now();
        let (data, listeners) = self.prepare(event, data)?;
        let timeout = opts.timeout.unwrap_or_else(|| self.inner.config.timeout());
        debug!(event, listeners = listeners.len(), parallel = opts.parallel, "EventBus::emit");

        let results = if opts.parallel {
            let passes = listeners.iter().map(|l| execute_listener(l, event, &data, timeout));
            futures::future::join_all(passes).await
        } else {
            let mut results = Vec::with_capacity(listeners.len());
            for listener in &listeners {
                let result = execute_listener(listener, event, &data, timeout).await;
                let halt = opts.stop_on_error && result.is_rejected();
                results.push(result);
                if halt {
                    debug!(event, listener = %listener.id, "EventBus::emit: stopping at first rejected listener");
                    break;
                }
            }
            results
        };

        self.finish(event, &listeners, &results, started.elapsed());
        Some(results)
    }

    /// Emit sequentially without suspending
    ///
    /// Deferred replies are handed to the ambient tokio runtime and reported as
    /// [`ListenerResult::Detached`].
    pub fn emit_sync(&self, event: &str, data: Value) -> Option<Vec<ListenerResult>> {
        let started = Instant::now();
        let (data, listeners) = self.prepare(event, data)?;
        debug!(event, listeners = listeners.len(), "EventBus::emit_sync");

        let runtime = tokio::runtime::Handle::try_current().ok();
        let results: Vec<ListenerResult> = listeners
            .iter()
            .map(|listener| {
                let envelope = listener.envelope(event, &data);
                match invoke(&listener.callback, &envelope) {
                    Ok(Reply::Value(value)) => ListenerResult::Fulfilled {
                        listener: listener.id,
                        value,
                    },
                    Ok(Reply::Deferred(reply)) => detach(runtime.as_ref(), listener.id, event, reply),
                    Err(error) => {
                        error!(event, listener = %listener.id, %error, "EventBus::emit_sync: listener failed");
                        ListenerResult::Rejected {
                            listener: listener.id,
                            error,
                        }
                    }
                }
            })
            .collect();

        self.finish(event, &listeners, &results, started.elapsed());
        Some(results)
    }

    /// History entry, middleware pass and listener snapshot
    fn prepare(&self, event: &str, data: Value) -> Option<(Value, Vec<Listener>)> {
        let middleware = {
            let mut registry = self.registry();
            if registry.paused {
                registry.stats.suppressed += 1;
                debug!(event, "EventBus: paused, emission suppressed");
                return None;
            }
            registry.stats.emitted += 1;
            let sequence = registry.next_sequence;
            registry.next_sequence += 1;
            registry.history.push(HistoryEntry {
                sequence,
                event: event.to_string(),
                data: data.clone(),
                timestamp: Utc::now(),
            });
            registry.middleware.clone()
        };

        let mut data = data;
        let mut failures = 0;
        for (index, middleware) in middleware.iter().enumerate() {
            let input = data.clone();
            match catch_unwind(AssertUnwindSafe(|| middleware(event, input))) {
                Ok(Ok(next)) => data = next,
                Ok(Err(e)) => {
                    warn!(event, index, error = %e, "EventBus: middleware failed, payload unchanged");
                    failures += 1;
                }
                Err(panic) => {
                    warn!(event, index, panic = %panic_message(panic.as_ref()), "EventBus: middleware panicked, payload unchanged");
                    failures += 1;
                }
            }
        }

        let mut registry = self.registry();
        registry.stats.middleware_failures += failures;
        let listeners = registry.listeners.get(event).cloned().unwrap_or_default();
        Some((data, listeners))
    }

    /// Drop fired once-listeners, update counters, record slow passes
    fn finish(&self, event: &str, listeners: &[Listener], results: &[ListenerResult], elapsed: Duration) {
        let once: Vec<ListenerId> = listeners.iter().filter(|l| l.once).map(|l| l.id).collect();

        let mut registry = self.registry();
        if !once.is_empty() {
            let now_empty = match registry.listeners.get_mut(event) {
                Some(list) => {
                    list.retain(|l| !once.contains(&l.id));
                    list.is_empty()
                }
                None => false,
            };
            if now_empty {
                registry.listeners.remove(event);
            }
        }

        for result in results {
            match result.error() {
                Some(ListenerError::Timeout { .. }) => registry.stats.timeouts += 1,
                Some(_) => registry.stats.listener_failures += 1,
                None => {}
            }
        }

        if registry.diagnostics.observe(event, listeners.len(), elapsed) {
            warn!(
                event,
                listeners = listeners.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "EventBus: slow dispatch"
            );
        }
    }

    /// Suppress all emissions until [`EventBus::resume`]
    pub fn pause(&self) {
        debug!("EventBus::pause");
        self.registry().paused = true;
    }

    pub fn resume(&self) {
        debug!("EventBus::resume");
        self.registry().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.registry().paused
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry().listeners.get(event).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    /// Event names with at least one listener, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().listeners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Recorded emissions, oldest first, optionally for one event only
    pub fn history(&self, event: Option<&str>) -> Vec<HistoryEntry> {
        let registry = self.registry();
        registry
            .history
            .iter()
            .filter(|entry| event.is_none_or(|e| entry.event == e))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.registry().history.clear();
    }

    /// Slow dispatch passes still inside the retention window
    pub fn diagnostics(&self) -> Vec<SlowDispatch> {
        self.registry().diagnostics.snapshot()
    }

    pub fn stats(&self) -> BusStats {
        self.registry().stats.clone()
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Scoped view that prefixes every event with `prefix:`
    pub fn namespace(&self, prefix: impl Into<String>) -> Namespace {
        Namespace::new(self.clone(), prefix.into())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("EventBus")
            .field("events", &registry.listeners.len())
            .field("paused", &registry.paused)
            .field("stats", &registry.stats)
            .finish()
    }
}

/// Handle returned by `on`; removes exactly its own registration
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the listener; false if it was already gone or the bus dropped
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => EventBus { inner }.off(&self.event, Some(self.id)) > 0,
            None => false,
        }
    }
}

/// Wrap the callback per debounce/throttle options
fn pace(callback: ListenerFn, opts: &ListenOptions) -> (ListenerFn, Option<Pacer>) {
    if let Some(delay) = opts.debounce {
        let debouncer = Arc::new(Debouncer::new(delay));
        let pacer = Pacer::Debounce(debouncer.clone());
        let wrapped: ListenerFn = Arc::new(move |envelope: &Envelope| {
            let inner = callback.clone();
            let envelope = envelope.clone();
            debouncer.call(async move {
                match invoke(&inner, &envelope) {
                    Ok(Reply::Deferred(reply)) => {
                        if let Err(error) = reply.await {
                            warn!(event = %envelope.event, %error, "debounced listener failed");
                        }
                    }
                    Ok(Reply::Value(_)) => {}
                    Err(error) => warn!(event = %envelope.event, %error, "debounced listener failed"),
                }
            });
            Ok(Reply::none())
        });
        return (wrapped, Some(pacer));
    }

    if let Some(window) = opts.throttle {
        let throttler = Arc::new(Throttler::new(window));
        let pacer = Pacer::Throttle(throttler.clone());
        let wrapped: ListenerFn = Arc::new(move |envelope: &Envelope| {
            if throttler.try_acquire() {
                callback(envelope)
            } else {
                debug!(event = %envelope.event, "throttled listener call dropped");
                Ok(Reply::none())
            }
        });
        return (wrapped, Some(pacer));
    }

    (callback, None)
}

/// Call a listener, turning a panic into a rejection
fn invoke(callback: &ListenerFn, envelope: &Envelope) -> Result<Reply, ListenerError> {
    match catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
        Ok(reply) => reply,
        Err(panic) => Err(ListenerError::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn execute_listener(listener: &Listener, event: &str, data: &Value, timeout: Duration) -> ListenerResult {
    let envelope = listener.envelope(event, data);
    let cancel = envelope.cancel.clone();
    match invoke(&listener.callback, &envelope) {
        Ok(Reply::Value(value)) => ListenerResult::Fulfilled {
            listener: listener.id,
            value,
        },
        Ok(Reply::Deferred(reply)) => settle(listener.id, event, reply, cancel, timeout).await,
        Err(error) => {
            error!(event, listener = %listener.id, %error, "EventBus: listener failed");
            ListenerResult::Rejected {
                listener: listener.id,
                error,
            }
        }
    }
}

/// Wait for a deferred reply, at most `timeout`
///
/// The reply runs as its own task. On timeout the bus stops waiting and flips
/// the listener's cancel token; the task itself keeps running.
async fn settle(
    id: ListenerId,
    event: &str,
    reply: DeferredReply,
    cancel: CancelToken,
    timeout: Duration,
) -> ListenerResult {
    let task = tokio::spawn(reply);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => ListenerResult::Fulfilled { listener: id, value },
        Ok(Ok(Err(error))) => {
            error!(event, listener = %id, %error, "EventBus: deferred listener failed");
            ListenerResult::Rejected { listener: id, error }
        }
        Ok(Err(join)) => {
            error!(event, listener = %id, error = %join, "EventBus: deferred listener aborted");
            ListenerResult::Rejected {
                listener: id,
                error: ListenerError::Panicked(join.to_string()),
            }
        }
        Err(_) => {
            cancel.cancel();
            let timeout_ms = timeout.as_millis() as u64;
            warn!(event, listener = %id, timeout_ms, "EventBus: listener timed out, no longer waiting");
            ListenerResult::Rejected {
                listener: id,
                error: ListenerError::Timeout { timeout_ms },
            }
        }
    }
}

fn detach(runtime: Option<&tokio::runtime::Handle>, id: ListenerId, event: &str, reply: DeferredReply) -> ListenerResult {
    match runtime {
        Some(handle) => {
            let event = event.to_string();
            handle.spawn(async move {
                if let Err(error) = reply.await {
                    warn!(%event, listener = %id, %error, "detached listener reply failed");
                }
            });
            ListenerResult::Detached { listener: id }
        }
        None => {
            warn!(event, listener = %id, "EventBus::emit_sync: no runtime for deferred reply");
            ListenerResult::Rejected {
                listener: id,
                error: ListenerError::Failed("no async runtime available for deferred reply".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Envelope) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &str| -> Box<dyn Fn(&Envelope) + Send + Sync> {
            let sink = sink.clone();
            let name = name.to_string();
            Box::new(move |env: &Envelope| sink.lock().unwrap().push(format!("{}:{}", name, env.data)))
        };
        (log, make)
    }

    #[tokio::test]
    async fn test_priority_order_and_payload() {
        let bus = EventBus::with_defaults();
        let (log, make) = recorder();
        let h2 = make("H2");
        let h1 = make("H1");
        bus.on("x", move |e| h2(e), ListenOptions::default()).unwrap();
        bus.on("x", move |e| h1(e), ListenOptions::default().with_priority(10)).unwrap();

        let results = bus.emit("x", json!({"v": 1}), EmitOptions::default()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec![r#"H1:{"v":1}"#, r#"H2:{"v":1}"#]);
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let bus = EventBus::with_defaults();
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            let f = make(name);
            bus.on("tie", move |e| f(e), ListenOptions::default()).unwrap();
        }
        bus.emit_sync("tie", json!(0));
        assert_eq!(*log.lock().unwrap(), vec!["a:0", "b:0", "c:0"]);
    }

    #[tokio::test]
    async fn test_once_fires_exactly_once() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.once(
            "ping",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            ListenOptions::default(),
        )
        .unwrap();
        assert_eq!(bus.listener_count("ping"), 1);

        for _ in 0..3 {
            bus.emit("ping", Value::Null, EmitOptions::default()).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("ping"), 0);
        assert!(!bus.event_names().contains(&"ping".to_string()));
    }

    #[test]
    fn test_off_single_and_all() {
        let bus = EventBus::with_defaults();
        let a = bus.on("e", |_| (), ListenOptions::default()).unwrap();
        bus.on("e", |_| (), ListenOptions::default()).unwrap();
        bus.on("e", |_| (), ListenOptions::default()).unwrap();

        assert_eq!(bus.off("e", Some(a.id())), 1);
        assert_eq!(bus.listener_count("e"), 2);
        assert!(!a.unsubscribe());

        assert_eq!(bus.off("e", None), 2);
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn test_subscription_unsubscribe() {
        let bus = EventBus::with_defaults();
        let sub = bus.on("e", |_| (), ListenOptions::default()).unwrap();
        assert_eq!(sub.event(), "e");
        assert!(sub.unsubscribe());
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn test_empty_event_name_rejected() {
        let bus = EventBus::with_defaults();
        let err = bus.on("  ", |_| (), ListenOptions::default()).unwrap_err();
        assert!(matches!(err, BusError::Validation(_)));
    }

    #[test]
    fn test_off_context() {
        let bus = EventBus::with_defaults();
        bus.on("a", |_| (), ListenOptions::default().with_context("panel")).unwrap();
        bus.on("b", |_| (), ListenOptions::default().with_context("panel")).unwrap();
        bus.on("b", |_| (), ListenOptions::default()).unwrap();
        assert_eq!(bus.off_context("panel"), 2);
        assert_eq!(bus.listener_count("b"), 1);
    }

    #[tokio::test]
    async fn test_paused_bus_returns_none() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.on(
            "e",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            ListenOptions::default(),
        )
        .unwrap();

        bus.pause();
        assert!(bus.is_paused());
        assert!(bus.emit("e", Value::Null, EmitOptions::default()).await.is_none());
        assert!(bus.emit_sync("e", Value::Null).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(bus.history(None).is_empty());

        bus.resume();
        assert!(bus.emit("e", Value::Null, EmitOptions::default()).await.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().suppressed, 2);
    }

    #[test]
    fn test_middleware_transforms_and_failures_are_skipped() {
        let bus = EventBus::with_defaults();
        bus.use_middleware(|_, mut data| {
            data["stamped"] = json!(true);
            Ok(data)
        });
        bus.use_middleware(|_, _| Err(eyre::eyre!("broken middleware")));
        bus.use_middleware(|_, _| panic!("middleware panic"));

        let seen = Arc::new(Mutex::new(Value::Null));
        let s = seen.clone();
        bus.on("m", move |env| *s.lock().unwrap() = env.data.clone(), ListenOptions::default())
            .unwrap();

        bus.emit_sync("m", json!({"n": 1}));
        assert_eq!(*seen.lock().unwrap(), json!({"n": 1, "stamped": true}));
        assert_eq!(bus.stats().middleware_failures, 2);
        // history keeps the original payload
        assert_eq!(bus.history(Some("m"))[0].data, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_snapshot_ignores_listeners_added_during_dispatch() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_bus = bus.clone();
        let h = hits.clone();
        bus.on(
            "grow",
            move |_| {
                let h = h.clone();
                inner_bus
                    .on(
                        "grow",
                        move |_| {
                            h.fetch_add(1, Ordering::SeqCst);
                        },
                        ListenOptions::default(),
                    )
                    .map(|_| ())
            },
            ListenOptions::default(),
        )
        .unwrap();

        let results = bus.emit("grow", Value::Null, EmitOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count("grow"), 2);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_caught() {
        let bus = EventBus::with_defaults();
        bus.on("f", |_| Err::<(), _>("nope"), ListenOptions::default().with_priority(2))
            .unwrap();
        bus.on("f", |_| -> () { panic!("listener exploded") }, ListenOptions::default().with_priority(1))
            .unwrap();
        bus.on("f", |_| json!("ok"), ListenOptions::default()).unwrap();

        let results = bus.emit("f", Value::Null, EmitOptions::default()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].error(), Some(&ListenerError::Failed("nope".to_string())));
        assert!(matches!(results[1].error(), Some(ListenerError::Panicked(m)) if m.contains("exploded")));
        assert_eq!(results[2].value(), Some(&json!("ok")));
        assert_eq!(bus.stats().listener_failures, 2);
    }

    #[tokio::test]
    async fn test_stop_on_error_halts_sequential_dispatch() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on("s", |_| Err::<(), _>("first"), ListenOptions::default().with_priority(5))
            .unwrap();
        let h = hits.clone();
        bus.on(
            "s",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            ListenOptions::default(),
        )
        .unwrap();

        let results = bus
            .emit("s", Value::Null, EmitOptions::default().stop_on_error())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let results = bus.emit("s", Value::Null, EmitOptions::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_timeout_cancels_token_but_not_task() {
        let bus = EventBus::with_defaults();
        let finished = Arc::new(AtomicUsize::new(0));
        let saw_cancel = Arc::new(AtomicUsize::new(0));

        let f = finished.clone();
        let c = saw_cancel.clone();
        bus.on(
            "slow",
            move |env| {
                let f = f.clone();
                let c = c.clone();
                let cancel = env.cancel.clone();
                Reply::deferred(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    if cancel.is_cancelled() {
                        c.fetch_add(1, Ordering::SeqCst);
                    }
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("late"))
                })
            },
            ListenOptions::default(),
        )
        .unwrap();
        bus.on("slow", |_| Reply::deferred(async { Ok(json!("fast")) }), ListenOptions::default())
            .unwrap();

        let results = bus
            .emit(
                "slow",
                Value::Null,
                EmitOptions::parallel().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        assert_eq!(results[0].error(), Some(&ListenerError::Timeout { timeout_ms: 50 }));
        assert_eq!(results[1].value(), Some(&json!("fast")));
        assert_eq!(bus.stats().timeouts, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_dispatch_recorded() {
        let bus = EventBus::with_defaults();
        bus.on(
            "heavy",
            |_| {
                Reply::deferred(async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok(Value::Null)
                })
            },
            ListenOptions::default(),
        )
        .unwrap();

        bus.emit("heavy", Value::Null, EmitOptions::default()).await;
        let diagnostics = bus.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].event, "heavy");
        assert!(diagnostics[0].elapsed_ms >= 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_listener_via_bus() {
        let bus = EventBus::with_defaults();
        let last = Arc::new(Mutex::new(Value::Null));
        let l = last.clone();
        bus.on(
            "search",
            move |env| *l.lock().unwrap() = env.data.clone(),
            ListenOptions::default().debounced(Duration::from_millis(100)),
        )
        .unwrap();

        for q in ["r", "ru", "rus"] {
            bus.emit_sync("search", json!(q));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*last.lock().unwrap(), Value::Null);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*last.lock().unwrap(), json!("rus"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_disposes_pending_debounce() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus
            .on(
                "typing",
                move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                },
                ListenOptions::default().debounced(Duration::from_millis(50)),
            )
            .unwrap();

        bus.emit_sync("typing", Value::Null);
        sub.unsubscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_listener_via_bus() {
        let bus = EventBus::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.on(
            "scroll",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            ListenOptions::default().throttled(Duration::from_millis(100)),
        )
        .unwrap();

        for _ in 0..5 {
            bus.emit_sync("scroll", Value::Null);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        bus.emit_sync("scroll", Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = BusConfig {
            history_capacity: 3,
            ..BusConfig::default()
        };
        let bus = EventBus::new(config);
        for i in 0..5 {
            bus.emit_sync("tick", json!(i));
        }
        let history = bus.history(None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data, json!(2));
        assert_eq!(history[0].sequence, 2);
        bus.clear_history();
        assert!(bus.history(None).is_empty());
    }

    #[test]
    fn test_emit_sync_without_runtime_rejects_deferred() {
        let bus = EventBus::with_defaults();
        bus.on("d", |_| Reply::deferred(async { Ok(Value::Null) }), ListenOptions::default())
            .unwrap();
        let results = bus.emit_sync("d", Value::Null).unwrap();
        assert!(results[0].is_rejected());
    }

    #[tokio::test]
    async fn test_emit_sync_detaches_deferred() {
        let bus = EventBus::with_defaults();
        bus.on("d", |_| Reply::deferred(async { Ok(Value::Null) }), ListenOptions::default())
            .unwrap();
        let results = bus.emit_sync("d", Value::Null).unwrap();
        assert!(matches!(results[0], ListenerResult::Detached { .. }));
    }

    #[test]
    fn test_clear_removes_everything() {
        let bus = EventBus::with_defaults();
        bus.on("a", |_| (), ListenOptions::default()).unwrap();
        bus.on("b", |_| (), ListenOptions::default()).unwrap();
        bus.emit_sync("a", Value::Null);
        bus.clear();
        assert!(bus.event_names().is_empty());
        assert!(bus.history(None).is_empty());
    }

    proptest! {
        #[test]
        fn prop_dispatch_order_is_stable_descending_priority(priorities in proptest::collection::vec(-5i32..5, 1..20)) {
            let bus = EventBus::with_defaults();
            let order = Arc::new(Mutex::new(Vec::new()));
            for (index, priority) in priorities.iter().enumerate() {
                let order = order.clone();
                bus.on("p", move |_| order.lock().unwrap().push(index), ListenOptions::default().with_priority(*priority)).unwrap();
            }
            bus.emit_sync("p", Value::Null);

            let mut expected: Vec<usize> = (0..priorities.len()).collect();
            expected.sort_by(|a, b| priorities[*b].cmp(&priorities[*a]));
            prop_assert_eq!(order.lock().unwrap().clone(), expected);
        }
    }
}
