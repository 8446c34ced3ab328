//! Prefix-scoped view over an [`EventBus`]

use serde_json::Value;

use super::bus::{EventBus, Subscription};
use super::types::{BusError, EmitOptions, Envelope, IntoReply, ListenOptions, ListenerId, ListenerResult};

/// Every event passed through a namespace is rewritten to `prefix:event`
#[derive(Debug, Clone)]
pub struct Namespace {
    bus: EventBus,
    prefix: String,
}

impl Namespace {
    pub(crate) fn new(bus: EventBus, prefix: String) -> Self {
        Self { bus, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully qualified name for `event`
    pub fn qualify(&self, event: &str) -> String {
        format!("{}:{}", self.prefix, event)
    }

    pub fn on<F, R>(&self, event: &str, callback: F, opts: ListenOptions) -> Result<Subscription, BusError>
    where
        F: Fn(&Envelope) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.bus.on(&self.qualify(event), callback, opts)
    }

    pub fn once<F, R>(&self, event: &str, callback: F, opts: ListenOptions) -> Result<Subscription, BusError>
    where
        F: Fn(&Envelope) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.bus.once(&self.qualify(event), callback, opts)
    }

    pub fn off(&self, event: &str, listener: Option<ListenerId>) -> usize {
        self.bus.off(&self.qualify(event), listener)
    }

    pub async fn emit(&self, event: &str, data: Value, opts: EmitOptions) -> Option<Vec<ListenerResult>> {
        self.bus.emit(&self.qualify(event), data, opts).await
    }

    pub fn emit_sync(&self, event: &str, data: Value) -> Option<Vec<ListenerResult>> {
        self.bus.emit_sync(&self.qualify(event), data)
    }

    /// Remove every listener registered under this prefix
    pub fn clear(&self) -> usize {
        self.bus.clear_namespace(&self.prefix)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.bus.listener_count(&self.qualify(event))
    }
}
