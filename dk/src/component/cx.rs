//! Per-component context handed to every lifecycle method

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::options::{ComponentOptions, NotificationLevel};
use crate::api::ApiFacade;
use crate::context::AppContext;
use crate::dom::{DomError, DomEvent, DomListenerId, Element};
use crate::events::{BusError, Envelope, IntoReply, ListenOptions, ListenerResult, Subscription};

/// Emitted by [`Cx::notify`]: `{message, level, source}`
pub const NOTIFICATION_SHOW: &str = "notification:show";

pub(crate) const LOADING_CLASS: &str = "is-loading";
const SPINNER_CLASS: &str = "spinner";
const BANNER_CLASS: &str = "error-banner";
const DISMISS_CLASS: &str = "error-dismiss";

/// Local state transition waiting for the host to run state-change hooks
#[derive(Debug, Clone)]
pub(crate) struct StateTransition {
    pub old: Map<String, Value>,
    pub new: Map<String, Value>,
    pub render: bool,
}

struct TrackedListener {
    element: Element,
    id: DomListenerId,
    kind: String,
}

/// The component's view of the application plus its own local state
pub struct Cx {
    name: String,
    container: Element,
    app: AppContext,
    options: ComponentOptions,
    state: Map<String, Value>,
    pending: VecDeque<StateTransition>,
    listeners: Vec<TrackedListener>,
    subscriptions: Vec<Subscription>,
}

impl Cx {
    pub(crate) fn new(name: String, container: Element, app: AppContext, options: ComponentOptions) -> Self {
        let state = options.initial_state.clone();
        Self {
            name,
            container,
            app,
            options,
            state,
            pending: VecDeque::new(),
            listeners: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Component type name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> &Element {
        &self.container
    }

    pub fn app(&self) -> &AppContext {
        &self.app
    }

    pub fn api(&self) -> &Arc<dyn ApiFacade> {
        &self.app.api
    }

    pub fn options(&self) -> &ComponentOptions {
        &self.options
    }

    /// Local component state
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Shallow-merge `partial` into local state
    ///
    /// The spinner and error banner follow `loading` and `error` at once.
    /// The component's own state-change hook runs when the current lifecycle
    /// step returns, or immediately when called through the host. `render`
    /// additionally asks for the light `update_view` pass.
    pub fn set_state(&mut self, partial: Value, render: bool) {
        let Value::Object(partial) = partial else {
            warn!(component = %self.name, "Cx::set_state: partial state must be an object, ignored");
            return;
        };
        let old = self.state.clone();
        self.state.extend(partial);
        self.pending.push_back(StateTransition {
            old,
            new: self.state.clone(),
            render,
        });
        self.render_status();
    }

    /// Spinner from `loading`, banner from `error`
    fn render_status(&mut self) {
        if self.options.show_loading {
            let loading = self.state.get("loading").and_then(Value::as_bool).unwrap_or(false);
            let result = self.toggle_spinner(loading);
            self.log_dom("toggle spinner", result);
        }
        let error = self.state.get("error").and_then(Value::as_str).map(str::to_string);
        let result = match error {
            Some(message) => self.show_error_banner(&message),
            None => {
                self.app.document.remove(&self.banner_id());
                Ok(())
            }
        };
        self.log_dom("update error banner", result);
    }

    fn spinner_id(&self) -> String {
        format!("{}__spinner", self.container.id())
    }

    fn banner_id(&self) -> String {
        format!("{}__error", self.container.id())
    }

    fn toggle_spinner(&self, loading: bool) -> Result<(), DomError> {
        let spinner_id = self.spinner_id();
        self.container.toggle_class(LOADING_CLASS, loading)?;
        if loading && !self.app.document.contains(&spinner_id) {
            self.container.append(&spinner_id, "div")?.add_class(SPINNER_CLASS)?;
        } else if !loading {
            self.app.document.remove(&spinner_id);
        }
        Ok(())
    }

    fn show_error_banner(&mut self, message: &str) -> Result<(), DomError> {
        let banner_id = self.banner_id();
        if let Some(banner) = self.app.document.get_element_by_id(&banner_id) {
            return banner.set_html(message);
        }

        let banner = self.container.append(&banner_id, "div")?;
        banner.add_class(BANNER_CLASS)?;
        banner.set_attribute("role", "alert")?;
        banner.set_html(message)?;

        if self.options.dismissible_errors {
            let dismiss = banner.append(&format!("{}-dismiss", banner_id), "button")?;
            dismiss.add_class(DISMISS_CLASS)?;
            let document = self.app.document.clone();
            self.add_event_listener(&dismiss, "click", move |_| {
                document.remove(&banner_id);
            })?;
        }
        Ok(())
    }

    fn log_dom(&self, op: &str, result: Result<(), DomError>) {
        if let Err(e) = result {
            warn!(component = %self.name, op, error = %e, "Cx: DOM update failed");
        }
    }

    pub(crate) fn take_transition(&mut self) -> Option<StateTransition> {
        self.pending.pop_front()
    }

    pub(crate) fn clear_state(&mut self) {
        self.state.clear();
        self.pending.clear();
    }

    /// Attach a DOM listener that is detached automatically on destroy
    pub fn add_event_listener<F>(&mut self, element: &Element, kind: &str, handler: F) -> Result<DomListenerId, DomError>
    where
        F: Fn(&DomEvent) + Send + Sync + 'static,
    {
        let id = element.add_listener(kind, handler)?;
        self.listeners.push(TrackedListener {
            element: element.clone(),
            id,
            kind: kind.to_string(),
        });
        debug!(component = %self.name, element = element.id(), kind, "Cx::add_event_listener");
        Ok(id)
    }

    /// Subscribe to a bus event for the component's lifetime
    pub fn listen<F, R>(&mut self, event: &str, callback: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Envelope) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let subscription = self.app.bus.on(
            event,
            callback,
            ListenOptions::default().with_context(self.name.clone()),
        )?;
        self.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    /// Number of DOM listeners and bus subscriptions still tracked
    pub fn tracked_listeners(&self) -> usize {
        self.listeners.len() + self.subscriptions.len()
    }

    /// Detach everything tracked; removals that fail are logged and skipped
    pub(crate) fn detach_all(&mut self) -> usize {
        let mut detached = 0;
        for listener in self.listeners.drain(..) {
            match listener.element.remove_listener(listener.id) {
                Ok(()) => detached += 1,
                Err(e) => debug!(
                    component = %self.name,
                    kind = %listener.kind,
                    error = %e,
                    "Cx::detach_all: listener already gone"
                ),
            }
        }
        for subscription in self.subscriptions.drain(..) {
            if subscription.unsubscribe() {
                detached += 1;
            }
        }
        detached
    }

    /// Emit on the application bus without waiting for deferred replies
    pub fn emit(&self, event: &str, data: Value) -> Option<Vec<ListenerResult>> {
        self.app.bus.emit_sync(event, data)
    }

    /// Ask the notification panel to show a toast
    pub fn notify(&self, message: impl Into<String>, level: NotificationLevel) {
        let payload = json!({
            "message": message.into(),
            "level": level,
            "source": self.name,
        });
        self.emit(NOTIFICATION_SHOW, payload);
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx")
            .field("name", &self.name)
            .field("container", &self.container.id())
            .field("state", &self.state)
            .field("tracked_listeners", &self.tracked_listeners())
            .finish()
    }
}
