//! Component trait and the generic lifecycle driver
//!
//! A panel implements [`Component`]; [`ComponentHost`] owns it and runs the
//! lifecycle: init (before-init hook, render, bind, load, ready), state
//! updates with spinner and error banner, refresh and destroy. Every failure
//! inside a lifecycle step (error or panic) goes to one handler that logs it,
//! records it in local state, emits `component:error` and shows an inline
//! banner. Nothing is re-raised to the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use eyre::eyre;
use futures::FutureExt;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use super::cx::{Cx, LOADING_CLASS};
use super::errors::{ComponentError, describe_error};
use super::options::{ComponentOptions, Lifecycle};
use crate::context::AppContext;
use crate::dom::DomError;
use crate::events::panic_message;

/// Emitted when any lifecycle step fails: `{component, phase, message, error}`
pub const COMPONENT_ERROR: &str = "component:error";
/// Prefix of `component:ready:<type>`
pub const COMPONENT_READY_PREFIX: &str = "component:ready:";
/// Prefix of `component:destroyed:<type>`
pub const COMPONENT_DESTROYED_PREFIX: &str = "component:destroyed:";

/// A dashboard panel
///
/// Only `type_name` and `render` are required; every other step defaults to
/// doing nothing.
#[async_trait]
pub trait Component: Send + 'static {
    /// Stable type name used in event names and logs
    fn type_name(&self) -> &str;

    /// Build the component's markup inside `cx.container()`
    async fn render(&mut self, cx: &mut Cx) -> eyre::Result<()>;

    /// Attach listeners, normally through `cx.add_event_listener`
    async fn bind_events(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    /// Fetch data through `cx.api()`
    async fn load_data(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    /// Runs after the base spinner/banner handling for every state change
    fn on_state_change(&mut self, _cx: &mut Cx, _old: &Map<String, Value>, _new: &Map<String, Value>) {}

    /// Light re-render requested by `set_state(.., true)` and `refresh`
    fn update_view(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_before_init(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_ready(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_before_destroy(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_destroy(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
        Ok(())
    }
}

/// Owns one component and drives its lifecycle
pub struct ComponentHost<C: Component> {
    component: C,
    cx: Cx,
    phase: Lifecycle,
    name: String,
}

impl<C: Component> ComponentHost<C> {
    /// Mount `component` on an existing container element
    pub fn new(app: &AppContext, container_id: &str, component: C, options: ComponentOptions) -> Result<Self, ComponentError> {
        options.validate()?;
        let container = app
            .document
            .get_element_by_id(container_id)
            .ok_or_else(|| ComponentError::MissingContainer(container_id.to_string()))?;
        let name = component.type_name().to_string();
        debug!(component = %name, container = container_id, "ComponentHost::new");
        Ok(Self {
            cx: Cx::new(name.clone(), container, app.clone(), options),
            component,
            phase: Lifecycle::Constructed,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Lifecycle {
        self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.phase == Lifecycle::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.phase == Lifecycle::Destroyed
    }

    pub fn state(&self) -> &Map<String, Value> {
        self.cx.state()
    }

    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    pub fn component(&self) -> &C {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut C {
        &mut self.component
    }

    /// Run the init sequence; false when it failed or was refused
    pub async fn init(&mut self) -> bool {
        match self.phase {
            Lifecycle::Destroyed => {
                warn!(component = %self.name, "ComponentHost::init: destroyed components cannot be re-initialized");
                return false;
            }
            Lifecycle::Ready => {
                debug!(component = %self.name, "ComponentHost::init: already initialized");
                return true;
            }
            Lifecycle::Initializing => {
                warn!(component = %self.name, "ComponentHost::init: init already running");
                return false;
            }
            Lifecycle::Constructed | Lifecycle::Error => {}
        }

        debug!(component = %self.name, "ComponentHost::init: called");
        if self.phase == Lifecycle::Error {
            self.reset_after_error();
        }
        match self.run_init().await {
            Ok(()) => {
                info!(component = %self.name, "Component ready");
                true
            }
            Err((phase, e)) => {
                self.handle_error(phase, e);
                false
            }
        }
    }

    /// Undo a failed init so the next attempt starts from an empty container
    fn reset_after_error(&mut self) {
        let detached = self.cx.detach_all();
        let container = self.cx.container().clone();
        self.log_dom("clear container", container.clear());
        self.cx.set_state(json!({ "error": null, "loading": false }), false);
        self.flush_state();
        debug!(component = %self.name, detached, "ComponentHost::init: retrying after error");
    }

    async fn run_init(&mut self) -> Result<(), (&'static str, eyre::Report)> {
        let container = self.cx.container().clone();
        self.log_dom("add lifecycle classes", container.add_class("component"));
        self.log_dom(
            "add lifecycle classes",
            container.add_class(&format!("component-{}", self.name)),
        );
        self.set_phase(Lifecycle::Initializing);

        guarded(self.component.on_before_init(&mut self.cx))
            .await
            .map_err(|e| ("on_before_init", e))?;
        self.flush_state();

        guarded(self.component.render(&mut self.cx))
            .await
            .map_err(|e| ("render", e))?;
        self.flush_state();

        guarded(self.component.bind_events(&mut self.cx))
            .await
            .map_err(|e| ("bind_events", e))?;
        self.flush_state();

        if self.cx.options().auto_load {
            self.load().await.map_err(|e| ("load_data", e))?;
            self.flush_state();
        }

        self.cx.set_state(json!({ "initialized": true }), false);
        self.flush_state();
        self.set_phase(Lifecycle::Ready);

        self.cx.emit(
            &format!("{}{}", COMPONENT_READY_PREFIX, self.name),
            json!({ "component": self.name }),
        );
        guarded(self.component.on_ready(&mut self.cx))
            .await
            .map_err(|e| ("on_ready", e))?;
        self.flush_state();
        Ok(())
    }

    async fn load(&mut self) -> eyre::Result<()> {
        let timeout = self.cx.options().load_timeout;
        let load = guarded(self.component.load_data(&mut self.cx));
        match timeout {
            Some(limit) => tokio::time::timeout(limit, load)
                .await
                .map_err(|_| eyre!("load_data timed out after {}ms", limit.as_millis()))?,
            None => load.await,
        }
    }

    /// Shallow-merge `partial` into local state and run state-change hooks
    pub fn set_state(&mut self, partial: Value, render: bool) {
        if self.phase == Lifecycle::Destroyed {
            warn!(component = %self.name, "ComponentHost::set_state: component destroyed, ignored");
            return;
        }
        self.cx.set_state(partial, render);
        self.flush_state();
    }

    fn flush_state(&mut self) {
        while let Some(transition) = self.cx.take_transition() {
            self.component.on_state_change(&mut self.cx, &transition.old, &transition.new);
            if transition.render {
                if let Err(e) = self.component.update_view(&mut self.cx) {
                    self.handle_error("update_view", e);
                }
            }
        }
    }

    fn set_phase(&mut self, phase: Lifecycle) {
        let container = self.cx.container().clone();
        self.log_dom("update phase class", container.remove_class(self.phase.class()));
        if phase != Lifecycle::Destroyed {
            self.log_dom("update phase class", container.add_class(phase.class()));
        }
        debug!(component = %self.name, from = %self.phase, to = %phase, "ComponentHost: phase change");
        self.phase = phase;
    }

    fn log_dom(&self, op: &str, result: Result<(), DomError>) {
        if let Err(e) = result {
            warn!(component = %self.name, op, error = %e, "ComponentHost: DOM update failed");
        }
    }

    /// Shared failure path for every lifecycle step
    fn handle_error(&mut self, phase: &str, error: eyre::Report) {
        let detail = format!("{:#}", error);
        let message = describe_error(&error);
        error!(component = %self.name, phase, error = %detail, "Component error");

        self.set_phase(Lifecycle::Error);
        self.cx.set_state(json!({ "error": message, "loading": false }), false);
        self.flush_state();
        self.cx.emit(
            COMPONENT_ERROR,
            json!({
                "component": self.name,
                "phase": phase,
                "message": message,
                "error": detail,
            }),
        );
    }

    /// Reload data and re-render; false when refused or failed
    pub async fn refresh(&mut self) -> bool {
        if !self.phase.can_destroy() {
            warn!(component = %self.name, phase = %self.phase, "ComponentHost::refresh: component not initialized");
            return false;
        }
        debug!(component = %self.name, "ComponentHost::refresh: called");
        self.set_state(json!({ "loading": true }), false);

        if let Err(e) = self.load().await {
            self.handle_error("refresh", e);
            return false;
        }
        self.flush_state();
        if let Err(e) = self.component.update_view(&mut self.cx) {
            self.handle_error("update_view", e);
            return false;
        }

        self.set_state(json!({ "loading": false, "error": null }), false);
        if self.phase == Lifecycle::Error {
            self.set_phase(Lifecycle::Ready);
        }
        true
    }

    /// Tear the component down; a second call only warns
    pub async fn destroy(&mut self) -> bool {
        if self.phase == Lifecycle::Destroyed {
            warn!(component = %self.name, "ComponentHost::destroy: already destroyed");
            return false;
        }
        if !self.phase.can_destroy() {
            warn!(component = %self.name, phase = %self.phase, "ComponentHost::destroy: component not initialized");
            return false;
        }

        if let Err(e) = guarded(self.component.on_before_destroy(&mut self.cx)).await {
            error!(component = %self.name, error = %format!("{:#}", e), "ComponentHost::destroy: on_before_destroy failed");
        }

        let detached = self.cx.detach_all();
        let container = self.cx.container().clone();
        self.log_dom("clear container", container.clear());
        for class in [
            "component".to_string(),
            format!("component-{}", self.name),
            LOADING_CLASS.to_string(),
            self.phase.class().to_string(),
        ] {
            self.log_dom("remove lifecycle classes", container.remove_class(&class));
        }
        self.cx.clear_state();
        self.phase = Lifecycle::Destroyed;

        self.cx.emit(
            &format!("{}{}", COMPONENT_DESTROYED_PREFIX, self.name),
            json!({ "component": self.name }),
        );
        if let Err(e) = guarded(self.component.on_destroy(&mut self.cx)).await {
            error!(component = %self.name, error = %format!("{:#}", e), "ComponentHost::destroy: on_destroy failed");
        }
        info!(component = %self.name, detached, "Component destroyed");
        true
    }
}

impl<C: Component> std::fmt::Debug for ComponentHost<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHost")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("cx", &self.cx)
            .finish()
    }
}

/// Await a lifecycle step, turning a panic into an error
async fn guarded<F>(step: F) -> eyre::Result<()>
where
    F: Future<Output = eyre::Result<()>>,
{
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(eyre!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, FixtureApi};
    use crate::component::cx::NOTIFICATION_SHOW;
    use crate::component::errors::{MSG_FORBIDDEN, MSG_GENERIC, MSG_TIMEOUT};
    use crate::component::options::NotificationLevel;
    use crate::config::Config;
    use crate::dom::Document;
    use crate::events::ListenOptions;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail_in: Option<&'static str>,
        panic_in: Option<&'static str>,
        resource: Option<&'static str>,
    }

    impl Recorder {
        fn step(&self, name: &str) -> eyre::Result<()> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.panic_in == Some(name) {
                panic!("{} exploded", name);
            }
            if self.fail_in == Some(name) {
                eyre::bail!("{} failed", name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Component for Recorder {
        fn type_name(&self) -> &str {
            "recorder"
        }

        async fn render(&mut self, cx: &mut Cx) -> eyre::Result<()> {
            self.step("render")?;
            cx.container().set_html("<ul class=\"players\"></ul>")?;
            let refresh_id = format!("{}-refresh", cx.container().id());
            cx.container().append(&refresh_id, "button")?;
            Ok(())
        }

        async fn bind_events(&mut self, cx: &mut Cx) -> eyre::Result<()> {
            self.step("bind_events")?;
            let toolbar = cx.app().document.require("toolbar")?;
            let calls = self.calls.clone();
            cx.add_event_listener(&toolbar, "click", move |_| calls.lock().unwrap().push("click".to_string()))?;
            cx.listen("theme:changed", |_| ())?;
            Ok(())
        }

        async fn load_data(&mut self, cx: &mut Cx) -> eyre::Result<()> {
            self.step("load_data")?;
            if let Some(resource) = self.resource {
                let players = cx.api().request(resource, Value::Null).await?;
                cx.set_state(json!({ "players": players }), true);
            }
            Ok(())
        }

        fn on_state_change(&mut self, _cx: &mut Cx, _old: &Map<String, Value>, _new: &Map<String, Value>) {
            self.calls.lock().unwrap().push("on_state_change".to_string());
        }

        fn update_view(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            self.step("update_view")
        }

        async fn on_before_init(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            self.step("on_before_init")
        }

        async fn on_ready(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            self.step("on_ready")
        }

        async fn on_before_destroy(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            self.step("on_before_destroy")
        }

        async fn on_destroy(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            self.step("on_destroy")
        }
    }

    fn app_with(api: FixtureApi) -> AppContext {
        let document = Document::new();
        document.create_element("panel", "div").unwrap();
        document.create_element("toolbar", "nav").unwrap();
        AppContext::new(Config::default(), document, Arc::new(api))
    }

    fn bus_log(app: &AppContext, event: &str) -> Arc<Mutex<Vec<Value>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        app.bus
            .on(event, move |env| sink.lock().unwrap().push(env.data.clone()), ListenOptions::default())
            .unwrap();
        log
    }

    fn host(app: &AppContext, recorder: Recorder) -> ComponentHost<Recorder> {
        ComponentHost::new(app, "panel", recorder, ComponentOptions::default()).unwrap()
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let app = app_with(FixtureApi::new());
        let err = ComponentHost::new(&app, "nowhere", Recorder::default(), ComponentOptions::default()).unwrap_err();
        assert_eq!(err, ComponentError::MissingContainer("nowhere".to_string()));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let app = app_with(FixtureApi::new());
        let options = ComponentOptions::default().with_load_timeout(Duration::ZERO);
        let err = ComponentHost::new(&app, "panel", Recorder::default(), options).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_init_runs_steps_in_order() {
        let app = app_with(FixtureApi::new());
        let ready = bus_log(&app, "component:ready:recorder");
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);

        assert!(host.init().await);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["on_before_init", "render", "bind_events", "load_data", "on_state_change", "on_ready"]
        );
        assert_eq!(host.phase(), Lifecycle::Ready);
        assert_eq!(host.state().get("initialized"), Some(&json!(true)));
        assert_eq!(ready.lock().unwrap().len(), 1);

        let classes = app.document.require("panel").unwrap().classes();
        assert!(classes.contains(&"component".to_string()));
        assert!(classes.contains(&"component-recorder".to_string()));
        assert!(classes.contains(&"is-ready".to_string()));

        assert!(host.init().await);
        assert_eq!(calls.lock().unwrap().iter().filter(|c| *c == "render").count(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_goes_to_error_handler() {
        let app = app_with(FixtureApi::new());
        let errors = bus_log(&app, COMPONENT_ERROR);
        let recorder = Recorder {
            fail_in: Some("render"),
            ..Recorder::default()
        };
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);

        assert!(!host.init().await);
        assert_eq!(host.phase(), Lifecycle::Error);
        assert_eq!(host.state().get("error"), Some(&json!(MSG_GENERIC)));
        assert_eq!(host.state().get("loading"), Some(&json!(false)));
        assert!(!calls.lock().unwrap().contains(&"bind_events".to_string()));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["phase"], json!("render"));
        assert_eq!(errors[0]["component"], json!("recorder"));

        let banner = app.document.require("panel__error").unwrap();
        assert_eq!(banner.html(), MSG_GENERIC);
        assert!(app.document.contains("panel__error-dismiss"));
    }

    #[tokio::test]
    async fn test_api_failure_maps_to_message() {
        let api = FixtureApi::new().with_error("players", ApiError::with_status(403, "forbidden"));
        let app = app_with(api);
        let recorder = Recorder {
            resource: Some("players"),
            ..Recorder::default()
        };
        let mut host = host(&app, recorder);

        assert!(!host.init().await);
        assert_eq!(host.state().get("error"), Some(&json!(MSG_FORBIDDEN)));
    }

    #[tokio::test]
    async fn test_panic_in_step_is_contained() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder {
            panic_in: Some("bind_events"),
            ..Recorder::default()
        };
        let mut host = host(&app, recorder);
        assert!(!host.init().await);
        assert_eq!(host.phase(), Lifecycle::Error);
    }

    #[tokio::test]
    async fn test_auto_load_disabled() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let mut host =
            ComponentHost::new(&app, "panel", recorder, ComponentOptions::default().without_auto_load()).unwrap();
        assert!(host.init().await);
        assert!(!calls.lock().unwrap().contains(&"load_data".to_string()));
    }

    #[tokio::test]
    async fn test_loaded_data_renders_view() {
        let api = FixtureApi::new().with_response("players", json!([{"name": "ann"}]));
        let app = app_with(api);
        let recorder = Recorder {
            resource: Some("players"),
            ..Recorder::default()
        };
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);

        assert!(host.init().await);
        assert_eq!(host.state().get("players"), Some(&json!([{"name": "ann"}])));
        assert!(calls.lock().unwrap().contains(&"update_view".to_string()));
    }

    #[tokio::test]
    async fn test_set_state_merges_and_toggles_spinner() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);
        host.init().await;
        calls.lock().unwrap().clear();

        host.set_state(json!({ "loading": true, "page": 2 }), false);
        assert!(app.document.contains("panel__spinner"));
        assert!(app.document.require("panel").unwrap().has_class("is-loading"));
        assert_eq!(host.state().get("page"), Some(&json!(2)));
        assert_eq!(host.state().get("initialized"), Some(&json!(true)));

        host.set_state(json!({ "loading": false }), true);
        assert!(!app.document.contains("panel__spinner"));
        assert_eq!(*calls.lock().unwrap(), vec!["on_state_change", "on_state_change", "update_view"]);
    }

    #[tokio::test]
    async fn test_destroy_detaches_tracked_listeners() {
        let app = app_with(FixtureApi::new());
        let destroyed = bus_log(&app, "component:destroyed:recorder");
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);
        host.init().await;

        let toolbar = app.document.require("toolbar").unwrap();
        assert_eq!(toolbar.listener_count(), 1);
        assert_eq!(app.bus.listener_count("theme:changed"), 1);
        toolbar.dispatch("click", Value::Null);

        assert!(host.destroy().await);
        assert_eq!(toolbar.listener_count(), 0);
        assert_eq!(app.bus.listener_count("theme:changed"), 0);
        assert_eq!(host.cx().tracked_listeners(), 0);

        let panel = app.document.require("panel").unwrap();
        assert!(panel.html().is_empty());
        assert!(panel.children().is_empty());
        assert!(panel.classes().is_empty());
        assert!(host.state().is_empty());
        assert!(host.is_destroyed());
        assert_eq!(destroyed.lock().unwrap().len(), 1);

        let calls = calls.lock().unwrap();
        let tail: Vec<&str> = calls.iter().rev().take(2).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["on_before_destroy", "on_destroy"]);
        assert!(calls.contains(&"click".to_string()));
    }

    #[tokio::test]
    async fn test_destroy_twice_warns_and_init_is_refused() {
        let app = app_with(FixtureApi::new());
        let mut host = host(&app, Recorder::default());
        host.init().await;

        assert!(host.destroy().await);
        assert!(!host.destroy().await);
        assert!(!host.init().await);
        assert_eq!(host.phase(), Lifecycle::Destroyed);
    }

    #[tokio::test]
    async fn test_destroy_before_init_refused() {
        let app = app_with(FixtureApi::new());
        let mut host = host(&app, Recorder::default());
        assert!(!host.destroy().await);
        assert_eq!(host.phase(), Lifecycle::Constructed);
    }

    #[tokio::test]
    async fn test_dismissed_banner_does_not_break_destroy() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder {
            fail_in: Some("load_data"),
            ..Recorder::default()
        };
        let mut host = host(&app, recorder);
        assert!(!host.init().await);

        let dismiss = app.document.require("panel__error-dismiss").unwrap();
        dismiss.dispatch("click", Value::Null);
        assert!(!app.document.contains("panel__error"));

        assert!(host.destroy().await);
    }

    #[tokio::test]
    async fn test_reinit_after_error_binds_listeners_once() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder {
            fail_in: Some("load_data"),
            ..Recorder::default()
        };
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);
        assert!(!host.init().await);
        assert!(app.document.contains("panel__error"));

        host.component_mut().fail_in = None;
        assert!(host.init().await);
        assert_eq!(host.phase(), Lifecycle::Ready);
        assert!(!app.document.contains("panel__error"));
        assert_eq!(host.cx().tracked_listeners(), 2);

        let toolbar = app.document.require("toolbar").unwrap();
        assert_eq!(toolbar.listener_count(), 1);
        toolbar.dispatch("click", Value::Null);
        assert_eq!(calls.lock().unwrap().iter().filter(|c| *c == "click").count(), 1);
        assert_eq!(app.bus.listener_count("theme:changed"), 1);
    }

    struct SlowLoader;

    #[async_trait]
    impl Component for SlowLoader {
        fn type_name(&self) -> &str {
            "slow-loader"
        }

        async fn render(&mut self, _cx: &mut Cx) -> eyre::Result<()> {
            Ok(())
        }

        async fn load_data(&mut self, cx: &mut Cx) -> eyre::Result<()> {
            cx.set_state(json!({ "loading": true }), false);
            tokio::time::sleep(Duration::from_millis(100)).await;
            cx.set_state(json!({ "loading": false, "rows": 3 }), true);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spinner_visible_while_load_data_pending() {
        let app = app_with(FixtureApi::new());
        let panel = app.document.require("panel").unwrap();
        let mut host = ComponentHost::new(&app, "panel", SlowLoader, ComponentOptions::default()).unwrap();

        let (ready, during) = tokio::join!(host.init(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            (panel.has_class("is-loading"), app.document.contains("panel__spinner"))
        });

        assert!(ready);
        assert_eq!(during, (true, true));
        assert!(!panel.has_class("is-loading"));
        assert!(!app.document.contains("panel__spinner"));
    }

    #[tokio::test]
    async fn test_refresh_reloads_and_recovers() {
        let app = app_with(FixtureApi::new());
        let recorder = Recorder {
            fail_in: Some("render"),
            ..Recorder::default()
        };
        let calls = recorder.calls.clone();
        let mut host = host(&app, recorder);
        assert!(!host.init().await);

        host.component_mut().fail_in = None;
        assert!(host.refresh().await);
        assert_eq!(host.phase(), Lifecycle::Ready);
        assert_eq!(host.state().get("loading"), Some(&json!(false)));
        assert_eq!(host.state().get("error"), Some(&Value::Null));
        assert!(!app.document.contains("panel__error"));
        assert!(!app.document.contains("panel__spinner"));

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"load_data".to_string()));
        assert!(calls.contains(&"update_view".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout() {
        let api = FixtureApi::new()
            .with_response("players", json!([]))
            .with_latency(Duration::from_secs(5));
        let app = app_with(api);
        let recorder = Recorder {
            resource: Some("players"),
            ..Recorder::default()
        };
        let options = ComponentOptions::default().with_load_timeout(Duration::from_millis(100));
        let mut host = ComponentHost::new(&app, "panel", recorder, options).unwrap();

        assert!(!host.init().await);
        assert_eq!(host.state().get("error"), Some(&json!(MSG_TIMEOUT)));
    }

    #[tokio::test]
    async fn test_notify_emits_notification() {
        let app = app_with(FixtureApi::new());
        let toasts = bus_log(&app, NOTIFICATION_SHOW);
        let host = host(&app, Recorder::default());

        host.cx().notify("Saved", NotificationLevel::Success);
        assert_eq!(
            *toasts.lock().unwrap(),
            vec![json!({"message": "Saved", "level": "success", "source": "recorder"})]
        );
    }
}
