//! Router - single active route with lifecycle hooks
//!
//! A navigation runs: guards, the current route's `before_leave`, the
//! target's `before_enter`, the view swap, the switch of `current`, the old
//! route's `after_leave`, the target's `after_enter`, `after_each` hooks and
//! finally the `route:changed` event. Any hook error or panic aborts the
//! navigation and `navigate` returns false. `current` only moves at the view
//! swap, so a failure before it leaves the old route current while a failure
//! after it does not roll back.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eyre::{WrapErr, eyre};
use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::route::{Flow, GuardHook, NavigateOptions, Route, RouteHook, RouterError, Transition};
use crate::config::RouterConfig;
use crate::dom::{Document, Element};
use crate::events::{EmitOptions, EventBus, panic_message};

/// Emitted after a non-silent navigation: `{route, previousRoute}`
pub const ROUTE_CHANGED: &str = "route:changed";

/// Class marking the current tab and view
pub const ACTIVE_CLASS: &str = "active";
/// Transient class on a freshly revealed view
pub const ENTERING_CLASS: &str = "entering";

struct RouterState {
    routes: Vec<Route>,
    before_each: Vec<GuardHook>,
    after_each: Vec<RouteHook>,
    current: Option<String>,
    previous: Option<String>,
    transition_timer: Option<JoinHandle<()>>,
}

struct RouterInner {
    config: RouterConfig,
    document: Document,
    bus: EventBus,
    state: Mutex<RouterState>,
}

/// Cheaply cloneable handle to the application router
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router with its own bus
    pub fn new(config: RouterConfig, document: Document) -> Self {
        Self::with_bus(config, document, EventBus::with_defaults())
    }

    /// Create a router that announces navigations on `bus`
    pub fn with_bus(config: RouterConfig, document: Document, bus: EventBus) -> Self {
        debug!(default_route = %config.default_route, transition_ms = config.transition_ms, "Router::new");
        Self {
            inner: Arc::new(RouterInner {
                config,
                document,
                bus,
                state: Mutex::new(RouterState {
                    routes: Vec::new(),
                    before_each: Vec::new(),
                    after_each: Vec::new(),
                    current: None,
                    previous: None,
                    transition_timer: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a route; its view (and tab, if any) must already be in the document
    pub fn register(&self, route: Route) -> Result<(), RouterError> {
        if route.name.trim().is_empty() {
            return Err(RouterError::Invalid("route name must not be empty".to_string()));
        }
        for element in std::iter::once(&route.view_id).chain(route.tab_id.as_ref()) {
            if !self.inner.document.contains(element) {
                return Err(RouterError::MissingElement {
                    route: route.name.clone(),
                    element: element.clone(),
                });
            }
        }

        let mut state = self.state();
        if state.routes.iter().any(|r| r.name == route.name) {
            warn!(route = %route.name, "Router::register: duplicate route rejected");
            return Err(RouterError::Duplicate(route.name));
        }
        debug!(route = %route.name, view = %route.view_id, "Router::register");
        state.routes.push(route);
        Ok(())
    }

    /// Add a global guard; returning [`Flow::Cancel`] stops the navigation
    pub fn before_each(&self, guard: GuardHook) {
        self.state().before_each.push(guard);
    }

    /// Add a global hook run after every completed view switch
    pub fn after_each(&self, hook: RouteHook) {
        self.state().after_each.push(hook);
    }

    /// Navigate to a registered route
    ///
    /// Returns false for unknown routes, cancelled guards and failed hooks;
    /// true when the route was entered or was already current.
    pub async fn navigate(&self, name: &str, opts: NavigateOptions) -> bool {
        let (target, current, routes, guards, after_each) = {
            let state = self.state();
            let Some(target) = state.routes.iter().find(|r| r.name == name).cloned() else {
                warn!(route = name, "Router::navigate: unknown route");
                return false;
            };
            if state.current.as_deref() == Some(name) && !opts.force {
                debug!(route = name, "Router::navigate: already current");
                return true;
            }
            let current = state
                .current
                .as_ref()
                .and_then(|c| state.routes.iter().find(|r| &r.name == c))
                .cloned();
            (
                target,
                current,
                state.routes.clone(),
                state.before_each.clone(),
                state.after_each.clone(),
            )
        };
        debug!(route = name, from = ?current.as_ref().map(|r| &r.name), ?opts, "Router::navigate");

        match self.run(&target, current.as_ref(), &routes, &guards, &after_each, opts).await {
            Ok(Flow::Continue) => {
                info!(route = name, "Router: navigation complete");
                true
            }
            Ok(Flow::Cancel) => {
                info!(route = name, "Router: navigation cancelled by guard");
                false
            }
            Err(e) => {
                error!(route = name, error = %e, "Router: navigation aborted");
                false
            }
        }
    }

    async fn run(
        &self,
        target: &Route,
        current: Option<&Route>,
        routes: &[Route],
        guards: &[GuardHook],
        after_each: &[RouteHook],
        opts: NavigateOptions,
    ) -> eyre::Result<Flow> {
        let transition = Transition {
            from: current.map(|r| r.name.clone()),
            to: target.name.clone(),
        };

        for guard in guards {
            if call("before_each", || guard(transition.clone())).await? == Flow::Cancel {
                return Ok(Flow::Cancel);
            }
        }

        if let Some(current) = current {
            run_hook("before_leave", &current.before_leave, &transition).await?;
        }

        self.state().previous = transition.from.clone();

        run_hook("before_enter", &target.before_enter, &transition).await?;

        self.update_view(target, routes)?;

        self.state().current = Some(target.name.clone());
        if opts.replace {
            self.inner.document.replace_fragment(Some(&target.name));
        } else if !opts.silent {
            self.inner.document.push_state(&target.name);
        }

        if let Some(current) = current {
            run_hook("after_leave", &current.after_leave, &transition).await?;
        }

        run_hook("after_enter", &target.after_enter, &transition).await?;

        for hook in after_each {
            call("after_each", || hook(transition.clone())).await?;
        }

        if !opts.silent {
            let payload = json!({ "route": target.name, "previousRoute": transition.from });
            self.inner.bus.emit(ROUTE_CHANGED, payload, EmitOptions::default()).await;
        }
        Ok(Flow::Continue)
    }

    /// Hide every view, deactivate every tab, then reveal the target
    fn update_view(&self, target: &Route, routes: &[Route]) -> eyre::Result<()> {
        let document = &self.inner.document;
        for route in routes {
            if let Some(tab) = route.tab_id.as_deref().and_then(|id| document.get_element_by_id(id)) {
                tab.remove_class(ACTIVE_CLASS)?;
            }
            if let Some(view) = document.get_element_by_id(&route.view_id) {
                view.set_hidden(true)?;
                view.remove_class(ACTIVE_CLASS)?;
                view.remove_class(ENTERING_CLASS)?;
            }
        }

        if let Some(tab) = &target.tab_id {
            document.require(tab)?.add_class(ACTIVE_CLASS)?;
        }
        let view = document
            .require(&target.view_id)
            .wrap_err_with(|| format!("view for route {}", target.name))?;
        view.set_hidden(false)?;
        view.add_class(ACTIVE_CLASS)?;
        view.add_class(ENTERING_CLASS)?;
        document.set_title(&target.title);
        self.clear_entering_later(view);
        Ok(())
    }

    fn clear_entering_later(&self, view: Element) {
        let delay = self.inner.config.transition();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let _ = view.remove_class(ENTERING_CLASS);
            return;
        };
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = view.remove_class(ENTERING_CLASS);
        });
        if let Some(previous) = self.state().transition_timer.replace(task) {
            previous.abort();
        }
    }

    /// Enter the route named by the location fragment, else the default route
    pub async fn start(&self) -> bool {
        let initial = self.initial_route();
        info!(route = %initial, "Router::start");
        self.navigate(&initial, NavigateOptions::replace()).await
    }

    fn initial_route(&self) -> String {
        self.inner
            .document
            .fragment()
            .filter(|f| self.has_route(f))
            .unwrap_or_else(|| self.inner.config.default_route.clone())
    }

    /// Browser back/forward: follow the restored location silently
    pub async fn handle_popstate(&self) -> bool {
        let target = self.initial_route();
        debug!(route = %target, "Router::handle_popstate");
        self.navigate(&target, NavigateOptions::silent()).await
    }

    /// Location fragment edited directly: follow it silently
    pub async fn handle_hash_change(&self) -> bool {
        let Some(fragment) = self.inner.document.fragment() else {
            debug!("Router::handle_hash_change: no fragment");
            return false;
        };
        self.navigate(&fragment, NavigateOptions::silent()).await
    }

    /// Return to the previous route if it is still registered
    pub async fn go_back(&self) -> bool {
        let previous = {
            let state = self.state();
            state
                .previous
                .clone()
                .filter(|p| state.routes.iter().any(|r| &r.name == p))
        };
        match previous {
            Some(previous) => self.navigate(&previous, NavigateOptions::default()).await,
            None => {
                debug!("Router::go_back: no previous route");
                false
            }
        }
    }

    pub fn current(&self) -> Option<String> {
        self.state().current.clone()
    }

    pub fn previous(&self) -> Option<String> {
        self.state().previous.clone()
    }

    /// Registered route names in registration order
    pub fn routes(&self) -> Vec<String> {
        self.state().routes.iter().map(|r| r.name.clone()).collect()
    }

    pub fn route(&self, name: &str) -> Option<Route> {
        self.state().routes.iter().find(|r| r.name == name).cloned()
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.state().routes.iter().any(|r| r.name == name)
    }

    /// Bus carrying `route:changed`
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// Cancel the pending transition timer
    pub fn dispose(&self) {
        if let Some(task) = self.state().transition_timer.take() {
            task.abort();
        }
        debug!("Router::dispose");
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Router")
            .field("routes", &state.routes.len())
            .field("current", &state.current)
            .field("previous", &state.previous)
            .finish()
    }
}

async fn run_hook(phase: &'static str, hook: &Option<RouteHook>, transition: &Transition) -> eyre::Result<()> {
    match hook {
        Some(hook) => call(phase, || hook(transition.clone())).await,
        None => Ok(()),
    }
}

/// Invoke a hook, turning errors and panics into a phase-tagged report
async fn call<T, F, Fut>(phase: &'static str, f: F) -> eyre::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    match AssertUnwindSafe(async move { f().await }).catch_unwind().await {
        Ok(result) => result.wrap_err_with(|| format!("{} hook failed", phase)),
        Err(panic) => Err(eyre!("{} hook panicked: {}", phase, panic_message(panic.as_ref()))),
    }
}
