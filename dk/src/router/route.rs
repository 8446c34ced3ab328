//! Route descriptors and navigation hooks

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

/// Errors from route registration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("Route already registered: {0}")]
    Duplicate(String),

    #[error("Route {route} references missing element: {element}")]
    MissingElement { route: String, element: String },

    #[error("Invalid route: {0}")]
    Invalid(String),
}

/// What a hook sees about the navigation in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Option<String>,
    pub to: String,
}

/// Verdict of a `before_each` guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancel,
}

/// Per-route or `after_each` hook
pub type RouteHook = Arc<dyn Fn(Transition) -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>;

/// Global guard run before every navigation
pub type GuardHook = Arc<dyn Fn(Transition) -> BoxFuture<'static, eyre::Result<Flow>> + Send + Sync>;

/// Box an async closure as a [`RouteHook`]
pub fn hook<F, Fut>(f: F) -> RouteHook
where
    F: Fn(Transition) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(move |t: Transition| -> BoxFuture<'static, eyre::Result<()>> { Box::pin(f(t)) })
}

/// Box an async closure as a [`GuardHook`]
pub fn guard<F, Fut>(f: F) -> GuardHook
where
    F: Fn(Transition) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<Flow>> + Send + 'static,
{
    Arc::new(move |t: Transition| -> BoxFuture<'static, eyre::Result<Flow>> { Box::pin(f(t)) })
}

/// One navigable view
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub title: String,
    /// Element revealed while the route is current
    pub view_id: String,
    /// Optional tab indicator marked active while the route is current
    pub tab_id: Option<String>,
    pub(crate) before_enter: Option<RouteHook>,
    pub(crate) after_enter: Option<RouteHook>,
    pub(crate) before_leave: Option<RouteHook>,
    pub(crate) after_leave: Option<RouteHook>,
}

impl Route {
    pub fn new(name: impl Into<String>, title: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            view_id: view_id.into(),
            tab_id: None,
            before_enter: None,
            after_enter: None,
            before_leave: None,
            after_leave: None,
        }
    }

    pub fn with_tab(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }

    /// Runs before the view is shown; the place to load data
    pub fn before_enter(mut self, hook: RouteHook) -> Self {
        self.before_enter = Some(hook);
        self
    }

    pub fn after_enter(mut self, hook: RouteHook) -> Self {
        self.after_enter = Some(hook);
        self
    }

    pub fn before_leave(mut self, hook: RouteHook) -> Self {
        self.before_leave = Some(hook);
        self
    }

    pub fn after_leave(mut self, hook: RouteHook) -> Self {
        self.after_leave = Some(hook);
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("title", &self.title)
            .field("view_id", &self.view_id)
            .field("tab_id", &self.tab_id)
            .finish_non_exhaustive()
    }
}

/// Options for `navigate`
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    /// Re-run the navigation even if the route is already current
    pub force: bool,
    /// Skip the history entry and the `route:changed` event
    pub silent: bool,
    /// Replace the location instead of pushing a history entry
    pub replace: bool,
}

impl NavigateOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn replace() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }
}
