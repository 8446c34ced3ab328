//! Hash-based router
//!
//! Exactly one registered route is current once the router has started.
//! Navigation runs global guards and per-route hooks around the view swap
//! and announces `route:changed` on its bus.

mod navigator;
mod route;

pub use navigator::{ACTIVE_CLASS, ENTERING_CLASS, ROUTE_CHANGED, Router};
pub use route::{Flow, GuardHook, NavigateOptions, Route, RouteHook, RouterError, Transition, guard, hook};
