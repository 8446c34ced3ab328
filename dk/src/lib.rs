//! Dashkit - reactive application runtime for the admin dashboard
//!
//! The runtime is four cooperating services plus the glue that wires them:
//!
//! - [`events`] - pub/sub event bus with priorities, pacing, middleware and history
//! - [`state`] - reactive key/value store with watchers, computed keys and persistence
//! - [`router`] - hash router with guards and per-route hooks
//! - [`component`] - component trait and lifecycle host
//! - [`context`] - the per-session [`context::AppContext`]
//! - [`dom`] and [`api`] - headless document model and API facade
//! - [`config`] - configuration types and loading
//! - [`cli`] and [`demo`] - command-line interface and scripted session

pub mod api;
pub mod cli;
pub mod component;
pub mod config;
pub mod context;
pub mod demo;
pub mod dom;
pub mod events;
pub mod router;
pub mod state;
