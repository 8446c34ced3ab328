//! Backend API facade
//!
//! The runtime never talks to the network itself. Panels receive an
//! [`ApiFacade`] through the application context and call resource-oriented
//! requests on it; the only thing the runtime inspects in a failure is the
//! optional numeric status.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Failed API call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP-like status when the backend answered
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Resource-oriented async backend
#[async_trait]
pub trait ApiFacade: Send + Sync {
    /// Fetch or mutate `resource`; `params` carries query or body fields
    async fn request(&self, resource: &str, params: Value) -> Result<Value, ApiError>;
}

/// In-memory backend answering from canned responses
///
/// Unknown resources fail with status 404.
#[derive(Debug, Default)]
pub struct FixtureApi {
    responses: HashMap<String, Result<Value, ApiError>>,
    latency: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FixtureApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, resource: &str, value: Value) -> Self {
        self.responses.insert(resource.to_string(), Ok(value));
        self
    }

    pub fn with_error(mut self, resource: &str, error: ApiError) -> Self {
        self.responses.insert(resource.to_string(), Err(error));
        self
    }

    /// Delay every answer, to exercise loading states
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Requests seen so far, oldest first
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self, resource: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(r, _)| r == resource)
            .count()
    }
}

#[async_trait]
impl ApiFacade for FixtureApi {
    async fn request(&self, resource: &str, params: Value) -> Result<Value, ApiError> {
        debug!(resource, "FixtureApi::request: called");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((resource.to_string(), params));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.responses
            .get(resource)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::with_status(404, format!("unknown resource: {}", resource))))
    }
}
