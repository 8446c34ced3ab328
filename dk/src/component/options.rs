//! Component options and lifecycle phases

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::ComponentError;
use crate::config::ComponentsConfig;

/// Where a component is in its lifecycle
///
/// `Constructed → Initializing → Ready`; `Error` is reachable from any step;
/// `Destroyed` only from `Ready` or `Error` and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Constructed,
    Initializing,
    Ready,
    Error,
    Destroyed,
}

impl Lifecycle {
    /// Container class marking this phase
    pub fn class(&self) -> &'static str {
        match self {
            Self::Constructed => "is-constructed",
            Self::Initializing => "is-initializing",
            Self::Ready => "is-ready",
            Self::Error => "has-error",
            Self::Destroyed => "is-destroyed",
        }
    }

    pub fn can_destroy(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Constructed => "constructed",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

/// Per-component settings, validated at construction
#[derive(Debug, Clone)]
pub struct ComponentOptions {
    /// Run `load_data` during `init`
    pub auto_load: bool,
    /// Show a spinner while `loading` is true
    pub show_loading: bool,
    /// Error banners get a dismiss control
    pub dismissible_errors: bool,
    /// Upper bound for one `load_data` call
    pub load_timeout: Option<Duration>,
    /// Seed for the component's local state
    pub initial_state: Map<String, Value>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self::from_config(&ComponentsConfig::default())
    }
}

impl ComponentOptions {
    pub fn from_config(config: &ComponentsConfig) -> Self {
        Self {
            auto_load: config.auto_load,
            show_loading: config.show_loading,
            dismissible_errors: config.dismissible_errors,
            load_timeout: None,
            initial_state: Map::new(),
        }
    }

    pub fn without_auto_load(mut self) -> Self {
        self.auto_load = false;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    pub fn with_initial_state(mut self, state: Map<String, Value>) -> Self {
        self.initial_state = state;
        self
    }

    pub fn validate(&self) -> Result<(), ComponentError> {
        if self.load_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ComponentError::InvalidOptions("load_timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Severity of a `notification:show` toast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_config() {
        let config = ComponentsConfig {
            auto_load: false,
            ..ComponentsConfig::default()
        };
        let options = ComponentOptions::from_config(&config);
        assert!(!options.auto_load);
        assert!(options.show_loading);
    }

    #[test]
    fn test_zero_load_timeout_rejected() {
        let options = ComponentOptions::default().with_load_timeout(Duration::ZERO);
        assert!(matches!(options.validate(), Err(ComponentError::InvalidOptions(_))));
        assert!(ComponentOptions::default().validate().is_ok());
    }

    #[test]
    fn test_lifecycle_destroy_rules() {
        assert!(Lifecycle::Ready.can_destroy());
        assert!(Lifecycle::Error.can_destroy());
        assert!(!Lifecycle::Constructed.can_destroy());
        assert!(!Lifecycle::Destroyed.can_destroy());
        assert_eq!(Lifecycle::Ready.to_string(), "ready");
    }
}
