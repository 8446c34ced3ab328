//! Dashkit configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event bus tuning
    pub bus: BusConfig,

    /// State manager settings
    pub state: StateConfig,

    /// Router settings
    pub router: RouterConfig,

    /// Defaults applied to every mounted component
    pub components: ComponentsConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.bus.history_capacity == 0 {
            return Err(eyre::eyre!("bus.history-capacity must be greater than zero"));
        }
        if self.bus.timeout_ms == 0 {
            return Err(eyre::eyre!("bus.timeout-ms must be greater than zero"));
        }
        if self.state.history_capacity == 0 {
            return Err(eyre::eyre!("state.history-capacity must be greater than zero"));
        }
        if self.router.default_route.trim().is_empty() {
            return Err(eyre::eyre!("router.default-route must name a route"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .dashkit.yml
        let local_config = PathBuf::from(".dashkit.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/dashkit/dashkit.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dashkit").join("dashkit.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported later by [`Config::load`].
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".dashkit.yml")];
                if let Some(dir) = dirs::config_dir() {
                    paths.push(dir.join("dashkit").join("dashkit.yml"));
                }
                paths
            }
        };

        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Event bus tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Number of emitted events kept in the history ring buffer
    #[serde(rename = "history-capacity")]
    pub history_capacity: usize,

    /// Default per-listener timeout for deferred replies, in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Dispatch passes slower than this are recorded as diagnostics
    #[serde(rename = "slow-threshold-ms")]
    pub slow_threshold_ms: u64,

    /// How long slow-dispatch diagnostics are retained
    #[serde(rename = "diagnostics-retention-ms")]
    pub diagnostics_retention_ms: u64,
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn diagnostics_retention(&self) -> Duration {
        Duration::from_millis(self.diagnostics_retention_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            timeout_ms: 5_000,
            slow_threshold_ms: 100,
            diagnostics_retention_ms: 60_000,
        }
    }
}

/// State manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON file backing persisted keys (None keeps the snapshot in memory)
    #[serde(rename = "persist-path")]
    pub persist_path: Option<PathBuf>,

    /// Keys restored from the snapshot at startup
    #[serde(rename = "persisted-keys")]
    pub persisted_keys: Vec<String>,

    /// Number of change records kept in the state history
    #[serde(rename = "history-capacity")]
    pub history_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            persisted_keys: vec!["theme".to_string(), "sidebarCollapsed".to_string(), "lastRoute".to_string()],
            history_capacity: 100,
        }
    }
}

impl StateConfig {
    /// Expand a leading `~/` in the persist path
    pub fn expanded_persist_path(&self) -> Option<PathBuf> {
        let path = self.persist_path.as_ref()?;
        match path.to_str() {
            Some(p) if p.starts_with("~/") => dirs::home_dir().map(|home| home.join(&p[2..])),
            _ => Some(path.clone()),
        }
    }
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Route used when the location fragment names no registered route
    #[serde(rename = "default-route")]
    pub default_route: String,

    /// Lifetime of the transient `entering` class on a revealed view
    #[serde(rename = "transition-ms")]
    pub transition_ms: u64,
}

impl RouterConfig {
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_route: "dashboard".to_string(),
            transition_ms: 300,
        }
    }
}

/// Defaults applied to every mounted component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsConfig {
    /// Run `load_data` as part of `init`
    #[serde(rename = "auto-load")]
    pub auto_load: bool,

    /// Toggle a loading spinner from the `loading` state field
    #[serde(rename = "show-loading")]
    pub show_loading: bool,

    /// Error banners carry a dismiss control
    #[serde(rename = "dismissible-errors")]
    pub dismissible_errors: bool,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            auto_load: true,
            show_loading: true,
            dismissible_errors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.bus.history_capacity, 100);
        assert_eq!(config.bus.timeout_ms, 5_000);
        assert_eq!(config.router.default_route, "dashboard");
        assert!(config.components.auto_load);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bus:
  history-capacity: 20
  timeout-ms: 250
  slow-threshold-ms: 50

state:
  persist-path: /tmp/dashkit-state.json
  persisted-keys: [theme]

router:
  default-route: console
  transition-ms: 120

components:
  auto-load: false

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bus.history_capacity, 20);
        assert_eq!(config.bus.timeout(), Duration::from_millis(250));
        assert_eq!(config.state.persisted_keys, vec!["theme".to_string()]);
        assert_eq!(config.state.persist_path, Some(PathBuf::from("/tmp/dashkit-state.json")));
        assert_eq!(config.router.default_route, "console");
        assert_eq!(config.router.transition(), Duration::from_millis(120));
        assert!(!config.components.auto_load);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
router:
  default-route: economy
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.router.default_route, "economy");
        assert_eq!(config.router.transition_ms, 300);
        assert_eq!(config.bus.diagnostics_retention_ms, 60_000);
        assert_eq!(config.state.history_capacity, 100);
    }

    #[test]
    fn test_validate_rejects_empty_default_route() {
        let mut config = Config::default();
        config.router.default_route = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bus.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashkit.yml");
        fs::write(&path, "log-level: warn\nrouter:\n  default-route: clans\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.router.default_route, "clans");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/dashkit.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
