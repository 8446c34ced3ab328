//! Application context
//!
//! One value per application session wiring the shared bus, state manager,
//! router, document and API facade together. Components receive it at
//! construction instead of reaching for globals.

use std::sync::Arc;

use tracing::info;

use crate::api::ApiFacade;
use crate::config::Config;
use crate::dom::Document;
use crate::events::EventBus;
use crate::router::Router;
use crate::state::StateManager;

/// Shared services for one session; cloning is cheap
#[derive(Clone)]
pub struct AppContext {
    pub bus: EventBus,
    pub state: StateManager,
    pub router: Router,
    pub document: Document,
    pub api: Arc<dyn ApiFacade>,
    pub config: Arc<Config>,
}

impl AppContext {
    /// Build every service from `config`; state and router announce on the shared bus
    pub fn new(config: Config, document: Document, api: Arc<dyn ApiFacade>) -> Self {
        let bus = EventBus::new(config.bus.clone());
        let state = StateManager::with_bus(config.state.clone(), bus.clone());
        let router = Router::with_bus(config.router.clone(), document.clone(), bus.clone());
        info!(
            default_route = %config.router.default_route,
            persisted_keys = config.state.persisted_keys.len(),
            "AppContext::new"
        );
        Self {
            bus,
            state,
            router,
            document,
            api,
            config: Arc::new(config),
        }
    }

    /// Tear down session-scoped timers
    pub fn dispose(&self) {
        self.router.dispose();
        info!("AppContext::dispose");
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("bus", &self.bus)
            .field("state", &self.state)
            .field("router", &self.router)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FixtureApi;
    use crate::events::ListenOptions;
    use crate::state::{STATE_CHANGED, SetOptions};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_state_changes_reach_shared_bus() {
        let ctx = AppContext::new(Config::default(), Document::new(), Arc::new(FixtureApi::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        ctx.bus
            .on(
                STATE_CHANGED,
                move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                },
                ListenOptions::default(),
            )
            .unwrap();

        ctx.state.set("theme", json!("dark"), SetOptions::default()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.router.bus().listener_count(STATE_CHANGED), 1);
    }
}
