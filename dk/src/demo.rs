//! Scripted headless dashboard session
//!
//! Builds the admin dashboard's document skeleton, registers its routes,
//! mounts a player table against fixture data and walks a list of routes.
//! Used by `dk demo` and the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::api::FixtureApi;
use crate::component::{Component, ComponentHost, ComponentOptions, Cx, Lifecycle};
use crate::context::AppContext;
use crate::dom::{DomError, Document};
use crate::events::{BusStats, HistoryEntry, ListenOptions};
use crate::router::{NavigateOptions, Route, Router, RouterError, Transition, hook};
use crate::state::SetOptions;

/// Route name and page title prefix for every dashboard view
pub const DASHBOARD_ROUTES: &[(&str, &str)] = &[
    ("dashboard", "Dashboard"),
    ("players", "Players"),
    ("clans", "Clans"),
    ("settings", "Settings"),
];

/// Container the player table mounts on
pub const PLAYERS_PANEL: &str = "players-panel";

/// Emitted when the player table's refresh button is clicked
pub const PLAYERS_REFRESH: &str = "players:refresh";

const APP_TITLE: &str = "Admin Dashboard";

/// Document with one view section and one nav tab per route
pub fn build_document() -> Result<Document, DomError> {
    let document = Document::new();
    document.set_title(APP_TITLE);
    let main = document.create_element("main", "main")?;
    let nav = document.create_element("nav", "nav")?;
    for (name, _) in DASHBOARD_ROUTES {
        let view = main.append(&format!("{}-view", name), "section")?;
        view.add_class("view")?;
        view.set_hidden(true)?;
        let tab = nav.append(&format!("{}-tab", name), "a")?;
        tab.add_class("tab")?;
        tab.set_attribute("href", format!("#{}", name))?;
    }
    document.require("players-view")?.append(PLAYERS_PANEL, "div")?;
    Ok(document)
}

/// Register every dashboard route on `router`
pub fn register_routes(router: &Router) -> Result<(), RouterError> {
    for (name, title) in DASHBOARD_ROUTES {
        let route = Route::new(*name, format!("{} - {}", title, APP_TITLE), format!("{}-view", name))
            .with_tab(format!("{}-tab", name));
        router.register(route)?;
    }
    Ok(())
}

/// In-memory API with a handful of players and clans
pub fn fixture_api() -> FixtureApi {
    FixtureApi::new()
        .with_response(
            "players",
            json!([
                {"name": "Aria", "clan": "North", "level": 42},
                {"name": "Bram", "clan": "North", "level": 17},
                {"name": "Cyra", "clan": "Ember", "level": 33},
            ]),
        )
        .with_response(
            "clans",
            json!([
                {"name": "North", "members": 2},
                {"name": "Ember", "members": 1},
            ]),
        )
}

/// Table of players loaded from the `players` resource
#[derive(Debug, Default)]
pub struct PlayerTable {
    rendered_rows: usize,
}

impl PlayerTable {
    pub fn rendered_rows(&self) -> usize {
        self.rendered_rows
    }
}

fn refresh_button_id(cx: &Cx) -> String {
    format!("{}-refresh", cx.container().id())
}

#[async_trait]
impl Component for PlayerTable {
    fn type_name(&self) -> &str {
        "player-table"
    }

    async fn render(&mut self, cx: &mut Cx) -> eyre::Result<()> {
        cx.container().set_html("<table class=\"players\"></table>")?;
        let button = cx.container().append(&refresh_button_id(cx), "button")?;
        button.set_html("Refresh")?;
        Ok(())
    }

    async fn bind_events(&mut self, cx: &mut Cx) -> eyre::Result<()> {
        let button = cx.app().document.require(&refresh_button_id(cx))?;
        let bus = cx.app().bus.clone();
        cx.add_event_listener(&button, "click", move |_| {
            bus.emit_sync(PLAYERS_REFRESH, Value::Null);
        })?;
        Ok(())
    }

    async fn load_data(&mut self, cx: &mut Cx) -> eyre::Result<()> {
        let players = cx
            .api()
            .request("players", json!({ "page": 1 }))
            .await
            .wrap_err("loading players")?;
        cx.set_state(json!({ "players": players }), true);
        Ok(())
    }

    fn update_view(&mut self, cx: &mut Cx) -> eyre::Result<()> {
        let rows: Vec<String> = cx
            .get("players")
            .and_then(Value::as_array)
            .map(|players| {
                players
                    .iter()
                    .map(|p| format!("<tr><td>{}</td></tr>", p.get("name").and_then(Value::as_str).unwrap_or("?")))
                    .collect()
            })
            .unwrap_or_default();
        self.rendered_rows = rows.len();
        cx.container()
            .set_html(format!("<table class=\"players\">{}</table>", rows.concat()))?;
        Ok(())
    }
}

/// Outcome of one visited route
#[derive(Debug, Clone, Serialize)]
pub struct Visit {
    pub route: String,
    pub entered: bool,
}

/// Summary of a demo session
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub title: String,
    pub current_route: Option<String>,
    pub visits: Vec<Visit>,
    pub players: usize,
    /// Refresh requests raised by the table's button and served
    pub refreshes: usize,
    pub component_phase: Lifecycle,
    pub last_route: Option<Value>,
    pub stats: BusStats,
    pub history: Vec<HistoryEntry>,
}

/// Run a scripted session on `app` and tear it down again
pub async fn run_session(app: &AppContext, visits: &[String]) -> Result<SessionReport> {
    debug!(?visits, "run_session: called");
    register_routes(&app.router).context("Failed to register routes")?;

    let state = app.state.clone();
    app.router.after_each(hook(move |t: Transition| {
        let result = state.set("lastRoute", json!(t.to), SetOptions::persisted());
        async move { result.map(|_| ()).map_err(eyre::Report::from) }
    }));

    let options = ComponentOptions::from_config(&app.config.components);
    let mut table = ComponentHost::new(app, PLAYERS_PANEL, PlayerTable::default(), options)
        .context("Failed to mount player table")?;

    app.router.start().await;
    table.init().await;

    let mut outcomes = Vec::with_capacity(visits.len());
    for route in visits {
        let entered = app.router.navigate(route, NavigateOptions::default()).await;
        outcomes.push(Visit {
            route: route.clone(),
            entered,
        });
    }

    let requested = Arc::new(AtomicUsize::new(0));
    let counter = requested.clone();
    let subscription = app
        .bus
        .on(
            PLAYERS_REFRESH,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ListenOptions::default(),
        )
        .context("Failed to subscribe to refresh requests")?;

    // A click only reaches the bus while the table is mounted
    if let Some(button) = app.document.get_element_by_id(&format!("{}-refresh", PLAYERS_PANEL)) {
        button.dispatch("click", Value::Null);
    }
    let mut refreshes = 0;
    while requested.load(Ordering::SeqCst) > refreshes {
        refreshes += 1;
        table.refresh().await;
    }
    subscription.unsubscribe();

    let players = table
        .state()
        .get("players")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let component_phase = table.phase();
    table.destroy().await;

    let report = SessionReport {
        title: app.document.title(),
        current_route: app.router.current(),
        visits: outcomes,
        players,
        refreshes,
        component_phase,
        last_route: app.state.get("lastRoute"),
        stats: app.bus.stats(),
        history: app.bus.history(None),
    };
    app.dispose();
    info!(current = ?report.current_route, players, refreshes, "run_session: complete");
    Ok(report)
}
