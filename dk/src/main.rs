//! dk - headless driver for the dashboard runtime
//!
//! CLI entry point for running scripted sessions and inspecting setup.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use dashkit::cli::{Cli, Command, OutputFormat, generate_after_help};
use dashkit::config::Config;
use dashkit::context::AppContext;
use dashkit::demo::{self, DASHBOARD_ROUTES, SessionReport};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dashkit")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("dashkit.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Demo { visit, history, format }) => cmd_demo(config, &visit, history, format).await,
        Some(Command::Routes { format }) => cmd_routes(format),
        Some(Command::Config) => cmd_config(&config),
        None => {
            debug!("main: no command specified, running default demo");
            cmd_demo(config, &[], false, OutputFormat::Text).await
        }
    }
}

/// Run a scripted session against fixture data
async fn cmd_demo(config: Config, visit: &[String], history: bool, format: OutputFormat) -> Result<()> {
    debug!(?visit, history, %format, "cmd_demo: called");
    let document = demo::build_document().context("Failed to build dashboard document")?;
    let app = AppContext::new(config, document, Arc::new(demo::fixture_api()));
    let restored = app.state.load_persisted_state().context("Failed to restore persisted state")?;
    debug!(restored, "cmd_demo: persisted state restored");

    let report = demo::run_session(&app, visit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, history),
    }
    Ok(())
}

fn print_report(report: &SessionReport, history: bool) {
    println!("{} {}", "Session:".bold(), report.title);
    for visit in &report.visits {
        let marker = if visit.entered { "✓".green() } else { "✗".red() };
        println!("  {} {}", marker, visit.route);
    }
    println!(
        "{} {}",
        "Current route:".bold(),
        report.current_route.as_deref().unwrap_or("-").cyan()
    );
    println!("{} {} ({})", "Players loaded:".bold(), report.players, report.component_phase);
    println!("{} {}", "Refreshes:".bold(), report.refreshes);
    println!(
        "{} emitted={} suppressed={} failures={} timeouts={}",
        "Bus:".bold(),
        report.stats.emitted,
        report.stats.suppressed,
        report.stats.listener_failures,
        report.stats.timeouts
    );

    if history {
        println!("{}", "History:".bold());
        for entry in &report.history {
            println!(
                "  {:>4} {} {}",
                entry.sequence,
                entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                entry.event
            );
        }
    }
}

/// List the dashboard routes
fn cmd_routes(format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_routes: called");
    match format {
        OutputFormat::Json => {
            let routes: Vec<_> = DASHBOARD_ROUTES
                .iter()
                .map(|(name, title)| serde_json::json!({ "name": name, "title": title }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
        OutputFormat::Text => {
            for (name, title) in DASHBOARD_ROUTES {
                println!("{:<12} {}", name.cyan(), title);
            }
        }
    }
    Ok(())
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
