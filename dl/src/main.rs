//! dl - devloop event server and client
//!
//! CLI entry point for serving pipeline state and talking to a running server.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use devloop::cli::{Cli, Command, OutputFormat, Toggle, get_log_path};
use devloop::config::Config;
use devloop::control::{Intent, TriggerPhase};
use devloop::events::{COMPLETE, Event, FAILED, IN_PROGRESS, LogEntry, STARTED, SUCCEEDED, TERMINATED};
use devloop::handler::EventHandler;
use devloop::ipc::{self, EventClient};
use devloop::state::State;
use devloop::status::StatusCode;

fn parse_level(s: &str) -> Option<tracing::Level> {
    match s.to_uppercase().as_str() {
        "TRACE" => Some(tracing::Level::TRACE),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "INFO" => Some(tracing::Level::INFO),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "ERROR" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_level(s).unwrap_or_else(|| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    // Append: client commands share the file with a running server
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

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
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let client = EventClient::with_socket_path(config.socket_path());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Ping => cmd_ping(&client).await,
        Command::State { format } => cmd_state(&client, format).await,
        Command::Events { tail, format } => cmd_events(&client, tail, format).await,
        Command::Execute { build, sync, deploy } => cmd_execute(&client, Intent { build, sync, deploy }).await,
        Command::Auto { phase, toggle } => cmd_auto(&client, phase, toggle).await,
        Command::Handle { event } => cmd_handle(&client, &event).await,
        Command::Stop => cmd_stop(&client).await,
    }
}

/// Run the server until a signal or a Shutdown request arrives
async fn cmd_serve(config: &Config) -> Result<()> {
    debug!("cmd_serve: called");
    let socket_path = config.socket_path();

    let probe = EventClient::with_socket_path(socket_path.clone()).with_timeout(Duration::from_millis(500));
    if probe.socket_exists() && probe.ping().await.is_ok() {
        return Err(eyre::eyre!("A server is already listening on {}", socket_path.display()));
    }

    let handler = EventHandler::spawn(config.handler_config());
    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    info!(?socket_path, "IPC socket listening");
    println!("{} Serving on {}", "✓".green(), socket_path.display());

    let shutdown = Arc::new(Notify::new());
    let mut server = tokio::spawn(ipc::serve(listener, handler.clone(), Arc::clone(&shutdown)));

    let finished = tokio::select! {
        result = &mut server => Some(result),
        signal = wait_for_signal() => {
            signal?;
            None
        }
    };
    let result = match finished {
        Some(result) => result,
        None => {
            shutdown.notify_one();
            server.await
        }
    };

    info!("Server shutting down...");
    if let Err(e) = handler.shutdown().await {
        debug!(error = %e, "cmd_serve: handler already stopped");
    }
    ipc::cleanup_socket(&socket_path);
    println!("{} Server stopped", "✓".green());

    result.context("IPC server task failed")?
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => warn!("SIGINT received"),
        _ = sigterm.recv() => warn!("SIGTERM received"),
    }
    Ok(())
}

async fn cmd_ping(client: &EventClient) -> Result<()> {
    debug!("cmd_ping: called");
    if !client.socket_exists() {
        println!("devloop server is not running");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("{} Server is alive and responsive", "✓".green());
            println!("Version: {}", version);
        }
        Err(e) => {
            debug!(error = %e, "cmd_ping: ping failed");
            println!("{} Socket exists but the server is not responding", "✗".red());
            println!("Error: {}", e);
        }
    }
    Ok(())
}

async fn cmd_state(client: &EventClient, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_state: called");
    let state = client.get_state().await.context("Failed to fetch state")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => print_state(&state),
    }
    Ok(())
}

fn paint(status: &str) -> ColoredString {
    match status {
        COMPLETE | SUCCEEDED => status.green(),
        FAILED => status.red(),
        IN_PROGRESS | STARTED => status.yellow(),
        TERMINATED => status.dimmed(),
        _ => status.normal(),
    }
}

fn paint_code(code: StatusCode) -> ColoredString {
    let text = code.to_string();
    if code.is_failure() {
        text.red()
    } else if code.is_success() {
        text.green()
    } else {
        text.normal()
    }
}

fn auto(enabled: bool) -> &'static str {
    if enabled { "auto" } else { "manual" }
}

fn print_state(state: &State) {
    let build = &state.build_state;
    println!(
        "{} ({}) {}",
        "Build".bold(),
        auto(build.auto_trigger),
        paint_code(build.status_code)
    );
    for (artifact, status) in &build.artifacts {
        println!("  {:<24} {}", artifact, paint(status));
    }

    let deploy = &state.deploy_state;
    println!(
        "{} ({}) {} {}",
        "Deploy".bold(),
        auto(deploy.auto_trigger),
        paint(&deploy.status),
        paint_code(deploy.status_code)
    );

    let sync = &state.file_sync_state;
    println!("{} ({}) {}", "File sync".bold(), auto(sync.auto_trigger), paint(&sync.status));

    let check = &state.status_check_state;
    println!(
        "{} {} {}",
        "Status check".bold(),
        paint(&check.status),
        paint_code(check.status_code)
    );
    for (resource, status) in &check.resources {
        println!("  {:<24} {}", resource, paint(status));
    }

    if !state.forwarded_ports.is_empty() {
        println!("{}", "Port forwards".bold());
        for port in state.forwarded_ports.values() {
            println!(
                "  {}:{} -> {}/{}:{}",
                port.address,
                port.local_port.to_string().cyan(),
                port.resource_type,
                port.resource_name,
                port.remote_port
            );
        }
    }

    if !state.debugging_containers.is_empty() {
        println!("{}", "Debugging containers".bold());
        for c in &state.debugging_containers {
            println!("  {}/{}:{} {}", c.namespace, c.pod_name, c.container_name, paint(&c.status));
        }
    }
}

fn print_entry(entry: &LogEntry, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(entry)?),
        OutputFormat::Text => {
            let line = match entry.event.actionable_err() {
                Some(err) if err.err_code.is_failure() => {
                    format!("{} ({})", entry.entry, err.err_code).red().to_string()
                }
                _ => entry.entry.clone(),
            };
            println!(
                "{} {} {}",
                entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                format!("#{}", entry.sequence).cyan(),
                line
            );
        }
    }
    Ok(())
}

async fn cmd_events(client: &EventClient, tail: bool, format: OutputFormat) -> Result<()> {
    debug!(tail, ?format, "cmd_events: called");
    let mut stream = if tail { client.event_log().await? } else { client.events().await? };

    while let Some(entry) = stream.next().await? {
        print_entry(&entry, format)?;
    }
    debug!("cmd_events: stream ended");
    Ok(())
}

async fn cmd_execute(client: &EventClient, intent: Intent) -> Result<()> {
    debug!(?intent, "cmd_execute: called");
    if intent.is_empty() {
        return Err(eyre::eyre!("Nothing to execute; pass --build, --sync or --deploy"));
    }
    client.execute(intent).await?;
    println!("{} Execution requested", "✓".green());
    Ok(())
}

async fn cmd_auto(client: &EventClient, phase: TriggerPhase, toggle: Toggle) -> Result<()> {
    debug!(%phase, ?toggle, "cmd_auto: called");
    client.auto_execute(phase, toggle.enabled()).await?;
    let word = if toggle.enabled() { "on".green() } else { "off".yellow() };
    println!("{} Auto-{} turned {}", "✓".green(), phase, word);
    Ok(())
}

async fn cmd_handle(client: &EventClient, json: &str) -> Result<()> {
    debug!("cmd_handle: called");
    let event: Event = serde_json::from_str(json).context("Failed to parse event JSON")?;
    client.handle(event).await?;
    println!("{} Event recorded", "✓".green());
    Ok(())
}

async fn cmd_stop(client: &EventClient) -> Result<()> {
    debug!("cmd_stop: called");
    if !client.socket_exists() {
        println!("devloop server is not running");
        return Ok(());
    }

    client.shutdown().await.context("Failed to request shutdown")?;

    // The server removes its socket on the way out
    let mut attempts = 0;
    while client.socket_exists() && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        attempts += 1;
    }
    if client.socket_exists() {
        println!("{} Shutdown requested; server has not exited yet", "!".yellow());
    } else {
        println!("{} Server stopped", "✓".green());
    }
    Ok(())
}
