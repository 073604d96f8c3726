use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmd::config::{SwarmdConfig, SwarmdToml};
use swarmd::health::HealthDaemon;
use swarmd::mux::{MuxAdapter, TmuxAdapter};
use swarmd::phase_engine::PhaseEngine;
use swarmd::store::StateStore;
use swarmd::supervisor::WorkerSupervisor;
use swarmd::toolsurface::ToolSurface;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "swarmd")]
#[command(version, about = "Multi-agent orchestration daemon")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace directory the daemon operates on (registry, task dirs, logs).
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: spawn the health scanner and keep the process alive.
    Serve,
    /// Show overall workspace status (task counts by state).
    Status,
    /// Inspect tasks tracked in the global index.
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Run a single health scan pass and print the report.
    HealthScan,
    /// View or validate configuration.
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List all tasks in the global index.
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration.
    Show,
    /// Validate `swarmd.toml` and print warnings.
    Validate,
    /// Write a default `swarmd.toml` to the workspace.
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let workspace = match cli.workspace.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?.join(".swarmd"),
    };

    let config = SwarmdConfig::load(workspace.clone(), cli.verbose)?;
    config.ensure_directories()?;

    match &cli.command {
        Commands::Serve => cmd_serve(config).await?,
        Commands::Status => cmd_status(&config)?,
        Commands::Task { command } => match command {
            TaskCommands::List => cmd_task_list(&config)?,
        },
        Commands::HealthScan => cmd_health_scan(config).await?,
        Commands::Config { command } => cmd_config(&config, command.clone())?,
    }

    Ok(())
}

/// Maximum log file size before rotation.
const MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated log files kept (swarmd.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate `log_path` if it's grown past `MAX_LOG_SIZE_BYTES`: shift
/// `swarmd.log` -> `swarmd.log.1` -> `swarmd.log.2` -> `swarmd.log.3`,
/// dropping the oldest. Best-effort: rotation failures never block startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE_BYTES {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{log_str}.{i}"), format!("{log_str}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn init_logging(config: &SwarmdConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.workspace_base.join("logs");
    std::fs::create_dir_all(&log_dir).context("failed to create log directory")?;
    let log_path = log_dir.join("swarmd.log");
    rotate_log_if_needed(&log_path);

    // Rotation happens above at startup; the appender itself never rolls,
    // so a single process run writes to one file checked at its next start.
    let file_appender = tracing_appender::rolling::never(&log_dir, "swarmd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("swarmd={default_level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}


struct Daemon {
    #[allow(dead_code)]
    store: Arc<StateStore>,
    #[allow(dead_code)]
    supervisor: Arc<WorkerSupervisor>,
    #[allow(dead_code)]
    phase_engine: Arc<PhaseEngine>,
    health: Arc<HealthDaemon>,
    #[allow(dead_code)]
    tool_surface: Arc<ToolSurface>,
}

fn build_daemon(config: SwarmdConfig) -> Result<Daemon> {
    let store = Arc::new(StateStore::open(config.clone()).context("failed to open state store")?);
    let mux: Arc<dyn MuxAdapter> = Arc::new(TmuxAdapter::new(config.mux_binary.clone()));
    let supervisor = Arc::new(WorkerSupervisor::new(Arc::clone(&store), Arc::clone(&mux), config.clone()));
    let phase_engine = Arc::new(PhaseEngine::new(Arc::clone(&store), Arc::clone(&supervisor), config.clone()));
    let health = Arc::new(HealthDaemon::new(
        Arc::clone(&store),
        Arc::clone(&mux),
        Duration::from_secs(config.health_scan_interval_secs),
    ));
    let tool_surface = Arc::new(ToolSurface::new(Arc::clone(&phase_engine), Arc::clone(&supervisor), Arc::clone(&health)));

    Ok(Daemon { store, supervisor, phase_engine, health, tool_surface })
}

async fn cmd_serve(config: SwarmdConfig) -> Result<()> {
    let _log_guard = init_logging(&config)?;
    tracing::info!(target: "swarmd::main", workspace = %config.workspace_base.display(), "starting swarmd");

    let daemon = build_daemon(config)?;
    let health = Arc::clone(&daemon.health);
    let scanner = tokio::spawn(async move { health.run_periodic().await });

    wait_for_shutdown_signal().await;
    tracing::info!(target: "swarmd::main", "shutdown signal received, stopping");
    scanner.abort();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn cmd_status(config: &SwarmdConfig) -> Result<()> {
    let store = StateStore::open(config.clone())?;
    let entries = store.read_index().unwrap_or_default();

    println!();
    println!("swarmd workspace status");
    println!("========================");
    println!("Workspace: {}", config.workspace_base.display());
    println!();

    if entries.is_empty() {
        println!("No tasks tracked yet.");
        println!();
        return Ok(());
    }

    let mut active = 0;
    let mut completed = 0;
    let mut failed = 0;
    for entry in &entries {
        match entry.status {
            swarmd_common::TaskStatus::Completed => completed += 1,
            swarmd_common::TaskStatus::Failed => failed += 1,
            _ => active += 1,
        }
    }

    println!("Tasks: {} total ({active} active, {completed} completed, {failed} failed)", entries.len());
    println!();
    Ok(())
}

fn cmd_task_list(config: &SwarmdConfig) -> Result<()> {
    let store = StateStore::open(config.clone())?;
    let entries = store.read_index().unwrap_or_default();

    println!();
    println!("{:<40} {:<12} {}", "Task", "Status", "Description");
    println!("{:<40} {:<12} {}", "----", "------", "-----------");
    for entry in &entries {
        println!("{:<40} {:<12?} {}", entry.task_id, entry.status, entry.description);
    }
    println!();
    Ok(())
}

async fn cmd_health_scan(config: SwarmdConfig) -> Result<()> {
    let daemon = build_daemon(config)?;
    let report = daemon.health.scan().await;
    println!();
    println!("Health scan report");
    println!("==================");
    println!("Scanned tasks:      {}", report.scanned_tasks);
    println!("Terminated workers:  {}", report.terminated_workers.len());
    for worker_id in &report.terminated_workers {
        println!("  - {worker_id}");
    }
    println!("Escalated reviews:   {}", report.escalated_reviews.len());
    for review_id in &report.escalated_reviews {
        println!("  - {review_id}");
    }
    println!("Orphan sessions:     {}", report.orphan_sessions.len());
    for session in &report.orphan_sessions {
        println!("  - {session}");
    }
    println!();
    Ok(())
}

fn cmd_config(config: &SwarmdConfig, command: Option<ConfigCommands>) -> Result<()> {
    let toml_path = config.workspace_base.join("swarmd.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("swarmd configuration");
            println!("=====================");
            println!();
            println!("Config file: {}", toml_path.display());
            println!("(exists: {})", toml_path.exists());
            println!();
            println!("Effective values:");
            println!("  max_agents = {}", config.max_agents);
            println!("  max_depth = {}", config.max_depth);
            println!("  max_concurrent = {}", config.max_concurrent);
            println!("  min_free_disk_bytes = {}", config.min_free_disk_bytes);
            println!("  health_scan_interval_secs = {}", config.health_scan_interval_secs);
            println!("  default_reviewer_count = {}", config.default_reviewer_count);
            println!("  agent_binary = \"{}\"", config.agent_binary);
            println!("  mux_binary = \"{}\"", config.mux_binary);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();
            if !toml_path.exists() {
                println!("No swarmd.toml found. Using defaults (valid).");
                println!();
                return Ok(());
            }
            let toml = SwarmdToml::load(&toml_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {warning}");
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if toml_path.exists() {
                println!("swarmd.toml already exists at {}", toml_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config.workspace_base)?;
            let toml = SwarmdToml::default();
            let raw = toml::to_string_pretty(&toml).context("failed to render default swarmd.toml")?;
            std::fs::write(&toml_path, raw).with_context(|| format!("failed to write {}", toml_path.display()))?;
            println!("Created swarmd.toml at {}", toml_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [limits] max_agents, max_depth, max_concurrent, min_free_disk_mb");
            println!("  - [daemon] health_scan_interval_secs, default_reviewer_count, agent_binary, mux_binary");
            println!();
        }
    }

    Ok(())
}
