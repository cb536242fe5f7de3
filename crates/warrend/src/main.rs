//! # warrend - Warren cluster membership reconciler
//!
//! One warrend runs beside every broker node. Together they bootstrap the
//! fleet into a single cluster and reap members that stopped running.
//!
//! ## Architecture
//! ```text
//!            Redis (lock, registry, cookie)
//!              ↑            ↑
//! broker ← warrend      warrend → broker
//!  (rabbitmqctl, management API)
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use warren_common::ClusterCookie;

mod cluster;
mod config;
mod coordination;
mod reconciler;
mod retry;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use config::AppConfig;
use state::AppState;

/// Warren - cluster membership reconciler
#[derive(Parser, Debug)]
#[command(name = "warrend")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/warrend.toml", global = true)]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL", global = true)]
    redis_url: Option<String>,

    /// Broker management API URL (overrides config)
    #[arg(long, env = "RABBITMQ_MANAGEMENT_URL", global = true)]
    management_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap this node, then keep healthchecking and synchronizing (default)
    Run,
    /// Verify the cluster cookie exists and install it locally
    Prestart,
    /// Join a peer if needed, wait for the broker and register
    Start,
    /// Refresh this node's registration once; exits non-zero if the broker is down
    Healthcheck,
    /// Reap stopped members once
    Synchronize,
    /// List registered nodes
    Nodes,
    /// Store the cluster cookie unless one exists
    SeedSecret {
        /// Read the cookie from a file instead of generating one
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Clear the cluster lock after a holder crashed mid-section
    ReleaseLock,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting warrend v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(path = %args.config, "Configuration loaded");

    let state = AppState::new(config).await?;
    info!(redis = %state.config.coordination.redis_url, "Redis connected");

    let reconciler = &state.reconciler;
    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(state.clone()).await?,
        Command::Prestart => reconciler.prestart().await?,
        Command::Start => reconciler.start().await?,
        Command::Healthcheck => {
            if !reconciler.healthcheck().await? {
                anyhow::bail!("broker is not alive");
            }
        }
        Command::Synchronize => {
            let reaped = reconciler.synchronize().await?;
            info!(reaped, "Synchronize complete");
        }
        Command::Nodes => {
            for node in reconciler.registry().list().await? {
                println!("{}", node);
            }
        }
        Command::SeedSecret { from_file } => seed_secret(&state, from_file).await?,
        Command::ReleaseLock => reconciler.lock().force_release().await?,
    }

    Ok(())
}

/// Long-running mode: reconciler loop plus the optional status endpoint
async fn run(state: AppState) -> Result<()> {
    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reconciler_shutdown = shutdown_tx.subscribe();

    let server = if state.config.status.enabled {
        let addr = state.config.status.listen_addr.clone();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind status endpoint on {}", addr))?;
        info!(%addr, "Status endpoint listening");

        let app = routes::create_router(state.clone());
        let mut server_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.recv().await;
                })
                .await
        }))
    } else {
        None
    };

    // Handle graceful shutdown
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Shutdown signal received");
        let _ = signal_tx.send(());
    });

    let result = state.reconciler.run(reconciler_shutdown).await;
    let _ = shutdown_tx.send(());

    if let Some(server) = server {
        server
            .await
            .context("Status server task failed")?
            .context("Server error")?;
    }

    result.context("Reconciler stopped")?;
    info!("warrend shutdown complete");
    Ok(())
}

async fn seed_secret(state: &AppState, from_file: Option<PathBuf>) -> Result<()> {
    let cookie = match from_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read cookie from {}", path.display()))?;
            let cookie = ClusterCookie::new(raw.trim());
            anyhow::ensure!(!cookie.is_empty(), "{} is empty", path.display());
            cookie
        }
        None => ClusterCookie::generate(),
    };

    let stored = state.reconciler.secrets().set(&cookie).await?;
    let current = state
        .reconciler
        .secrets()
        .get()
        .await?
        .context("Cluster cookie vanished after seeding")?;

    println!(
        "{} {}",
        if stored { "stored" } else { "existing" },
        current.fingerprint()
    );
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
