//! Nomlog auth daemon
//!
//! Hosts the session registry over a JSON file store: runs the periodic
//! expiry sweep and exposes operator commands (create users, log in, check
//! and revoke tokens).

mod commands;
mod file_store;
mod sweeper;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nomlog_core::registry::{DEFAULT_MAX_CACHED_USERS, DEFAULT_MIN_SESSION_LIFETIME_SECS};
use nomlog_core::{Registry, RegistryConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::file_store::JsonFileStore;

/// Nomlog auth daemon - session and credential registry
#[derive(Parser, Debug)]
#[command(name = "authd")]
#[command(author = "Nomlog Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session and credential registry for nomlog", long_about = None)]
struct Args {
    /// Path to the JSON store file
    #[arg(short, long, global = true, default_value = "nomlog-auth.json")]
    data: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Shortest session lifetime issued, in seconds
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_MIN_SESSION_LIFETIME_SECS,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    min_session_secs: i64,

    /// Maximum number of cached users
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CACHED_USERS)]
    max_cached_users: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load users and sweep expired sessions until shutdown
    Serve {
        /// Seconds between expiry sweeps
        #[arg(long, default_value_t = 30)]
        sweep_interval_secs: u64,
    },

    /// Create a user
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        /// Requested session lifetime in seconds
        #[arg(long, default_value_t = 86_400)]
        session_lifetime_secs: i64,
    },

    /// Log in and print a token
    Login {
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        /// Client description stored with the session
        #[arg(long)]
        user_agent: Option<String>,
    },

    /// Print the user a token belongs to
    Check {
        #[arg(long)]
        token: String,
    },

    /// Revoke a token
    Logout {
        #[arg(long)]
        token: String,
    },

    /// Run one expiry sweep and exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level)?;

    let store = Arc::new(
        JsonFileStore::open(&args.data)
            .await
            .with_context(|| format!("Failed to open store {}", args.data.display()))?,
    );
    let config = RegistryConfig::default()
        .with_min_session_lifetime_secs(args.min_session_secs)
        .with_max_cached_users(args.max_cached_users);
    let registry = Registry::with_config(store.clone(), config);

    match args.command {
        Command::Serve { sweep_interval_secs } => serve(registry, store, sweep_interval_secs).await,
        Command::AddUser {
            name,
            password,
            session_lifetime_secs,
        } => {
            let user = commands::add_user(&registry, &store, &name, &password, session_lifetime_secs).await?;
            println!("Created user {} ({})", user.id, user.name);
            Ok(())
        }
        Command::Login {
            name,
            password,
            user_agent,
        } => {
            let issued = commands::login(&registry, &name, &password, user_agent.as_deref()).await?;
            println!("token:   {}", issued.token.to_hex());
            println!("expires: {}", issued.expires.to_rfc3339());
            Ok(())
        }
        Command::Check { token } => {
            let user = commands::check(&registry, &token).await?;
            println!("Authenticated as user {} ({})", user.id, user.name);
            Ok(())
        }
        Command::Logout { token } => {
            commands::logout(&registry, &token).await?;
            println!("Logged out");
            Ok(())
        }
        Command::Sweep => {
            let report = sweeper::sweep_once(&registry, store.as_ref()).await;
            println!(
                "Removed {} expired sessions from memory, {} from store",
                report.memory, report.durable
            );
            Ok(())
        }
    }
}

/// Warm the cache, then sweep on a timer until Ctrl+C or SIGTERM
async fn serve(registry: Registry, store: Arc<JsonFileStore>, sweep_interval_secs: u64) -> Result<()> {
    info!("Starting nomlog authd v{}", env!("CARGO_PKG_VERSION"));
    info!("Using store {}", store.path().display());

    let loaded = registry
        .load_from_database()
        .await
        .context("Failed to load users from store")?;
    info!("User cache warmed with {} users", loaded);

    let period = Duration::from_secs(sweep_interval_secs.max(1));
    let sweeper_handle = sweeper::spawn_sweeper(registry.clone(), store, period);
    info!("Sweeping expired sessions every {}s", period.as_secs());

    // Wait for shutdown signal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to setup SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = sweeper_handle => {
            result.context("Sweeper task failed")?;
        }
    }

    info!(
        "Shutdown complete ({} sessions in memory, {} users cached)",
        registry.session_count().await,
        registry.cached_user_count().await
    );
    Ok(())
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
