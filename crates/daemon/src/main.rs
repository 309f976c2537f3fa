//! keybranch server entry point.
//!
//! Loads configuration, opens and migrates the database, builds the branch
//! engine, serves the HTTP API, and shuts down gracefully on SIGTERM/SIGINT.

mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use keybranch_core::config::AppConfig;
use keybranch_core::db::Database;
use keybranch_core::BranchEngine;
use keybranch_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// keybranch API server.
#[derive(Parser, Debug)]
#[command(
    name = "keybranch-server",
    version,
    about = "Branch, diff and merge service for localization keys"
)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_and_resolve(path).context("failed to load configuration")?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config.validate().context("configuration validation failed")?;
            config
        }
    };
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());
    let _log_guard = init_tracing(&log_level, config.server.log_dir.as_deref())
        .context("failed to initialize logging")?;

    // Startup banner
    info!("========================================");
    info!("  keybranch server v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &args.config {
        Some(path) => info!("Config file   : {}", path.display()),
        None => info!("Config file   : (defaults)"),
    }
    info!("Listen        : {}", config.server.listen);
    info!("Data dir      : {}", config.server.data_dir.display());
    info!("Batch size    : {}", config.merge.batch_size);
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;

    let db_path = config.database_path();
    let db = Database::open_with_timeout(&db_path, config.database.busy_timeout_ms)
        .context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let engine = Arc::new(BranchEngine::new(Arc::new(db), &config));
    let listen_addr = config.server.listen.clone();
    let web_server = WebServer::new(engine);

    web_server
        .start(&listen_addr, signals::wait_for_shutdown())
        .await
        .context("web server failed")?;

    info!("keybranch server stopped.");
    Ok(())
}

/// Install the global subscriber. With `log_dir` set, output also goes to a
/// daily-rotated file; the returned guard must live until exit so buffered
/// lines are flushed.
fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "keybranch-server.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .init();
            Ok(None)
        }
    }
}
