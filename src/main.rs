#![forbid(unsafe_code)]

//! Worker daemon: serves the profile bus until SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use proxy_profiles::config::AppPaths;
use proxy_profiles::constants::worker::SHUTDOWN_POLL_MS;
use proxy_profiles::ipc::BusServer;
use proxy_profiles::{ProfileStore, Worker};

#[derive(Parser, Debug)]
#[command(version, about = "Proxy profile worker daemon")]
struct Args {
    /// Directory holding the profile store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Unix socket to serve the bus on
    #[arg(long)]
    socket: Option<PathBuf>,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let paths = AppPaths::from_env()?.with_overrides(args.data_dir, args.socket);
    info!(data_dir = %paths.data_dir.display(), socket = %paths.socket_path.display(), "Starting worker");

    let store = Arc::new(ProfileStore::open(&paths.data_dir).context("Failed to open profile store")?);
    let server = Arc::new(BusServer::bind_to(paths.socket_path.clone())?);
    let worker = Arc::new(Worker::new(store.clone(), server.clone(), paths)?);
    let subscription = worker.attach();

    let term = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&term))
            .context("Failed to register signal handler")?;
    }

    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(SHUTDOWN_POLL_MS));
    }
    info!("Shutdown requested");

    // Detach first so no new message reaches the worker
    drop(subscription);
    store.flush().context("Failed to flush profile store")?;
    drop(worker);
    drop(server);
    info!(path = %store.dir().display(), "Profile store flushed");
    info!("Worker stopped");
    Ok(())
}
