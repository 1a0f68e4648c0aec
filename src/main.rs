//! line-echo: A line-oriented echo server
//!
//! Every byte sequence a client sends that ends in the line terminator is
//! written back to it unchanged. Bytes after the last terminator wait for
//! more input and are dropped if the client closes first.
//!
//! Features:
//! - One single-threaded reactor per worker thread, no locks on the data path
//! - Idle connections are closed after a configurable timeout
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = config.workers,
        max_connections = config.max_connections,
        idle_timeout_secs = config.echo.idle_timeout.as_secs(),
        read_chunk_size = config.echo.read_chunk_size,
        "Starting line-echo server"
    );

    runtime::run(config)?;
    Ok(())
}
