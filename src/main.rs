//! speedtest-server: A network speed test server
//!
//! Measures network performance between a client and this server over
//! three independent channels:
//! - Download: `GET /download` streams filler for a fixed duration
//! - Upload: `POST /upload` counts the body and reports throughput
//! - Latency: `/ws` WebSocket ping/pong with running jitter
//!
//! Features:
//! - Paced, time-bounded download streams
//! - Constant-memory upload counting (raw or multipart bodies)
//! - Numerically stable running jitter
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod server;

use config::Config;
use server::Server;
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
        workers = ?config.workers,
        max_connections = config.max_connections,
        chunk_size = config.chunk_size,
        download_duration_secs = config.download_duration.as_secs(),
        stream_delay_ms = config.stream_delay.as_millis() as u64,
        probe_interval_ms = config.probe_interval.as_millis() as u64,
        "Starting speedtest server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async move {
        let server = Server::new(config)?;
        server.run().await
    })
}
