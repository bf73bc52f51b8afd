//! Configuration module for the speed test server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Command-line arguments for the speed test server
#[derive(Parser, Debug, Default)]
#[command(name = "speedtest-server")]
#[command(author = "speedtest-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A network speed test server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Length of a download session in seconds
    #[arg(long)]
    pub download_duration: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub speedtest: SpeedtestConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Measurement tuning
#[derive(Debug, Deserialize)]
pub struct SpeedtestConfig {
    /// Size of download chunks and upper bound on upload reads, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Length of a download session in seconds
    #[serde(default = "default_download_duration")]
    pub download_duration_secs: u64,
    /// Pause between download chunks in milliseconds
    #[serde(default = "default_stream_delay")]
    pub stream_delay_ms: u64,
    /// Pause between latency probes in milliseconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            download_duration_secs: default_download_duration(),
            stream_delay_ms: default_stream_delay(),
            probe_interval_ms: default_probe_interval(),
        }
    }
}

/// Cross-origin configuration
#[derive(Debug, Deserialize)]
pub struct CorsConfig {
    /// Value sent in `Access-Control-Allow-Origin`
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_download_duration() -> u64 {
    20
}

fn default_stream_delay() -> u64 {
    1
}

fn default_probe_interval() -> u64 {
    1000
}

fn default_allow_origin() -> String {
    "*".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for a single download session.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub chunk_size: usize,
    pub duration: Duration,
    pub stream_delay: Duration,
}

/// Settings for a single latency session.
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Idle time between a reported result and the next probe
    pub interval: Duration,
    /// Text sent to the client to start a round trip
    pub probe_token: String,
    /// Text the client must answer with for the round trip to count
    pub ack_token: String,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(default_probe_interval()),
            probe_token: "ping".to_string(),
            ack_token: "pong".to_string(),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub chunk_size: usize,
    pub download_duration: Duration,
    pub stream_delay: Duration,
    pub probe_interval: Duration,
    pub allow_origin: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let speedtest = toml_config.speedtest;

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            chunk_size: speedtest.chunk_size,
            download_duration: Duration::from_secs(
                cli.download_duration
                    .unwrap_or(speedtest.download_duration_secs),
            ),
            stream_delay: Duration::from_millis(speedtest.stream_delay_ms),
            probe_interval: Duration::from_millis(speedtest.probe_interval_ms),
            allow_origin: toml_config.cors.allow_origin,
            log_level: if !cli.log_level.is_empty() && cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidListen(self.listen.clone(), e))?;

        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("chunk_size must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "max_connections must be greater than 0",
            ));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue("workers must be greater than 0"));
        }

        Ok(())
    }

    pub fn download(&self) -> DownloadConfig {
        DownloadConfig {
            chunk_size: self.chunk_size,
            duration: self.download_duration,
            stream_delay: self.stream_delay,
        }
    }

    pub fn latency(&self) -> LatencyConfig {
        LatencyConfig {
            interval: self.probe_interval,
            ..LatencyConfig::default()
        }
    }
}
