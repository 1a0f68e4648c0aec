//! Configuration module for the line-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "line-echo")]
#[command(author = "line-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7007)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds without productive I/O before a connection is closed
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

    /// Maximum bytes taken from the socket per readable event
    #[arg(long)]
    pub read_chunk_size: Option<usize>,

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
    pub echo: EchoConfig,
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
    #[serde(default)]
    pub workers: usize,
    /// Connection cap per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events fetched per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Echo protocol configuration
#[derive(Debug, Deserialize)]
pub struct EchoConfig {
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Read chunk size in bytes
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Line terminator, a single character
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            read_chunk_size: default_read_chunk_size(),
            terminator: default_terminator(),
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
    "127.0.0.1:7007".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_events_capacity() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_read_chunk_size() -> usize {
    2048
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-connection echo settings.
///
/// Kept separate from [`Config`] so every context can hold a copy without
/// dragging listener settings along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoSettings {
    pub idle_timeout: Duration,
    pub read_chunk_size: usize,
    pub terminator: u8,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(default_idle_timeout()),
            read_chunk_size: default_read_chunk_size(),
            terminator: b'\n',
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub echo: EchoSettings,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let idle_timeout = cli.idle_timeout.unwrap_or(toml_config.echo.idle_timeout);
        if idle_timeout == 0 {
            return Err(ConfigError::Invalid("idle_timeout must be at least 1 second"));
        }

        let read_chunk_size = cli
            .read_chunk_size
            .unwrap_or(toml_config.echo.read_chunk_size);
        if read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be non-zero"));
        }

        let terminator = match toml_config.echo.terminator.as_bytes() {
            [byte] => *byte,
            _ => return Err(ConfigError::Invalid("terminator must be exactly one byte")),
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            events_capacity: toml_config.server.events_capacity.max(1),
            echo: EchoSettings {
                idle_timeout: Duration::from_secs(idle_timeout),
                read_chunk_size,
                terminator,
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["line-echo"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7007");
        assert_eq!(config.server.workers, 0);
        assert_eq!(config.echo.idle_timeout, 60);
        assert_eq!(config.echo.read_chunk_size, 2048);
        assert_eq!(config.echo.terminator, "\n");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7000"
            workers = 4
            max_connections = 128

            [echo]
            idle_timeout = 5
            read_chunk_size = 512
            terminator = "\r"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.max_connections, 128);
        assert_eq!(config.echo.idle_timeout, 5);
        assert_eq!(config.echo.read_chunk_size, 512);
        assert_eq!(config.echo.terminator, "\r");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:7000"
            [echo]
            idle_timeout = 5
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["-l", "127.0.0.1:9", "-t", "30"]), toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9");
        assert_eq!(config.echo.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.echo.read_chunk_size, 2048);
        assert_eq!(config.echo.terminator, b'\n');
    }

    #[test]
    fn test_rejects_invalid_values() {
        let result = Config::merge(cli(&["--read-chunk-size", "0"]), TomlConfig::default());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = Config::merge(cli(&["-t", "0"]), TomlConfig::default());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let toml_config: TomlConfig = toml::from_str("[echo]\nterminator = \"ab\"").unwrap();
        let result = Config::merge(cli(&[]), toml_config);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
