//! Configuration for the topicwire server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "topicwire")]
#[command(version = "0.1.0")]
#[command(about = "A TCP message-ingestion server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9922)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of handler worker threads (0 = run handlers inline on the
    /// I/O thread; defaults to the number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Root directory for topic message files
    #[arg(short = 's', long)]
    pub storage_path: Option<PathBuf>,

    /// Path to the TOML auth file with the [users] table
    #[arg(short = 'a', long)]
    pub auth_file: Option<PathBuf>,

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
    pub sink: SinkConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of handler worker threads (0 = inline)
    pub workers: Option<usize>,
    /// Largest accepted frame body in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Path to the auth users file
    #[serde(default = "default_auth_file")]
    pub auth_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_frame_size: default_max_frame_size(),
            auth_file: default_auth_file(),
        }
    }
}

/// Message sink configuration
#[derive(Debug, Deserialize)]
pub struct SinkConfig {
    /// Root directory for topic message files
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Pending records per topic before a flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

/// Buffer pool allocator configuration
#[derive(Debug, Deserialize)]
pub struct AllocatorConfig {
    /// Maximum time an allocation may block, in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            block_ms: default_block_ms(),
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
    "127.0.0.1:9922".to_string()
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

fn default_auth_file() -> PathBuf {
    PathBuf::from("server_auth.toml")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_flush_threshold() -> usize {
    100
}

fn default_block_ms() -> u64 {
    500
}

/// Handler pool size when neither the CLI nor the config file sets one.
/// Handlers may block on the buffer pool, so they must run off the I/O
/// thread unless inline mode (0) is asked for explicitly.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub max_frame_size: usize,
    pub auth_file: PathBuf,
    pub storage_path: PathBuf,
    pub flush_threshold: usize,
    pub alloc_block_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .unwrap_or_else(default_workers),
            max_frame_size: toml_config.server.max_frame_size,
            auth_file: cli.auth_file.unwrap_or(toml_config.server.auth_file),
            storage_path: cli.storage_path.unwrap_or(toml_config.sink.storage_path),
            flush_threshold: toml_config.sink.flush_threshold,
            alloc_block_ms: toml_config.allocator.block_ms,
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
    #[error("failed to read config file '{0}': {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("failed to parse config file '{0}': {1}")]
    TomlParse(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:9922");
        assert_eq!(config.server.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.sink.flush_threshold, 100);
        assert_eq!(config.allocator.block_ms, 500);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9922"
            workers = 4
            max_frame_size = 1048576
            auth_file = "/etc/topicwire/users.toml"

            [sink]
            storage_path = "/var/lib/topicwire"
            flush_threshold = 50

            [allocator]
            block_ms = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9922");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_frame_size, 1048576);
        assert_eq!(config.sink.flush_threshold, 50);
        assert_eq!(config.allocator.block_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_takes_precedence() {
        let cli = CliArgs {
            config: None,
            listen: Some("0.0.0.0:7000".to_string()),
            workers: Some(2),
            storage_path: None,
            auth_file: None,
            log_level: "info".to_string(),
        };
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen, "0.0.0.0:7000");
        assert_eq!(config.workers, 2);
        assert_eq!(config.storage_path, PathBuf::from("./data"));
    }

    #[test]
    fn test_workers_default_off_the_io_thread() {
        // Without an explicit setting, handlers must not run inline on
        // the reactor thread.
        let cli = CliArgs {
            config: None,
            listen: None,
            workers: None,
            storage_path: None,
            auth_file: None,
            log_level: "info".to_string(),
        };
        let config = Config::from_cli(cli).unwrap();
        assert!(config.workers > 0);
    }

    #[test]
    fn test_workers_zero_is_an_explicit_opt_in() {
        let cli = CliArgs {
            config: None,
            listen: None,
            workers: Some(0),
            storage_path: None,
            auth_file: None,
            log_level: "info".to_string(),
        };
        assert_eq!(Config::from_cli(cli).unwrap().workers, 0);
    }
}
