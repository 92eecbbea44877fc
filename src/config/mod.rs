//! Configuration management for the pool

use crate::error::{Error, Result};
use crate::utils::logging::LOG_FORMATS;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[clap(
    name = "stratum-pool",
    about = "Stratum mining pool front end",
    version,
    author
)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long, value_name = "FILE", env = "STRATUM_POOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[clap(long, env = "STRATUM_POOL_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[clap(short, long, env = "STRATUM_POOL_PORT")]
    pub port: Option<u16>,

    /// Log level or filter directive
    #[clap(short, long, env = "STRATUM_POOL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (plain, pretty, json)
    #[clap(long, env = "STRATUM_POOL_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Initial share difficulty
    #[clap(short, long, env = "STRATUM_POOL_DIFFICULTY")]
    pub difficulty: Option<f64>,

    /// Print the effective configuration as TOML and exit
    #[clap(long)]
    pub print_config: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Session and extranonce configuration
    pub stratum: StratumConfig,

    /// Job registry configuration
    pub jobs: JobsConfig,

    /// Worker authentication
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Concurrent connection limit
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    /// Extranonce1 width in bytes (1-4)
    pub extranonce1_size: u8,

    /// Extranonce2 width in bytes (1-8)
    pub extranonce2_size: usize,

    /// Difficulty assigned to new sessions
    pub initial_difficulty: f64,

    /// Answer a repeated `mining.subscribe` instead of rejecting it
    pub allow_resubscribe: bool,

    /// How long a disconnected session can be resumed
    pub session_resume_ttl_secs: u64,

    /// Delay before a released extranonce1 is reused
    ///
    /// Never shorter than the job grace period. A value is also held while
    /// any job its last owner saw still accepts shares.
    pub extranonce_cooldown_secs: u64,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            extranonce1_size: default_extranonce1_size(),
            extranonce2_size: default_extranonce2_size(),
            initial_difficulty: default_initial_difficulty(),
            allow_resubscribe: false,
            session_resume_ttl_secs: default_session_resume_ttl(),
            extranonce_cooldown_secs: default_extranonce_cooldown(),
        }
    }
}

impl StratumConfig {
    /// Resume window as a duration
    pub fn session_resume_ttl(&self) -> Duration {
        Duration::from_secs(self.session_resume_ttl_secs)
    }

    /// Cool-down as a duration
    pub fn extranonce_cooldown(&self) -> Duration {
        Duration::from_secs(self.extranonce_cooldown_secs)
    }
}

/// Job registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How long a superseded job still accepts shares
    pub grace_period_secs: u64,

    /// Upper bound on addressable jobs
    pub max_jobs: usize,

    /// How far nTime may run ahead of the pool clock
    pub ntime_forward_drift_secs: u64,

    /// Housekeeping period
    pub eviction_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            max_jobs: default_max_jobs(),
            ntime_forward_drift_secs: default_ntime_forward_drift(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

impl JobsConfig {
    /// Grace window as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Drift tolerance as a duration
    pub fn ntime_forward_drift(&self) -> Duration {
        Duration::from_secs(self.ntime_forward_drift_secs)
    }

    /// Housekeeping period as a duration
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// How `mining.authorize` checks credentials
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Any non-empty username
    #[default]
    Open,
    /// Only accounts listed in `accounts`
    Static,
}

/// Worker authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Registry kind
    pub mode: AuthMode,

    /// `account -> password` for static mode; an empty password accepts any
    pub accounts: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,

    /// Log format (plain, pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3333
}

fn default_max_connections() -> usize {
    1024
}

fn default_extranonce1_size() -> u8 {
    4
}

fn default_extranonce2_size() -> usize {
    4
}

fn default_initial_difficulty() -> f64 {
    16.0
}

fn default_session_resume_ttl() -> u64 {
    300
}

fn default_extranonce_cooldown() -> u64 {
    60
}

fn default_grace_period() -> u64 {
    120
}

fn default_max_jobs() -> usize {
    64
}

fn default_ntime_forward_drift() -> u64 {
    7200
}

fn default_eviction_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from command-line arguments
    ///
    /// Values given on the command line (or through the environment)
    /// override the file.
    pub fn from_args(args: Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(host) = args.host {
            config.server.host = host;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }
        if let Some(difficulty) = args.difficulty {
            config.stratum.initial_difficulty = difficulty;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("Port must be greater than 0"));
        }
        if self.server.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0"));
        }

        if !(1..=4).contains(&self.stratum.extranonce1_size) {
            return Err(Error::config(format!(
                "extranonce1_size must be between 1 and 4, got {}",
                self.stratum.extranonce1_size
            )));
        }
        if !(1..=8).contains(&self.stratum.extranonce2_size) {
            return Err(Error::config(format!(
                "extranonce2_size must be between 1 and 8, got {}",
                self.stratum.extranonce2_size
            )));
        }
        let difficulty = self.stratum.initial_difficulty;
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(Error::config(format!(
                "initial_difficulty must be positive, got {}",
                difficulty
            )));
        }

        if self.jobs.max_jobs == 0 {
            return Err(Error::config("max_jobs must be greater than 0"));
        }
        if self.jobs.eviction_interval_secs == 0 {
            return Err(Error::config("eviction_interval_secs must be greater than 0"));
        }

        if self.auth.mode == AuthMode::Static && self.auth.accounts.is_empty() {
            return Err(Error::config("Static auth mode requires at least one account"));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(Error::config(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3333);
        assert_eq!(config.stratum.extranonce1_size, 4);
        assert_eq!(config.stratum.extranonce2_size, 4);
        assert_eq!(config.stratum.initial_difficulty, 16.0);
        assert_eq!(config.jobs.grace_period(), Duration::from_secs(120));
        assert_eq!(config.auth.mode, AuthMode::Open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.server.port = 0;
        assert!(config.validate().is_err());
        config.server.port = 3333;

        config.stratum.extranonce1_size = 5;
        assert!(config.validate().is_err());
        config.stratum.extranonce1_size = 4;

        config.stratum.extranonce2_size = 0;
        assert!(config.validate().is_err());
        config.stratum.extranonce2_size = 4;

        config.stratum.initial_difficulty = f64::NAN;
        assert!(config.validate().is_err());
        config.stratum.initial_difficulty = 1.0;

        config.jobs.max_jobs = 0;
        assert!(config.validate().is_err());
        config.jobs.max_jobs = 1;

        config.auth.mode = AuthMode::Static;
        assert!(config.validate().is_err());
        config.auth.accounts.insert("alice".to_string(), String::new());
        assert!(config.validate().is_ok());

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 4444

[stratum]
extranonce2_size = 8

[auth]
mode = "static"

[auth.accounts]
alice = "secret"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 4444);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.stratum.extranonce2_size, 8);
        assert_eq!(config.stratum.extranonce1_size, 4);
        assert_eq!(config.auth.accounts.get("alice").map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_args_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4444\n[logging]\nlevel = \"debug\"").unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            port: Some(5555),
            difficulty: Some(2.0),
            ..Args::default()
        };
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.server.port, 5555);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stratum.initial_difficulty, 2.0);
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();
        assert!(Config::from_file(file.path()).is_err());
        assert!(Config::from_file(Path::new("/nonexistent/pool.toml")).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[stratum]"));
        assert!(toml.contains("[jobs]"));
        assert!(toml.contains("[logging]"));

        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["stratum-pool", "--port", "3334", "--log-format", "json"]);
        assert_eq!(args.port, Some(3334));
        assert_eq!(args.log_format.as_deref(), Some("json"));
    }
}
