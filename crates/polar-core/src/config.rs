//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply bundled migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Channel prefix for state-change notifications
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_channel_prefix() -> String {
    "polar".to_string()
}

/// Per-key lock timings, in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// Maximum time a customer meter lock may be held
    #[serde(default = "default_customer_meter_hold")]
    pub customer_meter_hold_ms: u64,

    /// How long a reconciliation waits for a contended customer meter lock
    #[serde(default = "default_customer_meter_wait")]
    pub customer_meter_wait_ms: u64,

    /// Maximum time an account credit lock may be held
    #[serde(default = "default_account_credit_hold")]
    pub account_credit_hold_ms: u64,

    /// How long a ledger mutation waits for a contended account lock
    #[serde(default = "default_account_credit_wait")]
    pub account_credit_wait_ms: u64,
}

fn default_customer_meter_hold() -> u64 {
    5_000
}

fn default_customer_meter_wait() -> u64 {
    200
}

fn default_account_credit_hold() -> u64 {
    5_000
}

fn default_account_credit_wait() -> u64 {
    2_000
}

impl LockConfig {
    pub fn customer_meter(&self) -> LockTimings {
        LockTimings {
            hold: Duration::from_millis(self.customer_meter_hold_ms),
            wait: Duration::from_millis(self.customer_meter_wait_ms),
        }
    }

    pub fn account_credit(&self) -> LockTimings {
        LockTimings {
            hold: Duration::from_millis(self.account_credit_hold_ms),
            wait: Duration::from_millis(self.account_credit_wait_ms),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            customer_meter_hold_ms: default_customer_meter_hold(),
            customer_meter_wait_ms: default_customer_meter_wait(),
            account_credit_hold_ms: default_account_credit_hold(),
            account_credit_wait_ms: default_account_credit_wait(),
        }
    }
}

/// Hold and acquisition timeouts for one lock family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimings {
    pub hold: Duration,
    pub wait: Duration,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("locks.customer_meter_hold_ms", 5_000)?
            .set_default("locks.customer_meter_wait_ms", 200)?
            .set_default("locks.account_credit_hold_ms", 5_000)?
            .set_default("locks.account_credit_wait_ms", 2_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with POLAR_ prefix
            .add_source(
                Environment::with_prefix("POLAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("POLAR").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
