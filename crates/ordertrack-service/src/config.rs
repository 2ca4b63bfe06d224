//! Application configuration.
//!
//! Loaded from a TOML file and layered with `ORDERTRACK_*` environment
//! overrides, nested keys separated by `__` (for example
//! `ORDERTRACK_FEED__URL`).

use crate::error::{AppError, AppResult};
use config::{Config, Environment, File, FileFormat};
use ordertrack_position::SettlementConfig;
use ordertrack_queue::WorkerConfig;
use ordertrack_ws::ConnectionConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "ORDERTRACK";

/// Price feed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint of the upstream price feed.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Fixed delay before each reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Maximum consecutive failed connections (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Bound on parsed ticks waiting for the dispatcher.
    #[serde(default = "default_channel_capacity")]
    pub tick_channel_capacity: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            tick_channel_capacity: default_channel_capacity(),
        }
    }
}

impl From<&FeedConfig> for ConnectionConfig {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            heartbeat_timeout_ms: cfg.heartbeat_timeout_ms,
        }
    }
}

/// External symbol registrar. Notification is disabled without a base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_registrar_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_registrar_timeout_ms() -> u64 {
    5_000
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_registrar_timeout_ms(),
        }
    }
}

/// Subscription task queue and its worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Long-poll wait per receive.
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    /// Pause after an empty receive.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// How long a received message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_wait_time_ms() -> u64 {
    5_000
}

fn default_idle_backoff_ms() -> u64 {
    100
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_max_messages() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_time_ms: default_wait_time_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            max_messages: default_max_messages(),
        }
    }
}

impl QueueConfig {
    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            wait_time: Duration::from_millis(self.wait_time_ms),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            max_messages: self.max_messages,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

/// Platform fee constants applied on every close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSection {
    #[serde(default = "default_brokerage_fee")]
    pub brokerage_fee: Decimal,
    #[serde(default = "default_fee_in_local")]
    pub fee_in_local: Decimal,
    #[serde(default = "default_leverage")]
    pub default_leverage: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_brokerage_fee() -> Decimal {
    SettlementConfig::default().brokerage_fee
}

fn default_fee_in_local() -> Decimal {
    SettlementConfig::default().fee_in_local
}

fn default_leverage() -> Decimal {
    SettlementConfig::default().default_leverage
}

fn default_currency() -> String {
    SettlementConfig::default().currency
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            brokerage_fee: default_brokerage_fee(),
            fee_in_local: default_fee_in_local(),
            default_leverage: default_leverage(),
            currency: default_currency(),
        }
    }
}

impl From<&SettlementSection> for SettlementConfig {
    fn from(cfg: &SettlementSection) -> Self {
        Self {
            brokerage_fee: cfg.brokerage_fee,
            fee_in_local: cfg.fee_in_local,
            default_leverage: cfg.default_leverage,
            currency: cfg.currency.clone(),
        }
    }
}

/// Store backing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON array of stored positions loaded into the memory gateway.
    #[serde(default)]
    pub seed_file: Option<String>,
    /// Directory for the daily order and ledger JSON Lines files.
    #[serde(default)]
    pub audit_dir: Option<String>,
    /// Records buffered before an audit flush.
    #[serde(default = "default_audit_buffer_size")]
    pub audit_buffer_size: usize,
}

fn default_audit_buffer_size() -> usize {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            seed_file: None,
            audit_dir: None,
            audit_buffer_size: default_audit_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Bound on requests waiting for the registry actor.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub registrar: RegistrarConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub settlement: SettlementSection,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl AppConfig {
    /// Load `path` layered with environment overrides.
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path = %path, "Config file not found, using defaults and environment");
        }
        let source = File::new(path, FileFormat::Toml).required(false);
        Self::build(Config::builder().add_source(source).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        Self::build(Config::builder().add_source(File::from_str(content, FileFormat::Toml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> AppResult<Self> {
        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.feed.url.is_empty() {
            return Err(AppError::Config("feed.url is required".to_string()));
        }
        if self.feed.tick_channel_capacity == 0 || self.registry.channel_capacity == 0 {
            return Err(AppError::Config(
                "channel capacities must be positive".to_string(),
            ));
        }
        if self.settlement.brokerage_fee.is_sign_negative() {
            return Err(AppError::Config(
                "settlement.brokerage_fee must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        (&self.feed).into()
    }

    pub fn settlement(&self) -> SettlementConfig {
        (&self.settlement).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("[feed]\nurl = \"ws://localhost:9000\"\n").unwrap();
        assert_eq!(config.feed.reconnect_delay_ms, 5000);
        assert_eq!(config.feed.heartbeat_interval_ms, 30000);
        assert_eq!(config.feed.max_reconnect_attempts, 0);
        assert_eq!(config.queue.wait_time_ms, 5000);
        assert_eq!(config.queue.idle_backoff_ms, 100);
        assert_eq!(config.settlement.brokerage_fee, dec!(0.23529412));
        assert_eq!(config.settlement.default_leverage, dec!(200));
        assert!(config.registrar.base_url.is_none());
        assert_eq!(config.settlement(), SettlementConfig::default());
    }

    #[test]
    fn test_sections_override() {
        let toml = r#"
            [feed]
            url = "wss://feed.example/ws"
            reconnect_delay_ms = 250

            [registrar]
            base_url = "http://registrar.local"

            [queue]
            wait_time_ms = 20
            max_messages = 10

            [settlement]
            brokerage_fee = "0.5"
            currency = "EUR"

            [persistence]
            seed_file = "positions.json"
        "#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.connection().url, "wss://feed.example/ws");
        assert_eq!(config.connection().reconnect_delay_ms, 250);
        assert_eq!(config.registrar.base_url.as_deref(), Some("http://registrar.local"));
        assert_eq!(config.queue.worker().wait_time, Duration::from_millis(20));
        assert_eq!(config.queue.worker().max_messages, 10);
        assert_eq!(config.settlement().brokerage_fee, dec!(0.5));
        assert_eq!(config.settlement().currency, "EUR");
        assert_eq!(config.persistence.seed_file.as_deref(), Some("positions.json"));
    }

    #[test]
    fn test_missing_feed_url_rejected() {
        assert!(matches!(
            AppConfig::from_toml_str("[queue]\nwait_time_ms = 1\n"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[feed]"));
        assert!(toml_str.contains("reconnect_delay_ms"));
    }
}
