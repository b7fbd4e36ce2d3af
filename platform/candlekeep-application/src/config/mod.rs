use candlekeep_domain::services::indicators::IndicatorSettings;
use candlekeep_domain::value_objects::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DB_URL_ENV: &str = "CANDLEKEEP_DB_URL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    pub collector: CollectorSection,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub backfill: BackfillConfig,
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub exchanges: ExchangesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub indicators: IndicatorSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CollectorSection {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_safety_buffer_minutes")]
    pub safety_buffer_minutes: u32,
    #[serde(default = "default_tier_pause_ms")]
    pub tier_pause_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub timeframe: Timeframe,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub lookback_minutes: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackfillConfig {
    pub max_points_per_request: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_points_per_request: 720,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    pub url: Option<String>,
    #[serde(default = "default_ohlcv_table")]
    pub ohlcv_table: String,
    pub pool_max_size: Option<u32>,
}

impl DbConfig {
    /// Explicit `url`, else `CANDLEKEEP_DB_URL`.
    pub fn resolve_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        std::env::var(DB_URL_ENV).map_err(|_| {
            ConfigError::Invalid(format!("db.url is not set and {DB_URL_ENV} is missing"))
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExchangesConfig {
    pub kraken: Option<ExchangeEndpoint>,
    pub kucoin: Option<ExchangeEndpoint>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExchangeEndpoint {
    pub base_url: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub prometheus_listen: Option<String>,
}

/// The part of the configuration the orchestrator needs for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSettings {
    pub max_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay: Duration::from_millis(default_retry_base_delay_ms()),
        }
    }
}

impl CollectorConfig {
    /// Checks run once per cycle before any task is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collector;
        if c.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid("collector.symbols is empty".to_string()));
        }
        if c.exchanges.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "collector.exchanges is empty".to_string(),
            ));
        }
        if c.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "collector.max_concurrency must be > 0".to_string(),
            ));
        }
        if c.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "collector.retry_attempts must be > 0".to_string(),
            ));
        }
        for tier in &self.tiers {
            if tier.enabled && tier.lookback_minutes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "tier {} has lookback_minutes = 0",
                    tier.timeframe
                )));
            }
        }
        if self.backfill.max_points_per_request == 0 {
            return Err(ConfigError::Invalid(
                "backfill.max_points_per_request must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn collection_settings(&self) -> CollectionSettings {
        CollectionSettings {
            max_concurrency: self.collector.max_concurrency,
            retry_attempts: self.collector.retry_attempts,
            retry_base_delay: Duration::from_millis(self.collector.retry_base_delay_ms),
        }
    }

    pub fn tier_pause(&self) -> Duration {
        Duration::from_millis(self.collector.tier_pause_ms)
    }
}

/// Source of the configuration for each scheduler tick.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<CollectorConfig, ConfigError>;
}

/// Re-reads the TOML file on every call so edits apply to the next cycle.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self) -> Result<CollectorConfig, ConfigError> {
        load_config(&self.path)
    }
}

/// Fixed configuration, handy for one-shot commands and tests.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider(pub CollectorConfig);

impl ConfigProvider for StaticConfigProvider {
    fn load(&self) -> Result<CollectorConfig, ConfigError> {
        Ok(self.0.clone())
    }
}

pub fn load_config(path: &Path) -> Result<CollectorConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        ConfigError::Load(format!("failed to read config {}: {}", path.display(), err))
    })?;
    parse_config(&contents)
        .map_err(|err| ConfigError::Load(format!("{}: {}", path.display(), err)))
}

pub fn parse_config(contents: &str) -> Result<CollectorConfig, String> {
    toml::from_str(contents).map_err(|err| format!("failed to parse TOML: {err}"))
}

pub fn to_toml_pretty(config: &CollectorConfig) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}

fn default_tiers() -> Vec<TierConfig> {
    [
        (Timeframe::M1, 60),
        (Timeframe::M5, 180),
        (Timeframe::M15, 360),
        (Timeframe::H1, 1440),
        (Timeframe::H4, 2880),
        (Timeframe::D1, 10080),
    ]
    .into_iter()
    .map(|(timeframe, lookback_minutes)| TierConfig {
        timeframe,
        enabled: true,
        lookback_minutes,
    })
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_safety_buffer_minutes() -> u32 {
    1
}

fn default_tier_pause_ms() -> u64 {
    2000
}

fn default_ohlcv_table() -> String {
    "ohlcv_candles".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
