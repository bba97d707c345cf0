//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bot tokens) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

use crate::engine::detector::DEFAULT_FETCH_CONCURRENCY;
use crate::engine::DetectionConfig;
use crate::strategy::floor::{
    DEFAULT_IQR_FENCE, DEFAULT_MIN_RECENCY_WEIGHT, DEFAULT_MIN_RETAINED_FRACTION,
    DEFAULT_RECENCY_DECAY_DAYS,
};
use crate::strategy::{EstimatorParams, EvaluatorConfig};
use crate::types::DetectionResult;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub detection: DetectionSection,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub scan_interval_secs: u64,
    /// Dispatch alerts for new opportunities after each scheduled cycle.
    #[serde(default = "default_true")]
    pub send_alerts: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionSection {
    pub min_samples: usize,
    pub max_samples: usize,
    pub arbitrage_threshold: Decimal,
    pub ebay_fee_rate: Decimal,
    pub resale_shipping_cost: Decimal,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub retire_stale_opportunities: bool,
    #[serde(default)]
    pub estimator: EstimatorSection,
}

/// Estimator tuning. Every field is optional and falls back to the named
/// defaults in `strategy::floor`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EstimatorSection {
    pub iqr_fence: Option<Decimal>,
    pub min_retained_fraction: Option<Decimal>,
    pub recency_decay_days: Option<Decimal>,
    pub min_recency_weight: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// sqlx SQLite URL, e.g. `sqlite://floorscout.db` or `sqlite::memory:`.
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// JSON array of raw observations ingested at startup.
    #[serde(default)]
    pub seed_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_fetch_concurrency() -> usize {
    DEFAULT_FETCH_CONCURRENCY
}

fn default_max_connections() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Engine configuration, validated.
    pub fn detection_config(&self) -> DetectionResult<DetectionConfig> {
        let d = &self.detection;
        let e = &d.estimator;

        let estimator = EstimatorParams {
            iqr_fence: e.iqr_fence.unwrap_or(DEFAULT_IQR_FENCE),
            min_retained_fraction: e.min_retained_fraction.unwrap_or(DEFAULT_MIN_RETAINED_FRACTION),
            recency_decay_days: e.recency_decay_days.unwrap_or(DEFAULT_RECENCY_DECAY_DAYS),
            min_recency_weight: e.min_recency_weight.unwrap_or(DEFAULT_MIN_RECENCY_WEIGHT),
            ..EstimatorParams::new(d.min_samples, d.max_samples)
        };
        let evaluator = EvaluatorConfig {
            threshold: d.arbitrage_threshold,
            fee_rate: d.ebay_fee_rate,
            resale_shipping_cost: d.resale_shipping_cost,
        };

        let config = DetectionConfig {
            fetch_concurrency: d.fetch_concurrency,
            retire_stale_opportunities: d.retire_stale_opportunities,
            ..DetectionConfig::new(estimator, evaluator)
        };
        config.validate()?;
        Ok(config)
    }
}
