//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs,
//! with validation on load. Defaults mirror the production values so a
//! minimal file is enough to run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::quota::QuotaScope;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    /// Per-API call budgets, keyed by API name.
    #[serde(default)]
    pub quotas: HashMap<String, QuotaConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default)]
    pub metals: MetalsConfig,
    pub pricing: PricingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Seconds between automatic scans.
    pub scan_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_scan: bool,
    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results_per_search: u32,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    pub scope: QuotaScope,
    pub limit: u32,
}

/// Per-regime cache TTLs, in minutes.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub market_hours_minutes: u32,
    pub off_hours_minutes: u32,
    pub weekend_minutes: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            market_hours_minutes: 15,
            off_hours_minutes: 60,
            weekend_minutes: 240,
        }
    }
}

/// Trading window boundaries, evaluated in a fixed UTC offset.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketHoursConfig {
    pub utc_offset_minutes: i32,
    pub open_hour: u32,
    pub open_minute: u32,
    pub close_hour: u32,
    pub close_minute: u32,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -300,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        }
    }
}

/// Metal-type keyword table: metal name → lowercase keywords.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetalsConfig {
    #[serde(default)]
    pub keywords: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    /// Quota budget the pricing API is charged against.
    pub api_name: String,
    /// Reference prices served by the fixed client (dry runs).
    #[serde(default)]
    pub fixed: HashMap<String, f64>,
}

/// Listing source wiring. Replay sources serve fixture files in place
/// of real marketplace clients.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub replay: Vec<ReplaySourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplaySourceConfig {
    pub name: String,
    pub fixture: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ingot.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_search_terms() -> Vec<String> {
    vec![
        "gold bullion".to_string(),
        "silver bullion".to_string(),
        "gold eagle".to_string(),
        "silver eagle".to_string(),
    ]
}

fn default_max_results() -> u32 {
    100
}

fn default_call_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scanner.scan_interval_secs == 0 {
            bail!("scanner.scan_interval_secs must be positive");
        }
        if self.scanner.retry_attempts == 0 {
            bail!("scanner.retry_attempts must be at least 1");
        }
        if self.scanner.search_terms.is_empty() {
            bail!("scanner.search_terms must not be empty");
        }
        if self.cache.market_hours_minutes == 0
            || self.cache.off_hours_minutes == 0
            || self.cache.weekend_minutes == 0
        {
            bail!("cache TTLs must be positive");
        }
        let open = self.market_hours.open_hour * 60 + self.market_hours.open_minute;
        let close = self.market_hours.close_hour * 60 + self.market_hours.close_minute;
        if self.market_hours.open_hour > 23
            || self.market_hours.close_hour > 23
            || self.market_hours.open_minute > 59
            || self.market_hours.close_minute > 59
        {
            bail!("market_hours boundaries out of range");
        }
        if open >= close {
            bail!("market_hours open must precede close");
        }
        for (api_name, quota) in &self.quotas {
            if quota.limit == 0 {
                bail!("quota limit for {api_name} must be positive");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
