//! Shared types for the INGOT scanner.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that source, pricing, and
//! engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Metal type
// ---------------------------------------------------------------------------

/// The metal a listing or spot quote refers to.
///
/// `Unknown` is the sentinel for listings whose title matched no
/// configured keyword; such listings are stored but never get a spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetalType {
    Gold,
    Silver,
    Unknown,
}

impl MetalType {
    /// All categories, including the sentinel (useful for iteration).
    pub const ALL: &'static [MetalType] =
        &[MetalType::Gold, MetalType::Silver, MetalType::Unknown];

    /// The metals a scan actually prices — everything except `Unknown`.
    pub const TRADEABLE: &'static [MetalType] = &[MetalType::Gold, MetalType::Silver];

    /// Upstream pricing symbol (XAU/XAG). `None` for the sentinel.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            MetalType::Gold => Some("XAU"),
            MetalType::Silver => Some("XAG"),
            MetalType::Unknown => None,
        }
    }
}

impl fmt::Display for MetalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetalType::Gold => write!(f, "gold"),
            MetalType::Silver => write!(f, "silver"),
            MetalType::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for MetalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gold" | "au" => Ok(MetalType::Gold),
            "silver" | "ag" => Ok(MetalType::Silver),
            "unknown" => Ok(MetalType::Unknown),
            _ => Err(anyhow::anyhow!("Unknown metal type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Price quote
// ---------------------------------------------------------------------------

/// A spot price observation. Immutable once written — the "current"
/// price for a metal is the most recently fetched row, and writes
/// never overwrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub metal_type: MetalType,
    /// USD per troy ounce.
    pub price_per_oz: f64,
    pub fetched_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(metal_type: MetalType, price_per_oz: f64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            metal_type,
            price_per_oz,
            fetched_at,
        }
    }

    /// Age of this quote at `now`, in whole minutes.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_minutes()
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ${:.2}/oz @ {}", self.metal_type, self.price_per_oz, self.fetched_at)
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// A marketplace listing, keyed by `(source, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    /// Asking price in USD.
    pub price: f64,
    pub url: String,
    pub metal_type: MetalType,
    /// Weight in troy ounces, when extraction succeeded now or on a
    /// previous sighting. Never regressed to `None` once known.
    pub weight_oz: Option<f64>,
    pub weight_extraction_failed: bool,
    /// Percentage below (positive) or above (negative) spot value.
    /// `None` when weight or spot price is unknown.
    pub spread_percentage: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl Listing {
    /// Spot value of the listed weight at the given per-ounce price.
    pub fn spot_value(&self, price_per_oz: f64) -> Option<f64> {
        self.weight_oz.map(|w| w * price_per_oz)
    }

    /// Whether this listing is priced below spot (arbitrage candidate).
    pub fn is_deal(&self) -> bool {
        matches!(self.spread_percentage, Some(s) if s > 0.0)
    }

    /// Helper to build a test listing with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Listing {
            source: "ebay".to_string(),
            external_id: "110012345".to_string(),
            title: "1 oz Gold American Eagle".to_string(),
            price: 2050.0,
            url: "https://www.example.com/itm/110012345".to_string(),
            metal_type: MetalType::Gold,
            weight_oz: Some(1.0),
            weight_extraction_failed: false,
            spread_percentage: Some(4.65),
            fetched_at: Utc::now(),
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} ${:.2} ({}",
            self.source, self.external_id, self.title, self.price, self.metal_type,
        )?;
        match self.spread_percentage {
            Some(s) => write!(f, ", spread {s:+.2}%)"),
            None => write!(f, ", no spread)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan run
// ---------------------------------------------------------------------------

/// Record of a single orchestrator invocation. Exactly one row per run;
/// at most one run is unfinished process-wide at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub listings_found: u32,
    /// Listings with a positive spread seen during this run.
    pub deals_found: u32,
    pub errors: Vec<String>,
}

impl ScanRun {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            listings_found: 0,
            deals_found: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Record a recoverable failure without aborting the run.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    /// Wall-clock duration, if finished.
    pub fn duration_secs(&self) -> Option<i64> {
        self.finished_at.map(|end| (end - self.started_at).num_seconds())
    }
}

impl fmt::Display for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scan {}: listings={} deals={} errors={} ({})",
            self.id,
            self.listings_found,
            self.deals_found,
            self.errors.len(),
            if self.is_running() { "running" } else { "finished" },
        )
    }
}

// ---------------------------------------------------------------------------
// Trigger outcome
// ---------------------------------------------------------------------------

/// Synchronous reply to a scan trigger. Rejection is the only condition
/// reported to the caller before any work happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl TriggerOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the scanner core.
///
/// None of these are fatal to the host process: every variant degrades
/// to partial results plus an entry in `ScanRun.errors`, except
/// `Config`, which is only raised at startup.
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("Quota exceeded for {api_name} (limit: {limit}, resets at {reset_at})")]
    QuotaExceeded {
        api_name: String,
        limit: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("No price available for {0}")]
    NoPriceAvailable(MetalType),

    #[error("Listing source {source_name} unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Upstream error ({api_name}): {message}")]
    Upstream { api_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScannerError {
    /// Whether this error means a call budget ran out (as opposed to an
    /// upstream being unreachable). Both degrade to the cached-quote
    /// fallback, but they are logged distinctly.
    pub fn is_quota(&self) -> bool {
        matches!(self, ScannerError::QuotaExceeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
