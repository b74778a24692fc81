//! Spot pricing.
//!
//! Defines the `PricingClient` trait for upstream spot-price feeds,
//! the per-regime TTL table, and the trading-hours-aware price cache
//! that decides when a stored quote is good enough. The concrete
//! network client is injected from outside the core; `FixedPricingClient`
//! provides configured reference prices for dry runs.

pub mod cache;
pub mod fixed;

use async_trait::async_trait;
use std::time::Duration;

use crate::clock::Regime;
use crate::types::{MetalType, ScannerError};

/// Abstraction over upstream spot-price services.
#[async_trait]
pub trait PricingClient: Send + Sync {
    /// Fetch the current price per troy ounce in USD.
    async fn fetch(&self, metal: MetalType) -> Result<f64, ScannerError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// Per-regime cache TTL, in minutes. Externally configured; the
/// defaults mirror the production values (15 min during market hours,
/// 1 h off-hours, 4 h on weekends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTable {
    pub market_hours_minutes: u32,
    pub off_hours_minutes: u32,
    pub weekend_minutes: u32,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            market_hours_minutes: 15,
            off_hours_minutes: 60,
            weekend_minutes: 240,
        }
    }
}

impl TtlTable {
    /// TTL for the given regime.
    pub fn ttl(&self, regime: Regime) -> Duration {
        let minutes = match regime {
            Regime::MarketHours => self.market_hours_minutes,
            Regime::OffHours => self.off_hours_minutes,
            Regime::Weekend => self.weekend_minutes,
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }
}
