//! Trading-hours-aware price cache.
//!
//! Decides whether a stored quote is fresh enough to serve or whether
//! an upstream fetch is warranted, gated by the quota ledger. The TTL
//! is selected by the market clock's regime. On quota exhaustion or an
//! unreachable upstream the cache degrades to the most recent stored
//! quote regardless of staleness; only a completely empty history
//! surfaces `NoPriceAvailable`.
//!
//! No background refresh: staleness is bounded entirely by caller
//! cadence and the TTL table. The upstream client is invoked at most
//! once per `get_or_fetch` call, under a per-call timeout; any retry
//! behaviour belongs to the client itself.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PricingClient, TtlTable};
use crate::clock::MarketClock;
use crate::quota::QuotaLedger;
use crate::storage::Store;
use crate::types::{MetalType, PriceQuote, ScannerError};

/// Current quote for one metal, with age, for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct CachedPrice {
    pub metal_type: MetalType,
    pub price_per_oz: f64,
    pub fetched_at: chrono::DateTime<Utc>,
    pub age_minutes: i64,
    pub stale: bool,
}

/// Serve-or-fetch gate over the quote history in the store.
#[derive(Clone)]
pub struct PriceCache {
    store: Arc<dyn Store>,
    clock: MarketClock,
    ttl: TtlTable,
    /// Quota budget the upstream fetch is charged against.
    api_name: String,
    call_timeout: Duration,
}

impl PriceCache {
    pub fn new(
        store: Arc<dyn Store>,
        clock: MarketClock,
        ttl: TtlTable,
        api_name: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            api_name: api_name.into(),
            call_timeout,
        }
    }

    /// Resolve a price for `metal`: cache hit, upstream fetch, or
    /// stale fallback, in that order.
    pub async fn get_or_fetch(
        &self,
        metal: MetalType,
        ledger: &Mutex<QuotaLedger>,
        client: &dyn PricingClient,
    ) -> Result<PriceQuote, ScannerError> {
        let now = Utc::now();
        let latest = self
            .store
            .latest_quote(metal)
            .await
            .map_err(|e| ScannerError::Storage(e.to_string()))?;

        let regime = self.clock.regime(now);
        let ttl = self.ttl.ttl(regime);

        if let Some(quote) = &latest {
            let age = now - quote.fetched_at;
            let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
            if age < ttl_chrono {
                debug!(
                    metal = %metal,
                    age_minutes = quote.age_minutes(now),
                    regime = %regime,
                    "Cache hit"
                );
                return Ok(quote.clone());
            }
        }

        // Stale or missing: a fresh fetch needs budget. The ledger lock
        // is released before any await point.
        let quota = {
            let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
            ledger.check_and_increment(&self.api_name, now)
        };

        match quota {
            Ok(()) => match self.fetch_fresh(metal, client).await {
                Ok(quote) => Ok(quote),
                Err(e) => self.fall_back(metal, latest, e),
            },
            Err(e) => self.fall_back(metal, latest, e),
        }
    }

    /// One upstream call under the per-call timeout, persisted on
    /// success.
    async fn fetch_fresh(
        &self,
        metal: MetalType,
        client: &dyn PricingClient,
    ) -> Result<PriceQuote, ScannerError> {
        let price = match tokio::time::timeout(self.call_timeout, client.fetch(metal)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScannerError::Upstream {
                    api_name: self.api_name.clone(),
                    message: format!("timed out after {:?}", self.call_timeout),
                })
            }
        };

        if price <= 0.0 {
            return Err(ScannerError::Upstream {
                api_name: self.api_name.clone(),
                message: format!("invalid price for {metal}: {price}"),
            });
        }

        let quote = PriceQuote::new(metal, price, Utc::now());
        self.store
            .insert_quote(&quote)
            .await
            .map_err(|e| ScannerError::Storage(e.to_string()))?;

        info!(metal = %metal, price_per_oz = price, "Fresh price fetched");
        Ok(quote)
    }

    /// Graceful degradation: the most recent stored quote regardless of
    /// staleness, or `NoPriceAvailable` when there is none. Quota
    /// exhaustion and upstream outage share this path but log distinct
    /// events.
    fn fall_back(
        &self,
        metal: MetalType,
        latest: Option<PriceQuote>,
        cause: ScannerError,
    ) -> Result<PriceQuote, ScannerError> {
        match latest {
            Some(quote) => {
                let age = quote.age_minutes(Utc::now());
                if cause.is_quota() {
                    warn!(metal = %metal, age_minutes = age, error = %cause, "Quota exhausted; serving stale quote");
                } else {
                    warn!(metal = %metal, age_minutes = age, error = %cause, "Upstream fetch failed; serving stale quote");
                }
                Ok(quote)
            }
            None => {
                warn!(metal = %metal, error = %cause, "No stored quote to fall back on");
                Err(ScannerError::NoPriceAvailable(metal))
            }
        }
    }

    /// Current quote per metal with its age — read-only, never calls
    /// upstream.
    pub async fn cached_prices(&self) -> Result<Vec<CachedPrice>, ScannerError> {
        let now = Utc::now();
        let ttl = self.ttl.ttl(self.clock.regime(now));
        let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        let mut prices = Vec::new();
        for metal in MetalType::TRADEABLE {
            let quote = self
                .store
                .latest_quote(*metal)
                .await
                .map_err(|e| ScannerError::Storage(e.to_string()))?;
            if let Some(quote) = quote {
                prices.push(CachedPrice {
                    metal_type: quote.metal_type,
                    price_per_oz: quote.price_per_oz,
                    fetched_at: quote.fetched_at,
                    age_minutes: quote.age_minutes(now),
                    stale: (now - quote.fetched_at) >= ttl_chrono,
                });
            }
        }
        Ok(prices)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
