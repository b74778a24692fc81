//! Persistence layer.
//!
//! Defines the `Store` trait the core reads and writes through, the
//! natural-key merge policy for listings, and an in-memory
//! implementation used by tests and dry runs. The SQLite-backed store
//! lives in the `sqlite` submodule.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::quota::QuotaCounter;
use crate::types::{Listing, MetalType, PriceQuote, ScanRun};

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Filter for the deals query: listings with a known weight and a
/// spread at or above the threshold.
#[derive(Debug, Clone)]
pub struct DealsFilter {
    pub threshold: f64,
    pub metal_type: Option<MetalType>,
    pub min_weight: Option<f64>,
    pub max_results: u32,
}

impl Default for DealsFilter {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            metal_type: None,
            min_weight: None,
            max_results: 100,
        }
    }
}

/// Aggregate statistics over current deals.
#[derive(Debug, Clone, Serialize)]
pub struct DealsSummary {
    pub total_deals: u32,
    pub gold_deals: u32,
    pub silver_deals: u32,
    pub best_spread_percentage: Option<f64>,
    pub average_spread_percentage: Option<f64>,
}

// ---------------------------------------------------------------------------
// Merge policy
// ---------------------------------------------------------------------------

/// Merge a re-sighted listing into its stored row.
///
/// The incoming row wins for price, spread, title, url, and
/// `fetched_at`. Weight follows the never-downgrade rule: a known
/// `weight_oz` is kept when the new extraction failed, and the failure
/// flag reflects whether the merged row still lacks a weight. The
/// metal type is only replaced by a resolved (non-Unknown) value.
pub fn merge_listing(existing: &Listing, incoming: &Listing) -> Listing {
    let weight_oz = incoming.weight_oz.or(existing.weight_oz);
    let metal_type = if incoming.metal_type == MetalType::Unknown {
        existing.metal_type
    } else {
        incoming.metal_type
    };

    Listing {
        source: existing.source.clone(),
        external_id: existing.external_id.clone(),
        title: incoming.title.clone(),
        price: incoming.price,
        url: incoming.url.clone(),
        metal_type,
        weight_oz,
        weight_extraction_failed: weight_oz.is_none(),
        spread_percentage: incoming.spread_percentage,
        fetched_at: incoming.fetched_at,
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Abstraction over the persistence backend.
///
/// Within a process only the active scan writes; the dashboard layer
/// only reads. Implementations therefore need no coordination beyond
/// what their backend already provides.
#[async_trait]
pub trait Store: Send + Sync {
    /// Most recently fetched quote for a metal, if any.
    async fn latest_quote(&self, metal: MetalType) -> Result<Option<PriceQuote>>;

    /// Append a quote. History is never overwritten.
    async fn insert_quote(&self, quote: &PriceQuote) -> Result<()>;

    /// Find-or-create-or-merge by `(source, external_id)` under the
    /// policy in [`merge_listing`]. Returns the stored row.
    async fn upsert_listing(&self, listing: &Listing) -> Result<Listing>;

    /// All listings, best spread first.
    async fn listings(&self, limit: u32) -> Result<Vec<Listing>>;

    /// Listings passing the deals filter, best spread first.
    async fn deals(&self, filter: &DealsFilter) -> Result<Vec<Listing>>;

    /// Aggregate statistics over deals at or above the threshold.
    async fn deals_summary(&self, threshold: f64) -> Result<DealsSummary>;

    /// Persist a freshly started run.
    async fn create_scan_run(&self, run: &ScanRun) -> Result<()>;

    /// Persist the final state of a run.
    async fn finish_scan_run(&self, run: &ScanRun) -> Result<()>;

    /// Recent runs, newest first.
    async fn recent_scan_runs(&self, limit: u32) -> Result<Vec<ScanRun>>;

    /// Close any runs a crashed process left unfinished. Returns how
    /// many were reaped.
    async fn abandon_stale_runs(&self, now: DateTime<Utc>) -> Result<u32>;

    /// Load all persisted quota counters.
    async fn load_counters(&self) -> Result<Vec<QuotaCounter>>;

    /// Persist the given quota counters, replacing existing rows.
    async fn save_counters(&self, counters: &[QuotaCounter]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    quotes: Vec<PriceQuote>,
    listings: HashMap<(String, String), Listing>,
    runs: Vec<ScanRun>,
    counters: HashMap<String, QuotaCounter>,
}

/// In-memory `Store` for tests and dry runs. All state is lost on
/// process exit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn deal_rows(inner: &MemoryInner, threshold: f64) -> Vec<Listing> {
        inner
            .listings
            .values()
            .filter(|l| l.weight_oz.is_some())
            .filter(|l| matches!(l.spread_percentage, Some(s) if s >= threshold))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn latest_quote(&self, metal: MetalType) -> Result<Option<PriceQuote>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .quotes
            .iter()
            .filter(|q| q.metal_type == metal)
            .max_by_key(|q| q.fetched_at)
            .cloned())
    }

    async fn insert_quote(&self, quote: &PriceQuote) -> Result<()> {
        self.inner.lock().unwrap().quotes.push(quote.clone());
        Ok(())
    }

    async fn upsert_listing(&self, listing: &Listing) -> Result<Listing> {
        let mut inner = self.inner.lock().unwrap();
        let key = (listing.source.clone(), listing.external_id.clone());
        let stored = match inner.listings.get(&key) {
            Some(existing) => merge_listing(existing, listing),
            None => listing.clone(),
        };
        inner.listings.insert(key, stored.clone());
        Ok(stored)
    }

    async fn listings(&self, limit: u32) -> Result<Vec<Listing>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Listing> = inner.listings.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.spread_percentage
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&a.spread_percentage.unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn deals(&self, filter: &DealsFilter) -> Result<Vec<Listing>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = Self::deal_rows(&inner, filter.threshold);
        if let Some(metal) = filter.metal_type {
            rows.retain(|l| l.metal_type == metal);
        }
        if let Some(min_weight) = filter.min_weight {
            rows.retain(|l| matches!(l.weight_oz, Some(w) if w >= min_weight));
        }
        rows.sort_by(|a, b| {
            b.spread_percentage
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&a.spread_percentage.unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(filter.max_results as usize);
        Ok(rows)
    }

    async fn deals_summary(&self, threshold: f64) -> Result<DealsSummary> {
        let inner = self.inner.lock().unwrap();
        let rows = Self::deal_rows(&inner, threshold);

        let spreads: Vec<f64> = rows.iter().filter_map(|l| l.spread_percentage).collect();
        let best = spreads.iter().cloned().fold(None, |acc: Option<f64>, s| {
            Some(acc.map_or(s, |b| b.max(s)))
        });
        let average = if spreads.is_empty() {
            None
        } else {
            Some(spreads.iter().sum::<f64>() / spreads.len() as f64)
        };

        Ok(DealsSummary {
            total_deals: rows.len() as u32,
            gold_deals: rows.iter().filter(|l| l.metal_type == MetalType::Gold).count() as u32,
            silver_deals: rows.iter().filter(|l| l.metal_type == MetalType::Silver).count() as u32,
            best_spread_percentage: best,
            average_spread_percentage: average,
        })
    }

    async fn create_scan_run(&self, run: &ScanRun) -> Result<()> {
        self.inner.lock().unwrap().runs.push(run.clone());
        Ok(())
    }

    async fn finish_scan_run(&self, run: &ScanRun) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.runs.iter().position(|r| r.id == run.id) {
            Some(idx) => inner.runs[idx] = run.clone(),
            None => inner.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn recent_scan_runs(&self, limit: u32) -> Result<Vec<ScanRun>> {
        let inner = self.inner.lock().unwrap();
        let mut runs = inner.runs.clone();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn abandon_stale_runs(&self, now: DateTime<Utc>) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        let mut reaped = 0;
        for run in inner.runs.iter_mut().filter(|r| r.is_running()) {
            run.record_error("scan abandoned: process restarted mid-run");
            run.finish(now);
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn load_counters(&self) -> Result<Vec<QuotaCounter>> {
        Ok(self.inner.lock().unwrap().counters.values().cloned().collect())
    }

    async fn save_counters(&self, counters: &[QuotaCounter]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for counter in counters {
            inner
                .counters
                .insert(counter.api_name.clone(), counter.clone());
        }
        Ok(())
    }
}

/// Look up a stored run by id (test helper).
#[cfg(test)]
impl MemoryStore {
    pub fn scan_run(&self, id: uuid::Uuid) -> Option<ScanRun> {
        self.inner
            .lock()
            .unwrap()
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
