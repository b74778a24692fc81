//! End-to-end scan cycle tests.
//!
//! Wires the orchestrator to mock sources and pricing over real
//! stores, and exercises the full pull → price → classify → spread →
//! upsert pipeline, including quota degradation and crash-recovery
//! behaviour across runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use ingot::clock::MarketClock;
use ingot::engine::orchestrator::ScanOrchestrator;
use ingot::engine::retry::RetryPolicy;
use ingot::pricing::cache::PriceCache;
use ingot::pricing::TtlTable;
use ingot::quota::{QuotaCounter, QuotaLedger, QuotaScope};
use ingot::sources::{ListingSource, RawListing};
use ingot::storage::sqlite::SqliteStore;
use ingot::storage::{MemoryStore, Store};
use ingot::types::MetalType;

use crate::mock_source::{raw, MockPricing, MockSource};

const PRICING_API: &str = "metals-api";
const SOURCE_API: &str = "ebay";

struct Harness {
    store: Arc<dyn Store>,
    source: Arc<MockSource>,
    pricing: Arc<MockPricing>,
    orchestrator: Arc<ScanOrchestrator>,
}

/// Build a full scanner over the given store: one mock source, one
/// mock pricing client, one search term, flat TTL.
fn harness_over(
    store: Arc<dyn Store>,
    listings: Vec<RawListing>,
    pricing_limit: u32,
    ttl_minutes: u32,
) -> Harness {
    let now = Utc::now();
    let mut ledger = QuotaLedger::new();
    ledger.register(QuotaCounter::new(PRICING_API, QuotaScope::Monthly, pricing_limit, now));
    ledger.register(QuotaCounter::new(SOURCE_API, QuotaScope::Daily, 5000, now));
    let ledger = Arc::new(Mutex::new(ledger));

    let cache = PriceCache::new(
        Arc::clone(&store),
        MarketClock::default(),
        TtlTable {
            market_hours_minutes: ttl_minutes,
            off_hours_minutes: ttl_minutes,
            weekend_minutes: ttl_minutes,
        },
        PRICING_API,
        Duration::from_millis(500),
    );

    let source = Arc::new(MockSource::new(SOURCE_API, listings));
    let pricing = Arc::new(MockPricing::new(2150.0, 25.0));

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::clone(&store),
        ledger,
        cache,
        Arc::clone(&pricing) as Arc<dyn ingot::pricing::PricingClient>,
        vec![Arc::clone(&source) as Arc<dyn ListingSource>],
        ingot::sources::classify::MetalClassifier::default(),
        vec!["bullion".to_string()],
        100,
        RetryPolicy {
            attempts: 2,
            call_timeout: Duration::from_millis(500),
            backoff: Duration::from_millis(1),
        },
    ));

    Harness {
        store,
        source,
        pricing,
        orchestrator,
    }
}

fn harness(listings: Vec<RawListing>, pricing_limit: u32, ttl_minutes: u32) -> Harness {
    harness_over(Arc::new(MemoryStore::new()), listings, pricing_limit, ttl_minutes)
}

// ---------------------------------------------------------------------------
// Full cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_cycle_persists_listings_and_run() {
    let h = harness(
        vec![
            raw("1", "1 oz Gold American Eagle", 2050.0),
            raw("2", "10 oz Silver Bar", 240.0),
            raw("3", "Gold plated tribute coin", 49.99),
        ],
        50,
        15,
    );

    let run = h.orchestrator.run_once().await.expect("gate was free");
    assert_eq!(run.listings_found, 3);
    assert_eq!(run.deals_found, 2);
    assert!(run.errors.is_empty());
    assert!(!run.is_running());

    let listings = h.store.listings(100).await.unwrap();
    assert_eq!(listings.len(), 3);

    let gold = listings.iter().find(|l| l.external_id == "1").unwrap();
    assert_eq!(gold.metal_type, MetalType::Gold);
    assert_eq!(gold.weight_oz, Some(1.0));
    // 1 oz at 2150 spot, listed 2050 → ~4.651% below spot.
    assert!((gold.spread_percentage.unwrap() - 4.65).abs() < 0.01);

    let silver = listings.iter().find(|l| l.external_id == "2").unwrap();
    assert_eq!(silver.metal_type, MetalType::Silver);
    assert!((silver.spread_percentage.unwrap() - 4.0).abs() < 0.01);

    let plated = listings.iter().find(|l| l.external_id == "3").unwrap();
    assert!(plated.weight_extraction_failed);
    assert_eq!(plated.spread_percentage, None);

    // Exactly one run row, finished, and counters were flushed.
    let runs = h.store.recent_scan_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run.id);

    let counters = h.store.load_counters().await.unwrap();
    let pricing = counters.iter().find(|c| c.api_name == PRICING_API).unwrap();
    assert_eq!(pricing.used, 2); // gold + silver
    let source = counters.iter().find(|c| c.api_name == SOURCE_API).unwrap();
    assert_eq!(source.used, 1); // one search term
}

#[tokio::test]
async fn test_full_cycle_over_sqlite() {
    let mut path = std::env::temp_dir();
    path.push(format!("ingot_cycle_{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&url).await.unwrap());

    let h = harness_over(
        store,
        vec![raw("1", "1 oz Gold American Eagle", 2050.0)],
        50,
        15,
    );

    let run = h.orchestrator.run_once().await.unwrap();
    assert_eq!(run.listings_found, 1);

    let listings = h.store.listings(100).await.unwrap();
    assert_eq!(listings.len(), 1);
    assert!((listings[0].spread_percentage.unwrap() - 4.65).abs() < 0.01);

    let runs = h.store.recent_scan_runs(10).await.unwrap();
    assert!(!runs[0].is_running());

    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

// ---------------------------------------------------------------------------
// Cache behaviour across runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_run_hits_price_cache() {
    let h = harness(vec![raw("1", "1 oz Gold Eagle", 2050.0)], 50, 15);

    h.orchestrator.run_once().await.unwrap();
    assert_eq!(h.pricing.fetch_count(), 2); // gold + silver fetched

    // Quotes are minutes old at most; the second run must be served
    // entirely from cache.
    h.orchestrator.run_once().await.unwrap();
    assert_eq!(h.pricing.fetch_count(), 2);
}

#[tokio::test]
async fn test_quota_exhaustion_degrades_to_stale_quotes() {
    // Zero-minute TTL: every run wants a fresh fetch. Budget of 2
    // covers exactly the first run.
    let h = harness(vec![raw("1", "1 oz Gold Eagle", 2050.0)], 2, 0);

    let first = h.orchestrator.run_once().await.unwrap();
    assert!(first.errors.is_empty());
    assert_eq!(h.pricing.fetch_count(), 2);

    let second = h.orchestrator.run_once().await.unwrap();
    // No budget left, but stale quotes exist: the run still prices
    // everything and records no errors.
    assert_eq!(h.pricing.fetch_count(), 2);
    assert!(second.errors.is_empty());
    assert_eq!(second.listings_found, 1);

    let listings = h.store.listings(100).await.unwrap();
    assert!(listings[0].spread_percentage.is_some());
}

#[tokio::test]
async fn test_pricing_outage_with_no_history_yields_null_spreads() {
    let h = harness(vec![raw("1", "1 oz Gold Eagle", 2050.0)], 50, 15);
    h.pricing.go_dark();

    let run = h.orchestrator.run_once().await.unwrap();
    // Both metals failed to price; warnings recorded, run completed.
    assert_eq!(run.errors.len(), 2);
    assert_eq!(run.listings_found, 1);
    assert_eq!(run.deals_found, 0);

    let listings = h.store.listings(100).await.unwrap();
    assert_eq!(listings[0].spread_percentage, None);
    assert_eq!(listings[0].weight_oz, Some(1.0));
}

#[tokio::test]
async fn test_source_outage_recorded_and_run_completes() {
    let h = harness(vec![raw("1", "1 oz Gold Eagle", 2050.0)], 50, 15);
    h.source.set_error("connection refused");

    let run = h.orchestrator.run_once().await.unwrap();
    assert_eq!(run.listings_found, 0);
    assert!(run.errors.iter().any(|e| e.contains(SOURCE_API)));
    // Retried once before giving up.
    assert_eq!(h.source.fetch_count(), 2);

    let runs = h.store.recent_scan_runs(10).await.unwrap();
    assert!(!runs[0].is_running());
}

// ---------------------------------------------------------------------------
// Upsert semantics across runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resighting_updates_price_but_keeps_weight() {
    let h = harness(vec![raw("1", "1 oz Gold American Eagle", 2050.0)], 50, 15);
    h.orchestrator.run_once().await.unwrap();

    // Same item reappears with a retitled listing the parser cannot
    // read, at a new price.
    h.source.set_listings(vec![raw("1", "Gold American Eagle coin (mint)", 1990.0)]);
    let run = h.orchestrator.run_once().await.unwrap();
    assert_eq!(run.listings_found, 1);

    let listings = h.store.listings(100).await.unwrap();
    assert_eq!(listings.len(), 1, "re-sighting must not create a second row");
    let listing = &listings[0];
    assert!((listing.price - 1990.0).abs() < 1e-10);
    // Never-downgrade: the known weight survives the failed extraction.
    assert_eq!(listing.weight_oz, Some(1.0));
    assert!(!listing.weight_extraction_failed);
}

#[tokio::test]
async fn test_resighting_with_better_weight_upgrades() {
    let h = harness(vec![raw("1", "Gold Eagle coin", 2050.0)], 50, 15);
    h.orchestrator.run_once().await.unwrap();

    let stored = &h.store.listings(100).await.unwrap()[0];
    assert!(stored.weight_extraction_failed);

    h.source.set_listings(vec![raw("1", "1 oz Gold Eagle coin", 2050.0)]);
    h.orchestrator.run_once().await.unwrap();

    let stored = &h.store.listings(100).await.unwrap()[0];
    assert_eq!(stored.weight_oz, Some(1.0));
    assert!(!stored.weight_extraction_failed);
    assert!(stored.spread_percentage.is_some());
}
