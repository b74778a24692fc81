//! INGOT — Quota-Aware Precious Metals Arbitrage Scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store (reaping any scan runs a crash left behind),
//! hydrates the quota ledger, and runs the periodic scan loop with a
//! dashboard server and graceful shutdown.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use ingot::clock::MarketClock;
use ingot::config::AppConfig;
use ingot::dashboard;
use ingot::dashboard::routes::DashboardState;
use ingot::engine::orchestrator::ScanOrchestrator;
use ingot::engine::retry::RetryPolicy;
use ingot::pricing::cache::PriceCache;
use ingot::pricing::fixed::FixedPricingClient;
use ingot::pricing::{PricingClient, TtlTable};
use ingot::quota::QuotaLedger;
use ingot::sources::classify::MetalClassifier;
use ingot::sources::replay::ReplaySource;
use ingot::sources::ListingSource;
use ingot::storage::sqlite::SqliteStore;
use ingot::storage::Store;
use ingot::types::MetalType;

const BANNER: &str = r#"
  ___ _   _  ____  ___ _____
 |_ _| \ | |/ ___|/ _ \_   _|
  | ||  \| | |  _| | | || |
  | || |\  | |_| | |_| || |
 |___|_| \_|\____|\___/ |_|

  Quota-Aware Metals Arbitrage Scanner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        scan_interval_secs = cfg.scanner.scan_interval_secs,
        auto_scan = cfg.scanner.auto_scan,
        search_terms = cfg.scanner.search_terms.len(),
        "INGOT starting up"
    );

    // -- Store ------------------------------------------------------------

    let store = SqliteStore::connect(&cfg.storage.database_url)
        .await
        .context("Failed to open store")?;
    let store: Arc<dyn Store> = Arc::new(store);

    let reaped = store.abandon_stale_runs(chrono::Utc::now()).await?;
    if reaped > 0 {
        warn!(reaped, "Closed scan runs left behind by a previous process");
    }

    // -- Quota ledger ------------------------------------------------------

    let now = chrono::Utc::now();
    let mut ledger = QuotaLedger::from_counters(store.load_counters().await?);
    for (api_name, quota) in &cfg.quotas {
        ledger.ensure(api_name, quota.scope, quota.limit, now);
    }
    let ledger = Arc::new(Mutex::new(ledger));

    // -- Pricing -----------------------------------------------------------

    let clock = MarketClock {
        utc_offset_minutes: cfg.market_hours.utc_offset_minutes,
        open_hour: cfg.market_hours.open_hour,
        open_minute: cfg.market_hours.open_minute,
        close_hour: cfg.market_hours.close_hour,
        close_minute: cfg.market_hours.close_minute,
    };
    let ttl = TtlTable {
        market_hours_minutes: cfg.cache.market_hours_minutes,
        off_hours_minutes: cfg.cache.off_hours_minutes,
        weekend_minutes: cfg.cache.weekend_minutes,
    };
    let call_timeout = Duration::from_secs(cfg.scanner.call_timeout_secs);

    let cache = PriceCache::new(
        Arc::clone(&store),
        clock,
        ttl,
        cfg.pricing.api_name.clone(),
        call_timeout,
    );

    let mut fixed_prices: HashMap<MetalType, f64> = HashMap::new();
    for (metal_name, price) in &cfg.pricing.fixed {
        match metal_name.parse::<MetalType>() {
            Ok(metal) => {
                fixed_prices.insert(metal, *price);
            }
            Err(_) => warn!(metal = %metal_name, "Ignoring fixed price for unknown metal"),
        }
    }
    if fixed_prices.is_empty() {
        warn!("No fixed prices configured; price fetches will fall back to cached quotes");
    } else {
        warn!(
            metals = fixed_prices.len(),
            "Dry-run pricing: serving fixed reference prices instead of a live feed"
        );
    }
    let pricing: Arc<dyn PricingClient> = Arc::new(FixedPricingClient::new(fixed_prices));

    // -- Sources -----------------------------------------------------------

    let mut sources: Vec<Arc<dyn ListingSource>> = Vec::new();
    for replay in &cfg.sources.replay {
        info!(source = %replay.name, fixture = %replay.fixture, "Replay source configured");
        sources.push(Arc::new(ReplaySource::new(&replay.name, &replay.fixture)));
    }
    if sources.is_empty() {
        warn!("No listing sources configured; scans will only refresh prices");
    }

    // -- Orchestrator ------------------------------------------------------

    let retry = RetryPolicy {
        attempts: cfg.scanner.retry_attempts,
        call_timeout,
        backoff: Duration::from_secs(1),
    };

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        cache.clone(),
        pricing,
        sources,
        MetalClassifier::from_config(&cfg.metals.keywords),
        cfg.scanner.search_terms.clone(),
        cfg.scanner.max_results_per_search,
        retry,
    ));

    // -- Dashboard ---------------------------------------------------------

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState {
            orchestrator: Arc::clone(&orchestrator),
            store: Arc::clone(&store),
            ledger: Arc::clone(&ledger),
            cache,
        });
        dashboard::spawn_dashboard(state, cfg.dashboard.port);
    }

    // -- Main loop ---------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.scanner.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.scanner.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !cfg.scanner.auto_scan {
                    continue;
                }
                match orchestrator.run_once().await {
                    Some(run) => info!(
                        run_id = %run.id,
                        listings = run.listings_found,
                        deals = run.deals_found,
                        errors = run.errors.len(),
                        "Scheduled scan complete"
                    ),
                    // A manual trigger is still in flight.
                    None => info!("Scheduled scan skipped: scan already running"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Flush quota usage so restarts keep the spent budget.
    let counters = ledger.lock().unwrap_or_else(|e| e.into_inner()).counters();
    store.save_counters(&counters).await?;
    info!("INGOT shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingot=info"));

    if std::env::var("INGOT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
