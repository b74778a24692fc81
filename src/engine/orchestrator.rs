//! Scan orchestrator — the single-flight scan workflow.
//!
//! One run pulls listings from every configured source, resolves spot
//! prices through the price cache, computes spreads, and upserts
//! results — without exceeding any quota or overlapping another run.
//!
//! The IDLE→RUNNING transition is an explicit compare-and-set on an
//! atomic flag: a trigger received while a run is active is rejected
//! immediately rather than queued. The flag is in-process state, so a
//! crash can never leave a false "running" behind; scan-run rows a
//! crash did leave unfinished are reaped at startup by the store.
//!
//! Failure semantics: only "already running" is reported synchronously.
//! Everything else — an exhausted quota, a dead source, a metal with no
//! price — degrades to partial results plus `ScanRun.errors`.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::engine::retry::{with_retry, RetryPolicy};
use crate::pricing::cache::PriceCache;
use crate::pricing::PricingClient;
use crate::quota::QuotaLedger;
use crate::sources::classify::MetalClassifier;
use crate::sources::weight::WeightParser;
use crate::sources::{ListingSource, RawListing};
use crate::storage::Store;
use crate::types::{Listing, MetalType, ScanRun, TriggerOutcome};

// ---------------------------------------------------------------------------
// Spread arithmetic
// ---------------------------------------------------------------------------

/// Percentage by which a listing is priced below (positive) or above
/// (negative) the spot value of its weight, rounded to two decimals.
///
/// `None` when the spot value is not positive.
pub fn spread_percentage(listing_price: f64, weight_oz: f64, price_per_oz: f64) -> Option<f64> {
    let spot_value = weight_oz * price_per_oz;
    if spot_value <= 0.0 {
        return None;
    }
    let pct = ((spot_value - listing_price) / spot_value) * 100.0;
    Some((pct * 100.0).round() / 100.0)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The single-flight scan workflow. Exclusively owns the `ScanRun`
/// lifecycle; while a run is active it is the only writer of quota
/// counters, quotes, and listings in the process.
pub struct ScanOrchestrator {
    store: Arc<dyn Store>,
    ledger: Arc<Mutex<QuotaLedger>>,
    cache: PriceCache,
    pricing: Arc<dyn PricingClient>,
    sources: Vec<Arc<dyn ListingSource>>,
    parser: WeightParser,
    classifier: MetalClassifier,
    search_terms: Vec<String>,
    max_results: u32,
    retry: RetryPolicy,
    running: Arc<AtomicBool>,
}

/// Returns the gate to IDLE when the run ends, even on panic.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<Mutex<QuotaLedger>>,
        cache: PriceCache,
        pricing: Arc<dyn PricingClient>,
        sources: Vec<Arc<dyn ListingSource>>,
        classifier: MetalClassifier,
        search_terms: Vec<String>,
        max_results: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            pricing,
            sources,
            parser: WeightParser::new(),
            classifier,
            search_terms,
            max_results,
            retry,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run is active right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Compare-and-set IDLE→RUNNING. `None` means a run is already
    /// active and nothing was changed.
    fn begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(Arc::clone(&self.running)))
    }

    /// Manual trigger: accept-and-spawn, or reject immediately while a
    /// run is active. The synchronous reply is all the caller gets;
    /// results land in the scan-run history.
    pub fn trigger(self: Arc<Self>) -> TriggerOutcome {
        match self.begin() {
            Some(guard) => {
                tokio::spawn(async move {
                    let _guard = guard;
                    self.execute().await;
                });
                TriggerOutcome::accepted()
            }
            None => {
                info!("Scan trigger rejected: a scan is already running");
                TriggerOutcome::rejected("a scan is already running")
            }
        }
    }

    /// Timer entry point: run inline if idle, otherwise skip this tick.
    pub async fn run_once(&self) -> Option<ScanRun> {
        let _guard = self.begin()?;
        Some(self.execute().await)
    }

    fn lock_ledger(&self) -> MutexGuard<'_, QuotaLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The per-run algorithm. Never fails; all recoverable trouble is
    /// accumulated on the run record.
    async fn execute(&self) -> ScanRun {
        let mut run = ScanRun::new(Utc::now());
        info!(run_id = %run.id, sources = self.sources.len(), "Scan started");

        if let Err(e) = self.store.create_scan_run(&run).await {
            error!(error = %e, "Failed to persist scan run start");
            run.record_error(format!("persist scan start: {e}"));
        }

        // 1. Resolve a price per metal of interest. A missing price is
        //    a warning, not an abort: listings of that metal get no
        //    spread this run.
        let mut prices: HashMap<MetalType, f64> = HashMap::new();
        for metal in MetalType::TRADEABLE {
            match self
                .cache
                .get_or_fetch(*metal, &self.ledger, &*self.pricing)
                .await
            {
                Ok(quote) => {
                    prices.insert(*metal, quote.price_per_oz);
                }
                Err(e) => {
                    warn!(metal = %metal, error = %e, "No price for metal this run");
                    run.record_error(format!("price for {metal}: {e}"));
                }
            }
        }

        // 2. Pull each source, one upstream call per search term, each
        //    call charged against the source's budget. Listings are
        //    deduped within the run and committed individually so a
        //    mid-run crash keeps what was already written.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for source in &self.sources {
            for term in &self.search_terms {
                let quota = self
                    .lock_ledger()
                    .check_and_increment(source.quota_api(), Utc::now());
                if let Err(e) = quota {
                    warn!(source = source.name(), error = %e, "Source skipped: quota exhausted");
                    run.record_error(format!("source {}: {e}", source.name()));
                    // Remaining terms would hit the same wall.
                    break;
                }

                let terms = std::slice::from_ref(term);
                let fetched = with_retry(&self.retry, source.name(), || {
                    source.fetch(terms, self.max_results)
                })
                .await;

                let raw_listings = match fetched {
                    Ok(listings) => listings,
                    Err(e) => {
                        warn!(source = source.name(), term = %term, error = %e, "Source fetch failed");
                        run.record_error(format!("source {}: {e}", source.name()));
                        continue;
                    }
                };

                info!(
                    source = source.name(),
                    term = %term,
                    count = raw_listings.len(),
                    "Listings fetched"
                );

                for raw in raw_listings {
                    let key = (source.name().to_string(), raw.external_id.clone());
                    if !seen.insert(key) {
                        continue;
                    }

                    let listing = self.build_listing(source.name(), raw, term, &prices);
                    match self.store.upsert_listing(&listing).await {
                        Ok(stored) => {
                            run.listings_found += 1;
                            if stored.is_deal() {
                                run.deals_found += 1;
                            }
                        }
                        Err(e) => {
                            warn!(external_id = %listing.external_id, error = %e, "Listing write failed");
                            run.record_error(format!(
                                "store listing {}/{}: {e}",
                                listing.source, listing.external_id
                            ));
                        }
                    }
                }
            }
        }

        // 3. Close the run and flush quota counters.
        run.finish(Utc::now());
        if let Err(e) = self.store.finish_scan_run(&run).await {
            error!(error = %e, "Failed to persist scan run result");
        }

        let counters = self.lock_ledger().counters();
        if let Err(e) = self.store.save_counters(&counters).await {
            warn!(error = %e, "Failed to persist quota counters");
        }

        info!(
            run_id = %run.id,
            listings = run.listings_found,
            deals = run.deals_found,
            errors = run.errors.len(),
            duration_secs = run.duration_secs().unwrap_or(0),
            "Scan finished"
        );
        run
    }

    /// Turn a raw listing into a storable row: classify the metal,
    /// extract the weight, and compute the spread when both weight and
    /// spot price are known.
    fn build_listing(
        &self,
        source_name: &str,
        raw: RawListing,
        search_term: &str,
        prices: &HashMap<MetalType, f64>,
    ) -> Listing {
        let metal = self.classifier.resolve(&raw.title, search_term);
        let (weight_oz, extraction_failed) = self.parser.parse(&raw.title);

        let spread_percentage = match (weight_oz, prices.get(&metal)) {
            (Some(weight), Some(price_per_oz)) => {
                spread_percentage(raw.price, weight, *price_per_oz)
            }
            _ => None,
        };

        Listing {
            source: source_name.to_string(),
            external_id: raw.external_id,
            title: raw.title,
            price: raw.price,
            url: raw.url,
            metal_type: metal,
            weight_oz,
            weight_extraction_failed: extraction_failed,
            spread_percentage,
            fetched_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
