//! Dashboard API route handlers.
//!
//! All endpoints return JSON. The scan trigger is the only write; it
//! answers synchronously with accept/reject while the scan itself runs
//! in the background. Everything else reads the store and ledger.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::error;

use crate::engine::orchestrator::ScanOrchestrator;
use crate::pricing::cache::{CachedPrice, PriceCache};
use crate::quota::{QuotaLedger, QuotaStatus};
use crate::storage::{DealsFilter, DealsSummary, Store};
use crate::types::{Listing, MetalType, ScanRun, TriggerOutcome};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub store: Arc<dyn Store>,
    pub ledger: Arc<Mutex<QuotaLedger>>,
    pub cache: PriceCache,
}

pub type AppState = Arc<DashboardState>;

fn internal_error(e: impl std::fmt::Display) -> StatusCode {
    error!(error = %e, "Dashboard query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

// ---------------------------------------------------------------------------
// Query / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct DealsQuery {
    #[serde(default)]
    pub threshold: f64,
    /// Metal name, or "all" for no filter.
    pub metal_type: Option<String>,
    pub min_weight: Option<f64>,
    #[serde(default = "default_limit")]
    pub max_results: u32,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    #[serde(default)]
    pub threshold: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub scan_running: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub quota_remaining: HashMap<String, u32>,
    pub timestamp: DateTime<Utc>,
}

/// Deals summary enriched with potential savings against the cached
/// spot prices.
#[derive(Debug, Serialize)]
pub struct DealsSummaryResponse {
    #[serde(flatten)]
    pub summary: DealsSummary,
    pub total_potential_savings: Option<f64>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/scan — accept-or-reject immediately; the run is async.
pub async fn trigger_scan(State(state): State<AppState>) -> (StatusCode, Json<TriggerOutcome>) {
    let outcome = Arc::clone(&state.orchestrator).trigger();
    let status = if outcome.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(outcome))
}

/// GET /api/rate-limits
pub async fn get_rate_limits(State(state): State<AppState>) -> Json<Vec<QuotaStatus>> {
    let mut ledger = state.ledger.lock().unwrap_or_else(|e| e.into_inner());
    Json(ledger.statuses(Utc::now()))
}

/// GET /api/spot-prices — current quote per metal with age.
pub async fn get_spot_prices(
    State(state): State<AppState>,
) -> Result<Json<Vec<CachedPrice>>, StatusCode> {
    state
        .cache
        .cached_prices()
        .await
        .map(Json)
        .map_err(internal_error)
}

/// GET /api/listings?limit=
pub async fn get_listings(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Listing>>, StatusCode> {
    state
        .store
        .listings(query.limit)
        .await
        .map(Json)
        .map_err(internal_error)
}

/// GET /api/deals?threshold=&metal_type=&min_weight=&max_results=
pub async fn get_deals(
    State(state): State<AppState>,
    Query(query): Query<DealsQuery>,
) -> Result<Json<Vec<Listing>>, StatusCode> {
    let metal_type = match query.metal_type.as_deref() {
        None => None,
        Some("all") => None,
        Some(name) => Some(
            name.parse::<MetalType>()
                .map_err(|_| StatusCode::BAD_REQUEST)?,
        ),
    };

    let filter = DealsFilter {
        threshold: query.threshold,
        metal_type,
        min_weight: query.min_weight,
        max_results: query.max_results,
    };

    state
        .store
        .deals(&filter)
        .await
        .map(Json)
        .map_err(internal_error)
}

/// GET /api/deals-summary?threshold=
pub async fn get_deals_summary(
    State(state): State<AppState>,
    Query(query): Query<ThresholdQuery>,
) -> Result<Json<DealsSummaryResponse>, StatusCode> {
    let summary = state
        .store
        .deals_summary(query.threshold)
        .await
        .map_err(internal_error)?;

    // Savings = sum over deals of (spot value − asking price), using
    // whatever quotes are cached right now. No upstream calls.
    let prices: HashMap<MetalType, f64> = state
        .cache
        .cached_prices()
        .await
        .map_err(internal_error)?
        .into_iter()
        .map(|p| (p.metal_type, p.price_per_oz))
        .collect();

    let total_potential_savings = if prices.is_empty() {
        None
    } else {
        let deals = state
            .store
            .deals(&DealsFilter {
                threshold: query.threshold,
                max_results: u32::MAX,
                ..Default::default()
            })
            .await
            .map_err(internal_error)?;

        let savings: f64 = deals
            .iter()
            .filter_map(|deal| {
                let price = prices.get(&deal.metal_type)?;
                let spot_value = deal.spot_value(*price)?;
                let diff = spot_value - deal.price;
                (diff > 0.0).then_some(diff)
            })
            .sum();
        (savings > 0.0).then(|| (savings * 100.0).round() / 100.0)
    };

    Ok(Json(DealsSummaryResponse {
        summary,
        total_potential_savings,
    }))
}

/// GET /api/scans?limit=
pub async fn get_scans(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ScanRun>>, StatusCode> {
    state
        .store
        .recent_scan_runs(query.limit)
        .await
        .map(Json)
        .map_err(internal_error)
}

/// GET /api/health
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (database, last_scan) = match state.store.recent_scan_runs(1).await {
        Ok(runs) => ("ok".to_string(), runs.first().map(|r| r.started_at)),
        Err(e) => {
            error!(error = %e, "Health check: store unreachable");
            ("error".to_string(), None)
        }
    };

    let quota_remaining = {
        let mut ledger = state.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .statuses(Utc::now())
            .into_iter()
            .map(|s| (s.api_name, s.remaining))
            .collect()
    };

    let status = if database == "ok" { "healthy" } else { "unhealthy" };
    Json(HealthResponse {
        status: status.to_string(),
        database,
        scan_running: state.orchestrator.is_running(),
        last_scan,
        quota_remaining,
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
