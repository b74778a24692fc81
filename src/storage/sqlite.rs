//! SQLite-backed store.
//!
//! Schema and indexes follow the production database: append-only
//! `spot_prices`, naturally-keyed `listings`, one `quota_counters` row
//! per API, and a `scan_runs` history with errors stored as JSON.
//! WAL mode is enabled so dashboard reads never block the scan writer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{merge_listing, DealsFilter, DealsSummary, Store};
use crate::quota::{QuotaCounter, QuotaScope};
use crate::types::{Listing, MetalType, PriceQuote, ScanRun};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        title TEXT NOT NULL,
        price REAL NOT NULL,
        url TEXT NOT NULL,
        metal_type TEXT NOT NULL,
        weight_oz REAL,
        weight_extraction_failed INTEGER NOT NULL DEFAULT 0,
        spread_percentage REAL,
        fetched_at TEXT NOT NULL,
        UNIQUE(source, external_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_listings_metal_type ON listings(metal_type)",
    "CREATE INDEX IF NOT EXISTS idx_listings_spread ON listings(spread_percentage)",
    "CREATE INDEX IF NOT EXISTS idx_listings_fetched_at ON listings(fetched_at)",
    "CREATE INDEX IF NOT EXISTS idx_listings_metal_spread ON listings(metal_type, spread_percentage)",
    "CREATE TABLE IF NOT EXISTS spot_prices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metal_type TEXT NOT NULL,
        price_per_oz REAL NOT NULL,
        fetched_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_spot_metal_fetched ON spot_prices(metal_type, fetched_at)",
    "CREATE TABLE IF NOT EXISTS quota_counters (
        api_name TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        call_limit INTEGER NOT NULL,
        used INTEGER NOT NULL DEFAULT 0,
        reset_at TEXT NOT NULL,
        last_call_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS scan_runs (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        listings_found INTEGER NOT NULL DEFAULT 0,
        deals_found INTEGER NOT NULL DEFAULT 0,
        errors TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE INDEX IF NOT EXISTS idx_scan_runs_started ON scan_runs(started_at)",
];

/// SQLite `Store` implementation.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` (e.g. `sqlite://ingot.db`)
    /// and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        let store = Self { pool };
        store.init().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply database schema")?;
        }
        Ok(())
    }

    fn listing_from_row(row: &SqliteRow) -> Result<Listing> {
        let metal: String = row.try_get("metal_type")?;
        Ok(Listing {
            source: row.try_get("source")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            price: row.try_get("price")?,
            url: row.try_get("url")?,
            metal_type: metal.parse()?,
            weight_oz: row.try_get("weight_oz")?,
            weight_extraction_failed: row.try_get("weight_extraction_failed")?,
            spread_percentage: row.try_get("spread_percentage")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }

    fn run_from_row(row: &SqliteRow) -> Result<ScanRun> {
        let id: String = row.try_get("id")?;
        let errors: String = row.try_get("errors")?;
        Ok(ScanRun {
            id: Uuid::parse_str(&id).context("Invalid scan run id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            listings_found: row.try_get::<i64, _>("listings_found")? as u32,
            deals_found: row.try_get::<i64, _>("deals_found")? as u32,
            errors: serde_json::from_str(&errors).context("Invalid scan run errors")?,
        })
    }

    async fn write_listing(&self, listing: &Listing) -> Result<()> {
        sqlx::query(
            "INSERT INTO listings
                (source, external_id, title, price, url, metal_type,
                 weight_oz, weight_extraction_failed, spread_percentage, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(source, external_id) DO UPDATE SET
                title = excluded.title,
                price = excluded.price,
                url = excluded.url,
                metal_type = excluded.metal_type,
                weight_oz = excluded.weight_oz,
                weight_extraction_failed = excluded.weight_extraction_failed,
                spread_percentage = excluded.spread_percentage,
                fetched_at = excluded.fetched_at",
        )
        .bind(&listing.source)
        .bind(&listing.external_id)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.url)
        .bind(listing.metal_type.to_string())
        .bind(listing.weight_oz)
        .bind(listing.weight_extraction_failed)
        .bind(listing.spread_percentage)
        .bind(listing.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn latest_quote(&self, metal: MetalType) -> Result<Option<PriceQuote>> {
        let row = sqlx::query(
            "SELECT metal_type, price_per_oz, fetched_at
             FROM spot_prices WHERE metal_type = ?
             ORDER BY fetched_at DESC LIMIT 1",
        )
        .bind(metal.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let metal: String = row.try_get("metal_type")?;
                Ok(Some(PriceQuote {
                    metal_type: metal.parse()?,
                    price_per_oz: row.try_get("price_per_oz")?,
                    fetched_at: row.try_get("fetched_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert_quote(&self, quote: &PriceQuote) -> Result<()> {
        sqlx::query(
            "INSERT INTO spot_prices (metal_type, price_per_oz, fetched_at) VALUES (?, ?, ?)",
        )
        .bind(quote.metal_type.to_string())
        .bind(quote.price_per_oz)
        .bind(quote.fetched_at)
        .execute(&self.pool)
        .await?;
        debug!(metal = %quote.metal_type, price = quote.price_per_oz, "Quote stored");
        Ok(())
    }

    async fn upsert_listing(&self, listing: &Listing) -> Result<Listing> {
        let existing = sqlx::query(
            "SELECT source, external_id, title, price, url, metal_type,
                    weight_oz, weight_extraction_failed, spread_percentage, fetched_at
             FROM listings WHERE source = ? AND external_id = ?",
        )
        .bind(&listing.source)
        .bind(&listing.external_id)
        .fetch_optional(&self.pool)
        .await?;

        let stored = match existing {
            Some(row) => merge_listing(&Self::listing_from_row(&row)?, listing),
            None => listing.clone(),
        };

        self.write_listing(&stored).await?;
        Ok(stored)
    }

    async fn listings(&self, limit: u32) -> Result<Vec<Listing>> {
        let rows = sqlx::query(
            "SELECT source, external_id, title, price, url, metal_type,
                    weight_oz, weight_extraction_failed, spread_percentage, fetched_at
             FROM listings ORDER BY spread_percentage DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::listing_from_row).collect()
    }

    async fn deals(&self, filter: &DealsFilter) -> Result<Vec<Listing>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT source, external_id, title, price, url, metal_type,
                    weight_oz, weight_extraction_failed, spread_percentage, fetched_at
             FROM listings WHERE weight_oz IS NOT NULL AND spread_percentage >= ",
        );
        builder.push_bind(filter.threshold);

        if let Some(metal) = filter.metal_type {
            builder.push(" AND metal_type = ");
            builder.push_bind(metal.to_string());
        }
        if let Some(min_weight) = filter.min_weight {
            builder.push(" AND weight_oz >= ");
            builder.push_bind(min_weight);
        }

        builder.push(" ORDER BY spread_percentage DESC LIMIT ");
        builder.push_bind(filter.max_results as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::listing_from_row).collect()
    }

    async fn deals_summary(&self, threshold: f64) -> Result<DealsSummary> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_deals,
                COALESCE(SUM(CASE WHEN metal_type = 'gold' THEN 1 ELSE 0 END), 0) AS gold_deals,
                COALESCE(SUM(CASE WHEN metal_type = 'silver' THEN 1 ELSE 0 END), 0) AS silver_deals,
                MAX(spread_percentage) AS best_spread,
                AVG(spread_percentage) AS average_spread
             FROM listings
             WHERE weight_oz IS NOT NULL AND spread_percentage >= ?",
        )
        .bind(threshold)
        .fetch_one(&self.pool)
        .await?;

        Ok(DealsSummary {
            total_deals: row.try_get::<i64, _>("total_deals")? as u32,
            gold_deals: row.try_get::<i64, _>("gold_deals")? as u32,
            silver_deals: row.try_get::<i64, _>("silver_deals")? as u32,
            best_spread_percentage: row.try_get("best_spread")?,
            average_spread_percentage: row.try_get("average_spread")?,
        })
    }

    async fn create_scan_run(&self, run: &ScanRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_runs (id, started_at, finished_at, listings_found, deals_found, errors)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.listings_found as i64)
        .bind(run.deals_found as i64)
        .bind(serde_json::to_string(&run.errors)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_scan_run(&self, run: &ScanRun) -> Result<()> {
        sqlx::query(
            "UPDATE scan_runs
             SET finished_at = ?, listings_found = ?, deals_found = ?, errors = ?
             WHERE id = ?",
        )
        .bind(run.finished_at)
        .bind(run.listings_found as i64)
        .bind(run.deals_found as i64)
        .bind(serde_json::to_string(&run.errors)?)
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_scan_runs(&self, limit: u32) -> Result<Vec<ScanRun>> {
        let rows = sqlx::query(
            "SELECT id, started_at, finished_at, listings_found, deals_found, errors
             FROM scan_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn abandon_stale_runs(&self, now: DateTime<Utc>) -> Result<u32> {
        let rows = sqlx::query(
            "SELECT id, started_at, finished_at, listings_found, deals_found, errors
             FROM scan_runs WHERE finished_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut reaped = 0;
        for row in &rows {
            let mut run = Self::run_from_row(row)?;
            run.record_error("scan abandoned: process restarted mid-run");
            run.finish(now);
            self.finish_scan_run(&run).await?;
            reaped += 1;
        }
        if reaped > 0 {
            info!(reaped, "Abandoned scan runs closed");
        }
        Ok(reaped)
    }

    async fn load_counters(&self) -> Result<Vec<QuotaCounter>> {
        let rows = sqlx::query(
            "SELECT api_name, scope, call_limit, used, reset_at, last_call_at FROM quota_counters",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let scope: String = row.try_get("scope")?;
                Ok(QuotaCounter {
                    api_name: row.try_get("api_name")?,
                    scope: scope.parse::<QuotaScope>()?,
                    limit: row.try_get::<i64, _>("call_limit")? as u32,
                    used: row.try_get::<i64, _>("used")? as u32,
                    reset_at: row.try_get("reset_at")?,
                    last_call_at: row.try_get("last_call_at")?,
                })
            })
            .collect()
    }

    async fn save_counters(&self, counters: &[QuotaCounter]) -> Result<()> {
        for counter in counters {
            sqlx::query(
                "INSERT INTO quota_counters (api_name, scope, call_limit, used, reset_at, last_call_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(api_name) DO UPDATE SET
                    scope = excluded.scope,
                    call_limit = excluded.call_limit,
                    used = excluded.used,
                    reset_at = excluded.reset_at,
                    last_call_at = excluded.last_call_at",
            )
            .bind(&counter.api_name)
            .bind(counter.scope.to_string())
            .bind(counter.limit as i64)
            .bind(counter.used as i64)
            .bind(counter.reset_at)
            .bind(counter.last_call_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
