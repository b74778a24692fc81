//! Quota ledger — per-API call-budget counters.
//!
//! Each upstream API gets one counter with a daily or monthly budget.
//! Resets are applied lazily: whenever a counter is touched and its
//! `reset_at` has passed, `used` is zeroed and `reset_at` advances to
//! the next period boundary (midnight UTC for daily, first-of-month
//! midnight UTC for monthly). No background timer is involved.
//!
//! All mutation happens from the single active scan (see the engine
//! module); the ledger itself takes `now` as an argument everywhere so
//! reset boundaries are testable without touching the wall clock.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::types::ScannerError;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The window a call budget applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaScope {
    Daily,
    Monthly,
}

impl QuotaScope {
    /// The first period boundary strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            QuotaScope::Daily => {
                let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
                Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).unwrap())
            }
            QuotaScope::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
                Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap())
            }
        }
    }
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Daily => write!(f, "daily"),
            QuotaScope::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for QuotaScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(QuotaScope::Daily),
            "monthly" => Ok(QuotaScope::Monthly),
            _ => Err(anyhow::anyhow!("Unknown quota scope: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Counter
// ---------------------------------------------------------------------------

/// Call budget for one API within one scope.
///
/// Invariant: `used <= limit` holds immediately after every successful
/// increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub api_name: String,
    pub scope: QuotaScope,
    pub limit: u32,
    pub used: u32,
    pub reset_at: DateTime<Utc>,
    pub last_call_at: Option<DateTime<Utc>>,
}

impl QuotaCounter {
    /// Fresh counter whose first reset falls on the next period boundary.
    pub fn new(api_name: impl Into<String>, scope: QuotaScope, limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            api_name: api_name.into(),
            scope,
            limit,
            used: 0,
            reset_at: scope.next_boundary(now),
            last_call_at: None,
        }
    }

    /// Apply the lazy reset rule. Returns true when a reset fired.
    pub fn maybe_reset(&mut self, now: DateTime<Utc>) -> bool {
        if now >= self.reset_at {
            self.used = 0;
            self.reset_at = self.scope.next_boundary(now);
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

impl fmt::Display for QuotaCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} ({}, resets {})",
            self.api_name, self.used, self.limit, self.scope, self.reset_at,
        )
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

/// Point-in-time view of one counter, for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub api_name: String,
    pub scope: QuotaScope,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub percentage_used: f64,
    pub reset_at: DateTime<Utc>,
    pub last_call_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// All counters, keyed by API name.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    counters: HashMap<String, QuotaCounter>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted counters.
    pub fn from_counters(counters: Vec<QuotaCounter>) -> Self {
        let counters = counters
            .into_iter()
            .map(|c| (c.api_name.clone(), c))
            .collect();
        Self { counters }
    }

    /// Register a counter, replacing any existing one for the same API.
    pub fn register(&mut self, counter: QuotaCounter) {
        self.counters.insert(counter.api_name.clone(), counter);
    }

    /// Make sure a counter exists for `api_name` with the configured
    /// scope and limit. A persisted counter keeps its `used`/`reset_at`
    /// but picks up a changed limit.
    pub fn ensure(&mut self, api_name: &str, scope: QuotaScope, limit: u32, now: DateTime<Utc>) {
        let counter = self
            .counters
            .entry(api_name.to_string())
            .or_insert_with(|| QuotaCounter::new(api_name, scope, limit, now));
        if counter.limit != limit || counter.scope != scope {
            info!(
                api_name,
                old_limit = counter.limit,
                new_limit = limit,
                "Quota limit updated from configuration"
            );
            counter.limit = limit;
            counter.scope = scope;
        }
    }

    /// Consume one call from `api_name`'s budget.
    ///
    /// Applies the lazy reset first, then fails with `QuotaExceeded` if
    /// the budget is spent. APIs with no registered counter are allowed
    /// through with a warning, matching the permissive tracker lookup in
    /// the upstream rate limiter.
    pub fn check_and_increment(
        &mut self,
        api_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ScannerError> {
        let Some(counter) = self.counters.get_mut(api_name) else {
            warn!(api_name, "No quota counter registered; allowing call");
            return Ok(());
        };

        if counter.maybe_reset(now) {
            info!(api_name, scope = %counter.scope, "Quota counter reset");
        }

        if counter.used >= counter.limit {
            return Err(ScannerError::QuotaExceeded {
                api_name: counter.api_name.clone(),
                limit: counter.limit,
                reset_at: counter.reset_at,
            });
        }

        counter.used += 1;
        counter.last_call_at = Some(now);
        debug!(
            api_name,
            used = counter.used,
            limit = counter.limit,
            "Quota call recorded"
        );
        Ok(())
    }

    /// Remaining budget for one API. Read-only apart from the lazy reset.
    pub fn remaining(&mut self, api_name: &str, now: DateTime<Utc>) -> Option<u32> {
        let counter = self.counters.get_mut(api_name)?;
        counter.maybe_reset(now);
        Some(counter.remaining())
    }

    /// Status of every counter, sorted by API name for stable output.
    pub fn statuses(&mut self, now: DateTime<Utc>) -> Vec<QuotaStatus> {
        let mut statuses: Vec<QuotaStatus> = self
            .counters
            .values_mut()
            .map(|counter| {
                counter.maybe_reset(now);
                let pct = if counter.limit > 0 {
                    (counter.used as f64 / counter.limit as f64) * 100.0
                } else {
                    0.0
                };
                QuotaStatus {
                    api_name: counter.api_name.clone(),
                    scope: counter.scope,
                    used: counter.used,
                    limit: counter.limit,
                    remaining: counter.remaining(),
                    percentage_used: (pct * 100.0).round() / 100.0,
                    reset_at: counter.reset_at,
                    last_call_at: counter.last_call_at,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.api_name.cmp(&b.api_name));
        statuses
    }

    /// Snapshot of all counters, for persistence.
    pub fn counters(&self) -> Vec<QuotaCounter> {
        self.counters.values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // -- Boundary arithmetic --

    #[test]
    fn test_daily_boundary_is_next_midnight() {
        let now = at(2026, 8, 7, 14, 30);
        assert_eq!(QuotaScope::Daily.next_boundary(now), at(2026, 8, 8, 0, 0));
    }

    #[test]
    fn test_daily_boundary_at_midnight_advances_a_full_day() {
        let now = at(2026, 8, 7, 0, 0);
        assert_eq!(QuotaScope::Daily.next_boundary(now), at(2026, 8, 8, 0, 0));
    }

    #[test]
    fn test_monthly_boundary_is_first_of_next_month() {
        let now = at(2026, 8, 7, 14, 30);
        assert_eq!(QuotaScope::Monthly.next_boundary(now), at(2026, 9, 1, 0, 0));
    }

    #[test]
    fn test_monthly_boundary_december_rolls_year() {
        let now = at(2026, 12, 15, 9, 0);
        assert_eq!(QuotaScope::Monthly.next_boundary(now), at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("daily".parse::<QuotaScope>().unwrap(), QuotaScope::Daily);
        assert_eq!("MONTHLY".parse::<QuotaScope>().unwrap(), QuotaScope::Monthly);
        assert!("weekly".parse::<QuotaScope>().is_err());
    }

    // -- check_and_increment --

    #[test]
    fn test_used_never_exceeds_limit() {
        let now = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("ebay", QuotaScope::Daily, 3, now));

        for _ in 0..3 {
            ledger.check_and_increment("ebay", now).unwrap();
        }
        // Fourth call must fail; used stays at the limit.
        let err = ledger.check_and_increment("ebay", now).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(ledger.remaining("ebay", now), Some(0));

        // Even many rejected attempts never push used past limit.
        for _ in 0..10 {
            assert!(ledger.check_and_increment("ebay", now).is_err());
        }
        let counter = &ledger.counters()[0];
        assert!(counter.used <= counter.limit);
        assert_eq!(counter.used, 3);
    }

    #[test]
    fn test_quota_exceeded_carries_reset_at() {
        let now = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("metals-api", QuotaScope::Monthly, 1, now));
        ledger.check_and_increment("metals-api", now).unwrap();

        match ledger.check_and_increment("metals-api", now).unwrap_err() {
            ScannerError::QuotaExceeded {
                api_name,
                limit,
                reset_at,
            } => {
                assert_eq!(api_name, "metals-api");
                assert_eq!(limit, 1);
                assert_eq!(reset_at, at(2026, 9, 1, 0, 0));
            }
            other => panic!("expected QuotaExceeded, got {other}"),
        }
    }

    #[test]
    fn test_unregistered_api_is_allowed() {
        let mut ledger = QuotaLedger::new();
        assert!(ledger
            .check_and_increment("nobody-configured-this", Utc::now())
            .is_ok());
    }

    // -- Lazy reset --

    #[test]
    fn test_reset_fires_exactly_once_before_next_increment() {
        let day1 = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("ebay", QuotaScope::Daily, 2, day1));

        ledger.check_and_increment("ebay", day1).unwrap();
        ledger.check_and_increment("ebay", day1).unwrap();
        assert!(ledger.check_and_increment("ebay", day1).is_err());

        // Past midnight: the exhausted counter resets, then counts the call.
        let day2 = at(2026, 8, 8, 0, 5);
        ledger.check_and_increment("ebay", day2).unwrap();

        let counter = &ledger.counters()[0];
        assert_eq!(counter.used, 1);
        assert_eq!(counter.reset_at, at(2026, 8, 9, 0, 0));
    }

    #[test]
    fn test_reset_skips_missed_periods() {
        // Process slept for a week; one reset lands on the boundary
        // after the current instant, not seven stacked resets.
        let start = at(2026, 8, 1, 12, 0);
        let mut counter = QuotaCounter::new("ebay", QuotaScope::Daily, 10, start);
        counter.used = 10;

        let later = at(2026, 8, 8, 3, 0);
        assert!(counter.maybe_reset(later));
        assert_eq!(counter.used, 0);
        assert_eq!(counter.reset_at, at(2026, 8, 9, 0, 0));
        assert!(!counter.maybe_reset(later));
    }

    #[test]
    fn test_remaining_applies_reset_without_consuming() {
        let day1 = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("ebay", QuotaScope::Daily, 5, day1));
        ledger.check_and_increment("ebay", day1).unwrap();
        assert_eq!(ledger.remaining("ebay", day1), Some(4));

        let day2 = at(2026, 8, 8, 1, 0);
        assert_eq!(ledger.remaining("ebay", day2), Some(5));
        // Reading twice changes nothing further.
        assert_eq!(ledger.remaining("ebay", day2), Some(5));
    }

    #[test]
    fn test_remaining_unknown_api() {
        let mut ledger = QuotaLedger::new();
        assert_eq!(ledger.remaining("nope", Utc::now()), None);
    }

    // -- ensure / hydration --

    #[test]
    fn test_ensure_keeps_usage_but_updates_limit() {
        let now = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("ebay", QuotaScope::Daily, 100, now));
        ledger.check_and_increment("ebay", now).unwrap();

        ledger.ensure("ebay", QuotaScope::Daily, 5000, now);
        let counter = &ledger.counters()[0];
        assert_eq!(counter.limit, 5000);
        assert_eq!(counter.used, 1);

        ledger.ensure("metals-api", QuotaScope::Monthly, 50, now);
        assert_eq!(ledger.counters().len(), 2);
    }

    #[test]
    fn test_from_counters_roundtrip() {
        let now = at(2026, 8, 7, 12, 0);
        let mut original = QuotaCounter::new("ebay", QuotaScope::Daily, 10, now);
        original.used = 7;

        let ledger = QuotaLedger::from_counters(vec![original]);
        let restored = &ledger.counters()[0];
        assert_eq!(restored.used, 7);
        assert_eq!(restored.api_name, "ebay");
    }

    // -- Statuses --

    #[test]
    fn test_statuses_sorted_and_computed() {
        let now = at(2026, 8, 7, 12, 0);
        let mut ledger = QuotaLedger::new();
        ledger.register(QuotaCounter::new("metals-api", QuotaScope::Monthly, 50, now));
        ledger.register(QuotaCounter::new("ebay", QuotaScope::Daily, 100, now));
        ledger.check_and_increment("ebay", now).unwrap();

        let statuses = ledger.statuses(now);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].api_name, "ebay");
        assert_eq!(statuses[0].used, 1);
        assert_eq!(statuses[0].remaining, 99);
        assert!((statuses[0].percentage_used - 1.0).abs() < 1e-10);
        assert_eq!(statuses[1].api_name, "metals-api");
        assert_eq!(statuses[1].last_call_at, None);
    }

    #[test]
    fn test_counter_display() {
        let counter = QuotaCounter::new("ebay", QuotaScope::Daily, 100, Utc::now());
        let display = format!("{counter}");
        assert!(display.contains("ebay"));
        assert!(display.contains("0/100"));
        assert!(display.contains("daily"));
    }

    #[test]
    fn test_counter_serialization_roundtrip() {
        let counter = QuotaCounter::new("ebay", QuotaScope::Daily, 100, Utc::now());
        let json = serde_json::to_string(&counter).unwrap();
        let parsed: QuotaCounter = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_name, "ebay");
        assert_eq!(parsed.scope, QuotaScope::Daily);
        assert_eq!(parsed.limit, 100);
    }
}
