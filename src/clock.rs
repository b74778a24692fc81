//! Market clock — maps wall-clock time to a caching regime.
//!
//! Pure and deterministic: the regime is a function of (timestamp,
//! configured UTC offset, open/close boundaries) and never reads the
//! ambient process time zone. The offset is fixed (no DST shifts);
//! a DST change requires a configuration update.
//!
//! Boundary rule: closed at open, open at close. The instant of
//! market open is `MarketHours`; the instant of market close is
//! `OffHours`.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Cache-TTL bucket selected by the trading-hours rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    MarketHours,
    OffHours,
    Weekend,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::MarketHours => write!(f, "market_hours"),
            Regime::OffHours => write!(f, "off_hours"),
            Regime::Weekend => write!(f, "weekend"),
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Trading-window configuration, evaluated in a fixed local offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketClock {
    /// Offset of the exchange's local time from UTC, in minutes
    /// (e.g. -300 for US Eastern standard time).
    pub utc_offset_minutes: i32,
    pub open_hour: u32,
    pub open_minute: u32,
    pub close_hour: u32,
    pub close_minute: u32,
}

impl Default for MarketClock {
    /// NYSE-style window: Mon–Fri 9:30–16:00, US Eastern (standard time).
    fn default() -> Self {
        Self {
            utc_offset_minutes: -300,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        }
    }
}

impl MarketClock {
    /// Classify `now` into a regime. Pure — no I/O, no ambient state.
    pub fn regime(&self, now: DateTime<Utc>) -> Regime {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let local = now.with_timezone(&offset);

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Regime::Weekend;
        }

        let minute_of_day = local.hour() * 60 + local.minute();
        let open = self.open_hour * 60 + self.open_minute;
        let close = self.close_hour * 60 + self.close_minute;

        // Closed interval at open, open interval at close.
        if minute_of_day >= open && minute_of_day < close {
            Regime::MarketHours
        } else {
            Regime::OffHours
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
