//! Weight extraction from listing titles.
//!
//! An ordered list of (pattern, unit-conversion-factor) rules tried in
//! sequence; the first rule producing a plausible weight wins. Pure —
//! no I/O, no state — so it is independently testable against a
//! fixture table of (title, expected weight) pairs.
//!
//! Failure to extract is an expected outcome, not an error: it is
//! recorded as a flag on the listing.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Troy ounces per gram.
const GRAMS_TO_TROY_OZ: f64 = 0.032_150_7;

/// Troy ounces per kilogram.
const KILOGRAMS_TO_TROY_OZ: f64 = 32.150_7;

/// Weights outside this range are treated as a mis-parse and the rule
/// scan continues (a "100 year anniversary" coin is not 100 oz).
const MAX_PLAUSIBLE_OZ: f64 = 1000.0;

/// One extraction rule: a pattern and the factor converting its
/// captured magnitude to troy ounces. Patterns with two capture groups
/// are read as a fraction (numerator/denominator).
struct WeightRule {
    regex: Regex,
    to_troy_oz: f64,
}

/// Rules in priority order. The fraction rule is tried before the
/// plain-ounce rule so "1/10 oz" parses as 0.1 rather than 10.
static RULES: LazyLock<Vec<WeightRule>> = LazyLock::new(|| {
    vec![
        // Fractions: "1/10 oz", "1/4 troy ounce"
        WeightRule {
            regex: Regex::new(r"(\d+)\s*/\s*(\d+)\s*(?:troy\s*)?(?:oz|ounce)s?\b").unwrap(),
            to_troy_oz: 1.0,
        },
        // Troy ounces: "1 oz", "1.5 troy ounces", "2oz"
        WeightRule {
            regex: Regex::new(r"(\d+(?:\.\d+)?)\s*(?:troy\s*)?(?:oz|ounce)s?\b").unwrap(),
            to_troy_oz: 1.0,
        },
        // Kilograms: "1 kilo bar", "1kg"
        WeightRule {
            regex: Regex::new(r"(\d+(?:\.\d+)?)\s*(?:kg|kilo(?:gram)?)s?\b").unwrap(),
            to_troy_oz: KILOGRAMS_TO_TROY_OZ,
        },
        // Grams: "10 grams", "5g", "31.1g"
        WeightRule {
            regex: Regex::new(r"(\d+(?:\.\d+)?)\s*g(?:ram)?s?\b").unwrap(),
            to_troy_oz: GRAMS_TO_TROY_OZ,
        },
    ]
});

/// Title → weight extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightParser;

impl WeightParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract a weight in troy ounces from a listing title.
    ///
    /// Returns `(weight_oz, extraction_failed)`; exactly one of the
    /// pair carries information (`Some(w)` with `false`, or `None`
    /// with `true`).
    pub fn parse(&self, title: &str) -> (Option<f64>, bool) {
        let title_lower = title.to_lowercase();

        for rule in RULES.iter() {
            let Some(caps) = rule.regex.captures(&title_lower) else {
                continue;
            };

            let magnitude = if caps.len() == 3 {
                // Fraction rule: numerator / denominator.
                let numerator: f64 = match caps[1].parse() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                let denominator: f64 = match caps[2].parse() {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                if denominator == 0.0 {
                    continue;
                }
                numerator / denominator
            } else {
                match caps[1].parse::<f64>() {
                    Ok(m) => m,
                    Err(_) => continue,
                }
            };

            let weight = magnitude * rule.to_troy_oz;
            if weight <= 0.0 || weight > MAX_PLAUSIBLE_OZ {
                debug!(title, weight, "Implausible weight extracted, trying next rule");
                continue;
            }

            let rounded = (weight * 10_000.0).round() / 10_000.0;
            debug!(title, weight_oz = rounded, "Weight extracted");
            return (Some(rounded), false);
        }

        debug!(title, "No weight pattern matched");
        (None, true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
