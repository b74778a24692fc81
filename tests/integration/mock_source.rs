//! Mock listing source and pricing client for integration testing.
//!
//! Deterministic, in-memory, fully controllable from test code: known
//! listings per search term, adjustable prices, switchable failures,
//! and call counters for asserting quota behaviour.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use ingot::pricing::PricingClient;
use ingot::sources::{ListingSource, RawListing};
use ingot::types::{MetalType, ScannerError};

// ---------------------------------------------------------------------------
// Listing source
// ---------------------------------------------------------------------------

/// A mock marketplace feed returning a fixed listing set for every
/// search term.
pub struct MockSource {
    name: String,
    listings: Mutex<Vec<RawListing>>,
    force_error: Mutex<Option<String>>,
    fetches: AtomicU32,
}

impl MockSource {
    pub fn new(name: &str, listings: Vec<RawListing>) -> Self {
        Self {
            name: name.to_string(),
            listings: Mutex::new(listings),
            force_error: Mutex::new(None),
            fetches: AtomicU32::new(0),
        }
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, message: &str) {
        *self.force_error.lock().unwrap() = Some(message.to_string());
    }

    /// Replace the served listings (e.g. to simulate a re-sighting
    /// with different data).
    pub fn set_listings(&self, listings: Vec<RawListing>) {
        *self.listings.lock().unwrap() = listings;
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for MockSource {
    async fn fetch(
        &self,
        _search_terms: &[String],
        max_results: u32,
    ) -> Result<Vec<RawListing>, ScannerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.force_error.lock().unwrap().as_ref() {
            return Err(ScannerError::SourceUnavailable {
                source_name: self.name.clone(),
                message: message.clone(),
            });
        }
        let listings = self.listings.lock().unwrap();
        Ok(listings.iter().take(max_results as usize).cloned().collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Pricing client
// ---------------------------------------------------------------------------

/// A mock spot-price feed with adjustable prices and a kill switch.
pub struct MockPricing {
    gold: Mutex<Option<f64>>,
    silver: Mutex<Option<f64>>,
    fetches: AtomicU32,
}

impl MockPricing {
    pub fn new(gold: f64, silver: f64) -> Self {
        Self {
            gold: Mutex::new(Some(gold)),
            silver: Mutex::new(Some(silver)),
            fetches: AtomicU32::new(0),
        }
    }

    /// Make every fetch fail, simulating an outage.
    pub fn go_dark(&self) {
        *self.gold.lock().unwrap() = None;
        *self.silver.lock().unwrap() = None;
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PricingClient for MockPricing {
    async fn fetch(&self, metal: MetalType) -> Result<f64, ScannerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let price = match metal {
            MetalType::Gold => *self.gold.lock().unwrap(),
            MetalType::Silver => *self.silver.lock().unwrap(),
            MetalType::Unknown => None,
        };
        price.ok_or_else(|| ScannerError::Upstream {
            api_name: "mock-pricing".to_string(),
            message: "service unavailable".to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock-pricing"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn raw(external_id: &str, title: &str, price: f64) -> RawListing {
    RawListing {
        external_id: external_id.to_string(),
        title: title.to_string(),
        price,
        url: format!("https://example.com/{external_id}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_source_serves_and_counts() {
        let source = MockSource::new("ebay", vec![raw("1", "1 oz Gold Eagle", 2050.0)]);
        let listings = source.fetch(&["gold".to_string()], 100).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_source_caps_results() {
        let source = MockSource::new(
            "ebay",
            vec![
                raw("1", "1 oz Gold Eagle", 2050.0),
                raw("2", "1 oz Gold Buffalo", 2060.0),
            ],
        );
        let listings = source.fetch(&[], 1).await.unwrap();
        assert_eq!(listings.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_source_forced_error() {
        let source = MockSource::new("ebay", vec![]);
        source.set_error("simulated outage");
        let err = source.fetch(&[], 100).await.unwrap_err();
        assert!(matches!(err, ScannerError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_mock_pricing_go_dark() {
        let pricing = MockPricing::new(2150.0, 25.0);
        assert!((pricing.fetch(MetalType::Gold).await.unwrap() - 2150.0).abs() < 1e-10);

        pricing.go_dark();
        assert!(pricing.fetch(MetalType::Gold).await.is_err());
        assert_eq!(pricing.fetch_count(), 2);
    }
}
