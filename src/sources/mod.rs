//! Listing sources.
//!
//! Defines the `ListingSource` trait the orchestrator pulls raw
//! listings through, plus the pure extraction helpers applied to every
//! fetched title (weight parsing, metal classification). Concrete
//! network clients live behind the trait and are out of scope for the
//! core; `ReplaySource` serves fixture files for dry runs and demos.

pub mod classify;
pub mod replay;
pub mod weight;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ScannerError;

/// A listing as returned by a marketplace, before any extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawListing {
    pub external_id: String,
    pub title: String,
    /// Asking price in USD.
    pub price: f64,
    pub url: String,
}

/// Abstraction over marketplace listing feeds.
///
/// Implementors fetch raw listings for a set of search terms. A failed
/// fetch surfaces as `SourceUnavailable` and is recorded on the scan
/// run without aborting it.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch up to `max_results` listings matching the search terms.
    async fn fetch(
        &self,
        search_terms: &[String],
        max_results: u32,
    ) -> Result<Vec<RawListing>, ScannerError>;

    /// Source name for logging and the listing natural key.
    fn name(&self) -> &str;

    /// Which API budget a fetch is charged against. Defaults to the
    /// source name.
    fn quota_api(&self) -> &str {
        self.name()
    }
}
