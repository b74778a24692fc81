//! Replay source — serves listings from a JSON fixture file.
//!
//! Stands in for a real marketplace client during dry runs and demos:
//! the file holds an array of raw listings, and each fetch filters it
//! by search term the way a keyword search would. The concrete network
//! clients themselves are injected from outside the core.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{ListingSource, RawListing};
use crate::types::ScannerError;

/// A `ListingSource` backed by a fixture file on disk.
///
/// The file is re-read on every fetch so it can be edited between
/// scans without restarting the process.
pub struct ReplaySource {
    name: String,
    path: PathBuf,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    fn load(&self) -> Result<Vec<RawListing>, ScannerError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| ScannerError::SourceUnavailable {
                source_name: self.name.clone(),
                message: format!("cannot read fixture {}: {e}", self.path.display()),
            })?;

        serde_json::from_str(&contents).map_err(|e| ScannerError::SourceUnavailable {
            source_name: self.name.clone(),
            message: format!("cannot parse fixture {}: {e}", self.path.display()),
        })
    }
}

#[async_trait]
impl ListingSource for ReplaySource {
    async fn fetch(
        &self,
        search_terms: &[String],
        max_results: u32,
    ) -> Result<Vec<RawListing>, ScannerError> {
        let all = self.load()?;

        // Keyword filter: keep listings whose title contains any word
        // of any search term. An empty term list passes everything.
        let matches: Vec<RawListing> = if search_terms.is_empty() {
            all
        } else {
            all.into_iter()
                .filter(|listing| {
                    let title = listing.title.to_lowercase();
                    search_terms.iter().any(|term| {
                        term.to_lowercase()
                            .split_whitespace()
                            .any(|word| title.contains(word))
                    })
                })
                .collect()
        };

        let capped: Vec<RawListing> = matches.into_iter().take(max_results as usize).collect();
        debug!(
            source = %self.name,
            count = capped.len(),
            "Replay fixture served"
        );
        Ok(capped)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
