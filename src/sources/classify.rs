//! Metal classification from listing titles.
//!
//! A configured keyword table tried against the lowercased title, then
//! against the search term that produced the listing. No match falls
//! to the `Unknown` sentinel — such listings are stored but never
//! priced.

use crate::types::MetalType;
use std::collections::HashMap;
use tracing::warn;

/// Keyword-table classifier. Metals are tried in a fixed order (gold
/// before silver) so a title mentioning both resolves deterministically.
#[derive(Debug, Clone)]
pub struct MetalClassifier {
    /// (metal, lowercased keywords), ordered by metal.
    table: Vec<(MetalType, Vec<String>)>,
}

impl Default for MetalClassifier {
    fn default() -> Self {
        Self::new(vec![
            (MetalType::Gold, vec!["gold".to_string()]),
            (MetalType::Silver, vec!["silver".to_string()]),
        ])
    }
}

impl MetalClassifier {
    pub fn new(mut table: Vec<(MetalType, Vec<String>)>) -> Self {
        for (_, keywords) in table.iter_mut() {
            for kw in keywords.iter_mut() {
                *kw = kw.to_lowercase();
            }
        }
        table.sort_by_key(|(metal, _)| *metal);
        Self { table }
    }

    /// Build from the configuration map (metal name → keyword list).
    /// Unparseable metal names are skipped with a warning.
    pub fn from_config(keywords: &HashMap<String, Vec<String>>) -> Self {
        let mut table = Vec::new();
        for (metal_name, kws) in keywords {
            match metal_name.parse::<MetalType>() {
                Ok(metal) if metal != MetalType::Unknown => {
                    table.push((metal, kws.clone()));
                }
                _ => warn!(metal = %metal_name, "Ignoring keyword table entry for unknown metal"),
            }
        }
        if table.is_empty() {
            return Self::default();
        }
        Self::new(table)
    }

    /// Resolve the metal for a listing: title keywords first, then the
    /// search term, else `Unknown`.
    pub fn resolve(&self, title: &str, search_term: &str) -> MetalType {
        let title_lower = title.to_lowercase();
        for (metal, keywords) in &self.table {
            if keywords.iter().any(|kw| title_lower.contains(kw)) {
                return *metal;
            }
        }

        let term_lower = search_term.to_lowercase();
        for (metal, keywords) in &self.table {
            if keywords.iter().any(|kw| term_lower.contains(kw)) {
                return *metal;
            }
        }

        MetalType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
