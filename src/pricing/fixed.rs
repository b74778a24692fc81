//! Fixed-price client for dry runs.
//!
//! Serves configured reference prices instead of calling an upstream
//! service. Useful for demos and for running the scanner before a real
//! pricing client is wired in.

use async_trait::async_trait;
use std::collections::HashMap;

use super::PricingClient;
use crate::types::{MetalType, ScannerError};

/// A `PricingClient` that returns configured prices.
pub struct FixedPricingClient {
    prices: HashMap<MetalType, f64>,
}

impl FixedPricingClient {
    pub fn new(prices: HashMap<MetalType, f64>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl PricingClient for FixedPricingClient {
    async fn fetch(&self, metal: MetalType) -> Result<f64, ScannerError> {
        self.prices
            .get(&metal)
            .copied()
            .ok_or_else(|| ScannerError::Upstream {
                api_name: "fixed".to_string(),
                message: format!("no configured price for {metal}"),
            })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
