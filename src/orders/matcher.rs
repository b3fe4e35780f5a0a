// src/orders/matcher.rs
//! Client for the external matching service that proposes counter-orders
//! for triggered conditional orders.

use crate::config::Config;
use crate::error::LiquidatorError;
use crate::types::{OrderSummary, SignedOrder};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// A proposed fill for one conditional order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub counter_order: SignedOrder,
    #[serde(with = "rust_decimal::serde::str")]
    pub fill_amount: Decimal,
}

#[async_trait]
pub trait MatchingService: Send + Sync {
    /// Counter-orders for the given candidates, keyed by order hash.
    /// Orders the service cannot match are simply absent from the map.
    async fn find_matches(
        &self,
        orders: &[OrderSummary],
    ) -> Result<HashMap<String, MatchCandidate>, LiquidatorError>;
}

pub struct HttpMatchingService {
    url: String,
    chain_id: u64,
    http: reqwest::Client,
}

impl HttpMatchingService {
    pub fn new(config: &Arc<Config>) -> Self {
        Self {
            url: config.matcher_url.clone(),
            chain_id: config.chain_id,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MatchingService for HttpMatchingService {
    async fn find_matches(
        &self,
        orders: &[OrderSummary],
    ) -> Result<HashMap<String, MatchCandidate>, LiquidatorError> {
        let order_hashes: Vec<&str> = orders.iter().map(|o| o.order_hash.as_str()).collect();
        let request = json!({
            "chainId": self.chain_id,
            "orderHashes": order_hashes,
        });

        self.http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LiquidatorError::MatchingError(format!("match request: {}", e)))?
            .json()
            .await
            .map_err(|e| LiquidatorError::MatchingError(format!("match decode: {}", e)))
    }
}
