// src/gas/mod.rs
//! Polls the gas price source and caches the current operating gas price.

use crate::config::Config;
use crate::error::LiquidatorError;
use crate::types::pow10;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// 10 gwei, used until the first successful fetch.
const DEFAULT_GAS_PRICE_WEI: u64 = 10_000_000_000;

/// Response shape of the gas price endpoint. Values are gwei multiplied
/// by ten; the "fastest" tier scaled by 10^8 is the operating gas price
/// in wei.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasStationResponse {
    pub fastest: Decimal,
    pub fast: Decimal,
    pub average: Decimal,
    pub safe_low: Decimal,
}

pub struct GasPriceService {
    config: Arc<Config>,
    http: reqwest::Client,
    current: Arc<RwLock<Decimal>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl GasPriceService {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            current: Arc::new(RwLock::new(Decimal::from(DEFAULT_GAS_PRICE_WEI))),
            poll_task: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        self.stop().await;

        // Prime once before the timer so the first evaluations do not run
        // on the default price longer than necessary.
        if let Err(e) = fetch_once(&self.http, &self.config.gas_price_url, &self.current).await {
            warn!("Initial gas price fetch failed: {}", e);
        }

        let http = self.http.clone();
        let url = self.config.gas_price_url.clone();
        let current = Arc::clone(&self.current);
        let poll_rate = Duration::from_millis(self.config.gas_price_poll_rate_ms);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_rate);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = fetch_once(&http, &url, &current).await {
                    // Keep the previous value; retried on the next tick.
                    warn!("Gas price fetch failed: {}", e);
                }
            }
        });

        *self.poll_task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn current_gas_price(&self) -> Decimal {
        *self.current.read().await
    }
}

async fn fetch_once(
    http: &reqwest::Client,
    url: &str,
    current: &RwLock<Decimal>,
) -> Result<(), LiquidatorError> {
    let response: GasStationResponse = http
        .get(url)
        .send()
        .await
        .map_err(|e| LiquidatorError::FeedError(format!("gas price request: {}", e)))?
        .json()
        .await
        .map_err(|e| LiquidatorError::ParseError(format!("gas price response: {}", e)))?;

    let gas_price = response.fastest * pow10(8);
    debug!("Gas price updated to {} wei", gas_price);
    *current.write().await = gas_price;
    Ok(())
}
