// src/oracle/mod.rs
//! Tracks the latest observed price for every configured oracle pair,
//! normalizes inverse quotes, and derives fiat conversions through the
//! WETH anchor.

pub mod client;

use crate::config::Config;
use crate::types::{pair_key, pow10, Oracle, PriceUpdate};
use self::client::OracleClient;
use dashmap::DashMap;
use log::{debug, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Normalize an inverse-quoted raw price: scale down to a decimal value,
/// invert, scale back to the oracle's fixed-point convention. Computed
/// stepwise so no 10^(2s) intermediate is materialized.
pub fn invert_price(raw: Decimal, scale: u32) -> Decimal {
    let unit = pow10(scale);
    (Decimal::ONE / (raw / unit)) * unit
}

struct PriceState {
    oracles: Vec<Oracle>,
    last_prices: DashMap<String, Decimal>,
    price_tx: broadcast::Sender<PriceUpdate>,
}

impl PriceState {
    fn oracle_by_address(&self, address: &str) -> Option<&Oracle> {
        let wanted = address.to_lowercase();
        self.oracles
            .iter()
            .find(|o| o.address.to_lowercase() == wanted)
    }

    /// Shared update path for both the push subscription and the polling
    /// refresh. Caches and emits only when the normalized value actually
    /// changed; fiat oracles never emit.
    fn apply_answer(&self, oracle: &Oracle, raw_price: Decimal) {
        if raw_price <= Decimal::ZERO {
            return;
        }
        let price = if oracle.is_inverse {
            invert_price(raw_price, oracle.scale())
        } else {
            raw_price
        };

        let key = oracle.pair_key();
        if self.last_prices.get(&key).map(|p| *p) == Some(price) {
            return;
        }
        self.last_prices.insert(key.clone(), price);
        debug!("Price updated for {}: {}", key, price);

        if !oracle.is_fiat {
            let _ = self.price_tx.send(PriceUpdate {
                base_token: oracle.base_token.clone(),
                quote_token: oracle.quote_token.clone(),
                price,
            });
        }
    }

    /// One polling pass over every oracle. A failing oracle is logged and
    /// skipped so its siblings still refresh.
    async fn refresh_all(&self, client: &dyn OracleClient) {
        for oracle in &self.oracles {
            match client.latest_answer(&oracle.address).await {
                Ok(raw_price) => self.apply_answer(oracle, raw_price),
                Err(e) => warn!("Oracle {} refresh failed: {}", oracle.name, e),
            }
        }
    }
}

pub struct OraclePriceService {
    config: Arc<Config>,
    client: Arc<dyn OracleClient>,
    state: Arc<PriceState>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl OraclePriceService {
    pub fn new(config: Arc<Config>, oracles: Vec<Oracle>, client: Arc<dyn OracleClient>) -> Self {
        let (price_tx, _) = broadcast::channel(256);
        Self {
            config,
            client,
            state: Arc::new(PriceState {
                oracles,
                last_prices: DashMap::new(),
                price_tx,
            }),
            refresh_task: Mutex::new(None),
            listen_task: Mutex::new(None),
        }
    }

    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceUpdate> {
        self.state.price_tx.subscribe()
    }

    /// Open the push subscription and start the refresh timer. A failed
    /// subscription is not fatal: the polling refresh covers it.
    pub async fn start(&self) {
        self.stop().await;

        let addresses: Vec<String> = self
            .state
            .oracles
            .iter()
            .map(|o| o.address.clone())
            .collect();

        match self.client.subscribe(&addresses).await {
            Ok(mut rx) => {
                let state = Arc::clone(&self.state);
                let handle = tokio::spawn(async move {
                    while let Some(answer) = rx.recv().await {
                        match state.oracle_by_address(&answer.oracle_address) {
                            Some(oracle) => state.apply_answer(oracle, answer.price),
                            None => debug!(
                                "Dropping answer from untracked oracle {}",
                                answer.oracle_address
                            ),
                        }
                    }
                });
                *self.listen_task.lock().await = Some(handle);
            }
            Err(e) => warn!("Oracle subscription unavailable, relying on polling: {}", e),
        }

        // Prime the cache so a trigger_all replay right after start has
        // prices to re-emit.
        self.state.refresh_all(self.client.as_ref()).await;

        let state = Arc::clone(&self.state);
        let client = Arc::clone(&self.client);
        let poll_rate = Duration::from_millis(self.config.oracle_poll_rate_ms);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_rate);
            interval.tick().await;
            loop {
                interval.tick().await;
                state.refresh_all(client.as_ref()).await;
            }
        });
        *self.refresh_task.lock().await = Some(handle);
    }

    /// Cancels the subscription and the refresh timer unconditionally,
    /// even when only one of the two was established.
    pub async fn stop(&self) {
        if let Some(handle) = self.listen_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.refresh_task.lock().await.take() {
            handle.abort();
        }
    }

    pub fn get_last_price(&self, base_token: &str, quote_token: &str) -> Option<Decimal> {
        self.state
            .last_prices
            .get(&pair_key(base_token, quote_token))
            .map(|p| *p)
    }

    /// Price of `token` in `fiat_asset`, anchored through WETH: WETH→fiat
    /// first (directly for USD, through the fiat's USD cross rate
    /// otherwise), then token→WETH multiplied in. `None` when any link of
    /// the chain has no cached price.
    pub fn get_token_fiat_price(&self, token: &str, fiat_asset: &str) -> Option<Decimal> {
        let weth_usd = self.get_last_price("WETH", "USD")? / pow10(8);

        let weth_fiat = if fiat_asset == "USD" {
            weth_usd
        } else {
            let fiat_usd = self.get_last_price(fiat_asset, "USD")? / pow10(8);
            weth_usd * fiat_usd
        };

        if token == "WETH" {
            return Some(weth_fiat);
        }

        let token_weth = self.get_last_price(token, "WETH")? / pow10(18);
        Some(token_weth * weth_fiat)
    }

    #[cfg(test)]
    pub(crate) fn inject_answer(&self, oracle_address: &str, raw_price: Decimal) {
        if let Some(oracle) = self.state.oracle_by_address(oracle_address) {
            self.state.apply_answer(oracle, raw_price);
        }
    }

    /// Re-emit the last known price for every non-fiat pair that has one.
    /// Used to prime downstream consumers without waiting for a live
    /// update.
    pub fn trigger_all(&self) {
        for oracle in &self.state.oracles {
            if oracle.is_fiat {
                continue;
            }
            if let Some(price) = self.state.last_prices.get(&oracle.pair_key()) {
                let _ = self.state.price_tx.send(PriceUpdate {
                    base_token: oracle.base_token.clone(),
                    quote_token: oracle.quote_token.clone(),
                    price: *price,
                });
            }
        }
    }
}
