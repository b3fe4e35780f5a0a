// src/execution/mod.rs
//! Trade submission boundary: the execute/poll interface of the execution
//! service, and the tracker that follows submitted transactions to
//! completion.

use crate::config::Config;
use crate::error::LiquidatorError;
use crate::types::{SignedOrder, TransactionOutcome};
use async_trait::async_trait;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TransactionStatus {
    pub confirmed: bool,
    pub success: bool,
}

/// Asynchronous submission of a matched order pair. The service behind
/// this trait owns key custody, allowance management and transaction
/// encoding; this crate only requests execution and polls for the result.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_trade(
        &self,
        left_order: &SignedOrder,
        right_order: &SignedOrder,
        gas_price: Decimal,
    ) -> Result<String, LiquidatorError>;

    async fn poll_status(
        &self,
        transaction_hash: &str,
    ) -> Result<TransactionStatus, LiquidatorError>;
}

pub struct HttpTradeExecutor {
    url: String,
    http: reqwest::Client,
}

impl HttpTradeExecutor {
    pub fn new(config: &Arc<Config>) -> Self {
        Self {
            url: config.executor_url.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TradeExecutor for HttpTradeExecutor {
    async fn execute_trade(
        &self,
        left_order: &SignedOrder,
        right_order: &SignedOrder,
        gas_price: Decimal,
    ) -> Result<String, LiquidatorError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ExecuteResponse {
            transaction_hash: String,
        }

        let request = json!({
            "leftOrder": left_order,
            "rightOrder": right_order,
            "gasPrice": gas_price.to_string(),
        });

        let response: ExecuteResponse = self
            .http
            .post(format!("{}/trades", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| LiquidatorError::ExecutionError(format!("execute request: {}", e)))?
            .json()
            .await
            .map_err(|e| LiquidatorError::ExecutionError(format!("execute decode: {}", e)))?;
        Ok(response.transaction_hash)
    }

    async fn poll_status(
        &self,
        transaction_hash: &str,
    ) -> Result<TransactionStatus, LiquidatorError> {
        self.http
            .get(format!("{}/trades/{}/status", self.url, transaction_hash))
            .send()
            .await
            .map_err(|e| LiquidatorError::ExecutionError(format!("status request: {}", e)))?
            .json()
            .await
            .map_err(|e| LiquidatorError::ExecutionError(format!("status decode: {}", e)))
    }
}

/// Follows outstanding transaction hashes until the chain confirms them.
/// The poll loop parks while the outstanding list is empty and wakes on
/// the next registration.
pub struct TransactionTracker {
    executor: Arc<dyn TradeExecutor>,
    poll_rate: Duration,
    outstanding: Arc<Mutex<Vec<String>>>,
    wake: Arc<Notify>,
    outcome_tx: broadcast::Sender<TransactionOutcome>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionTracker {
    pub fn new(executor: Arc<dyn TradeExecutor>, config: &Arc<Config>) -> Self {
        let (outcome_tx, _) = broadcast::channel(64);
        Self {
            executor,
            poll_rate: Duration::from_millis(config.tx_poll_rate_ms),
            outstanding: Arc::new(Mutex::new(Vec::new())),
            wake: Arc::new(Notify::new()),
            outcome_tx,
            poll_task: Mutex::new(None),
        }
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<TransactionOutcome> {
        self.outcome_tx.subscribe()
    }

    /// Register a submitted transaction for confirmation tracking.
    pub async fn track(&self, transaction_hash: &str) {
        let mut outstanding = self.outstanding.lock().await;
        if !outstanding.iter().any(|h| h == transaction_hash) {
            outstanding.push(transaction_hash.to_string());
        }
        drop(outstanding);
        self.wake.notify_one();
    }

    pub async fn start(&self) {
        self.stop().await;

        let executor = Arc::clone(&self.executor);
        let outstanding = Arc::clone(&self.outstanding);
        let wake = Arc::clone(&self.wake);
        let outcome_tx = self.outcome_tx.clone();
        let poll_rate = self.poll_rate;

        let handle = tokio::spawn(async move {
            loop {
                let is_empty = outstanding.lock().await.is_empty();
                if is_empty {
                    // Polling stops here until the next registration.
                    wake.notified().await;
                    continue;
                }
                tokio::time::sleep(poll_rate).await;
                poll_outstanding(executor.as_ref(), &outstanding, &outcome_tx).await;
            }
        });
        *self.poll_task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) async fn poll_once(&self) {
        poll_outstanding(self.executor.as_ref(), &self.outstanding, &self.outcome_tx).await;
    }

    #[cfg(test)]
    pub(crate) async fn outstanding_count(&self) -> usize {
        self.outstanding.lock().await.len()
    }
}

/// One poll cycle: confirmed hashes leave the list and raise an outcome;
/// unconfirmed or unreachable ones stay queued for the next cycle.
async fn poll_outstanding(
    executor: &dyn TradeExecutor,
    outstanding: &Mutex<Vec<String>>,
    outcome_tx: &broadcast::Sender<TransactionOutcome>,
) {
    let hashes = outstanding.lock().await.clone();
    let mut confirmed = Vec::new();

    for transaction_hash in &hashes {
        match executor.poll_status(transaction_hash).await {
            Ok(status) if status.confirmed => {
                info!(
                    "Transaction {} confirmed, success={}",
                    transaction_hash, status.success
                );
                confirmed.push(transaction_hash.clone());
                let _ = outcome_tx.send(TransactionOutcome {
                    transaction_hash: transaction_hash.clone(),
                    success: status.success,
                });
            }
            Ok(_) => {}
            Err(e) => debug!("Status poll for {} failed: {}", transaction_hash, e),
        }
    }

    if !confirmed.is_empty() {
        outstanding
            .lock()
            .await
            .retain(|h| !confirmed.contains(h));
    }
}
