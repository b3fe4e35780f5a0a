// src/liquidator/mod.rs
//! The coordinator: reacts to price updates and new orders, evaluates
//! profitability, submits matched pairs for execution and tracks each
//! submission until the chain confirms it.

#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::execution::{TradeExecutor, TransactionTracker};
use crate::gas::GasPriceService;
use crate::oracle::OraclePriceService;
use crate::orders::OrderCache;
use crate::profit::{evaluate_match, evaluate_order, GasCosts};
use crate::registry::Network;
use crate::types::{OrderSummary, PendingLiquidation, PriceUpdate, TransactionOutcome};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidatorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct LiquidatorInner {
    config: Arc<Config>,
    network: Arc<Network>,
    gas_service: Arc<GasPriceService>,
    oracle_service: Arc<OraclePriceService>,
    order_cache: Arc<OrderCache>,
    executor: Arc<dyn TradeExecutor>,
    tracker: Arc<TransactionTracker>,
    gas_costs: GasCosts,
    state: RwLock<LiquidatorState>,
    pending: RwLock<HashMap<String, PendingLiquidation>>,
    /// Orders already reported as unprofitable; the notice fires at most
    /// once per order per process lifetime, not on every price tick.
    noticed_unprofitable: Mutex<HashSet<String>>,
}

impl LiquidatorInner {
    async fn is_running(&self) -> bool {
        *self.state.read().await == LiquidatorState::Running
    }

    async fn on_price_update(&self, update: PriceUpdate) {
        if !self.is_running().await || !self.order_cache.is_connected() {
            return;
        }
        let orders = self
            .order_cache
            .get_orders(&update.base_token, &update.quote_token)
            .await;
        if orders.is_empty() {
            return;
        }
        self.process_candidates(&update.base_token, &update.quote_token, update.price, orders)
            .await;
    }

    async fn on_new_order(&self, order: OrderSummary) {
        if !self.is_running().await || !self.order_cache.is_connected() {
            return;
        }
        let price = match self
            .oracle_service
            .get_last_price(&order.base_token, &order.quote_token)
        {
            Some(price) => price,
            None => return,
        };
        let base_token = order.base_token.clone();
        let quote_token = order.quote_token.clone();
        self.process_candidates(&base_token, &quote_token, price, vec![order])
            .await;
    }

    async fn on_transaction_complete(&self, outcome: TransactionOutcome) {
        match self
            .pending
            .write()
            .await
            .remove(&outcome.transaction_hash)
        {
            Some(liquidation) => info!(
                "Liquidation on {}-{} complete ({}): success={}, fiat profit {} {}",
                liquidation.base_token,
                liquidation.quote_token,
                outcome.transaction_hash,
                outcome.success,
                liquidation.fiat_profit,
                self.config.profit_asset
            ),
            // Completions for unknown hashes are a defensive no-op.
            None => debug!(
                "Completion for untracked transaction {}",
                outcome.transaction_hash
            ),
        }
    }

    /// The shared pipeline behind both event handlers: filter candidates
    /// by order-level profitability, match the survivors, re-evaluate
    /// each matched pair on the realized fill, and submit what clears the
    /// bar.
    async fn process_candidates(
        &self,
        base_token: &str,
        quote_token: &str,
        price: Decimal,
        orders: Vec<OrderSummary>,
    ) {
        let token_fiat_price = match self
            .oracle_service
            .get_token_fiat_price(base_token, &self.config.profit_asset)
        {
            Some(price) => price,
            None => return,
        };
        let eth_fiat_price = match self
            .oracle_service
            .get_token_fiat_price("WETH", &self.config.profit_asset)
        {
            Some(price) => price,
            None => return,
        };

        let is_inverse = match self.network.oracle_for_pair(base_token, quote_token) {
            Some(oracle) => oracle.is_inverse,
            None => return,
        };
        let gas_price = self.gas_service.current_gas_price().await;

        let mut candidates = Vec::new();
        for order in orders {
            let result = evaluate_order(
                &order,
                price,
                gas_price,
                eth_fiat_price,
                token_fiat_price,
                self.config.minimum_profit_percent,
                &self.gas_costs,
                &self.network,
                is_inverse,
            );
            if result.is_profitable {
                candidates.push(order);
            } else {
                self.notice_unprofitable(&order.order_hash, result.fiat_profit)
                    .await;
            }
        }
        if candidates.is_empty() {
            return;
        }

        let matches = self.order_cache.match_candidates(&candidates).await;

        for order in &candidates {
            let candidate = match matches.get(&order.order_hash) {
                Some(candidate) => candidate,
                None => continue,
            };
            if candidate.fill_amount <= Decimal::ZERO {
                debug!("No fillable amount for order {}", order.order_hash);
                continue;
            }

            let stop_limit_order = match self.order_cache.signed_order(&order.order_hash).await {
                Some(signed) => signed,
                None => continue,
            };

            let result = evaluate_match(
                &stop_limit_order,
                &candidate.counter_order,
                gas_price,
                eth_fiat_price,
                token_fiat_price,
                self.config.minimum_profit_percent,
                &self.gas_costs,
                &self.network,
                is_inverse,
            );
            if !result.is_profitable {
                self.notice_unprofitable(&order.order_hash, result.fiat_profit)
                    .await;
                continue;
            }

            // A failed submission is logged and skipped; the remaining
            // matched pairs in this batch still go out, and bookkeeping
            // already recorded for them stays.
            match self
                .executor
                .execute_trade(&stop_limit_order, &candidate.counter_order, gas_price)
                .await
            {
                Ok(transaction_hash) => {
                    info!(
                        "Submitted liquidation of {} on {}-{} as {} (expected profit {} {})",
                        order.order_hash,
                        base_token,
                        quote_token,
                        transaction_hash,
                        result.fiat_profit,
                        self.config.profit_asset
                    );
                    self.pending.write().await.insert(
                        transaction_hash.clone(),
                        PendingLiquidation {
                            transaction_hash: transaction_hash.clone(),
                            base_token: base_token.to_string(),
                            quote_token: quote_token.to_string(),
                            fiat_profit: result.fiat_profit,
                        },
                    );
                    self.tracker.track(&transaction_hash).await;
                }
                Err(e) => {
                    error!("Execution of order {} failed: {}", order.order_hash, e);
                }
            }
        }
    }

    async fn notice_unprofitable(&self, order_hash: &str, fiat_profit: Decimal) {
        let mut noticed = self.noticed_unprofitable.lock().await;
        if noticed.insert(order_hash.to_string()) {
            info!(
                "Order {} is not profitable to execute (net {} {})",
                order_hash, fiat_profit, self.config.profit_asset
            );
        }
    }
}

pub struct Liquidator {
    inner: Arc<LiquidatorInner>,
    event_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Liquidator {
    pub fn new(
        config: Arc<Config>,
        network: Arc<Network>,
        gas_service: Arc<GasPriceService>,
        oracle_service: Arc<OraclePriceService>,
        order_cache: Arc<OrderCache>,
        executor: Arc<dyn TradeExecutor>,
        tracker: Arc<TransactionTracker>,
    ) -> Self {
        let gas_costs = GasCosts::from_config(&config);
        Self {
            inner: Arc::new(LiquidatorInner {
                config,
                network,
                gas_service,
                oracle_service,
                order_cache,
                executor,
                tracker,
                gas_costs,
                state: RwLock::new(LiquidatorState::Stopped),
                pending: RwLock::new(HashMap::new()),
                noticed_unprofitable: Mutex::new(HashSet::new()),
            }),
            event_tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> LiquidatorState {
        *self.inner.state.read().await
    }

    pub async fn pending_liquidation(&self, transaction_hash: &str) -> Option<PendingLiquidation> {
        self.inner
            .pending
            .read()
            .await
            .get(transaction_hash)
            .cloned()
    }

    /// Start every service and the event loops, then replay cached
    /// prices once so decisions do not wait for the next live update.
    /// Safe to call while running: the previous cycle is stopped first.
    pub async fn start(&self) {
        if self.inner.is_running().await {
            self.stop().await;
        }
        *self.inner.state.write().await = LiquidatorState::Starting;
        info!("Liquidator starting");

        self.inner.gas_service.start().await;
        self.inner.oracle_service.start().await;
        self.inner.order_cache.start().await;
        self.inner.tracker.start().await;

        let mut tasks = self.event_tasks.lock().await;

        let inner = Arc::clone(&self.inner);
        let mut price_rx = self.inner.oracle_service.subscribe_prices();
        tasks.push(tokio::spawn(async move {
            loop {
                match price_rx.recv().await {
                    Ok(update) => inner.on_price_update(update).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Price loop lagged, {} updates dropped", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut order_rx = self.inner.order_cache.subscribe_new_orders();
        tasks.push(tokio::spawn(async move {
            loop {
                match order_rx.recv().await {
                    Ok(order) => inner.on_new_order(order).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Order loop lagged, {} orders dropped", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut outcome_rx = self.inner.tracker.subscribe_outcomes();
        tasks.push(tokio::spawn(async move {
            loop {
                match outcome_rx.recv().await {
                    Ok(outcome) => inner.on_transaction_complete(outcome).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Completion loop lagged, {} outcomes dropped", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        drop(tasks);

        *self.inner.state.write().await = LiquidatorState::Running;

        // One replay per start cycle, after the handlers are live.
        self.inner.oracle_service.trigger_all();
        info!("Liquidator running");
    }

    /// Stop services and event loops. Already-submitted transactions stay
    /// registered with the tracker and resume on the next start.
    pub async fn stop(&self) {
        *self.inner.state.write().await = LiquidatorState::Stopping;

        self.inner.gas_service.stop().await;
        self.inner.oracle_service.stop().await;
        self.inner.order_cache.stop().await;
        self.inner.tracker.stop().await;

        for handle in self.event_tasks.lock().await.drain(..) {
            handle.abort();
        }

        *self.inner.state.write().await = LiquidatorState::Stopped;
        info!("Liquidator stopped");
    }

    #[cfg(test)]
    pub(crate) async fn set_state_for_tests(&self, state: LiquidatorState) {
        *self.inner.state.write().await = state;
    }

    #[cfg(test)]
    pub(crate) async fn handle_price_update(&self, update: PriceUpdate) {
        self.inner.on_price_update(update).await
    }

    #[cfg(test)]
    pub(crate) async fn handle_new_order(&self, order: OrderSummary) {
        self.inner.on_new_order(order).await
    }

    #[cfg(test)]
    pub(crate) async fn handle_transaction_complete(&self, outcome: TransactionOutcome) {
        self.inner.on_transaction_complete(outcome).await
    }

    #[cfg(test)]
    pub(crate) async fn noticed_count(&self) -> usize {
        self.inner.noticed_unprofitable.lock().await.len()
    }
}
