// src/orders/mod.rs
//! Synchronized local cache of resting conditional orders: persisted
//! across restarts, reconciled against the authoritative REST snapshot,
//! and patched live from the push channel.

pub mod feed;
pub mod matcher;
pub mod store;


use crate::config::Config;
use crate::registry::Network;
use crate::types::{OrderSide, OrderSummary, SignedOrder};
use log::{debug, error, info, warn};
use self::feed::{BookEvent, BookSource, FeedOrderRecord, FeedSide};
use self::matcher::{MatchCandidate, MatchingService};
use self::store::{OrderStore, PersistedOrder};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

const STOP_LIMIT_EXECUTION_TYPE: &str = "STOP-LIMIT";

/// The in-memory projection: every cached order twice, grouped by pair
/// and keyed by hash. Both views mutate together under one lock.
#[derive(Default)]
struct CacheState {
    by_pair: HashMap<String, Vec<OrderSummary>>,
    by_hash: HashMap<String, OrderSummary>,
}

impl CacheState {
    /// Idempotent insert; returns false when the hash is already cached.
    fn insert(&mut self, summary: OrderSummary) -> bool {
        if self.by_hash.contains_key(&summary.order_hash) {
            return false;
        }
        self.by_pair
            .entry(summary.pair_key())
            .or_default()
            .push(summary.clone());
        self.by_hash.insert(summary.order_hash.clone(), summary);
        true
    }

    /// Idempotent removal; returns false when the hash was not cached.
    fn remove(&mut self, order_hash: &str) -> bool {
        match self.by_hash.remove(order_hash) {
            Some(summary) => {
                if let Some(orders) = self.by_pair.get_mut(&summary.pair_key()) {
                    orders.retain(|o| o.order_hash != order_hash);
                }
                true
            }
            None => false,
        }
    }

    fn hashes_for_pair(&self, pair: &str) -> Vec<String> {
        self.by_pair
            .get(pair)
            .map(|orders| orders.iter().map(|o| o.order_hash.clone()).collect())
            .unwrap_or_default()
    }
}

struct CacheInner {
    network: Arc<Network>,
    store: Arc<dyn OrderStore>,
    book_source: Arc<dyn BookSource>,
    matching: Arc<dyn MatchingService>,
    state: RwLock<CacheState>,
    new_order_tx: broadcast::Sender<OrderSummary>,
    started: Arc<AtomicBool>,
    ws_connected: Arc<AtomicBool>,
    synced: AtomicBool,
}

impl CacheInner {
    /// An order is admitted only when it is the conditional kind, both its
    /// tokens resolve in the static token list, and an oracle is
    /// configured for the resolved pair. Anything else is silently
    /// discarded.
    fn resolve_valid_pair(&self, record: &FeedOrderRecord) -> Option<(String, String)> {
        if record.execution_type != STOP_LIMIT_EXECUTION_TYPE {
            return None;
        }
        let base = self.network.token_by_address(&record.base_token_address)?;
        let quote = self.network.token_by_address(&record.quote_token_address)?;
        self.network
            .oracle_for_pair(&base.symbol, &quote.symbol)?;
        Some((base.symbol.clone(), quote.symbol.clone()))
    }

    /// Persist and cache a validated record. Returns the summary when the
    /// order was newly seen; duplicate delivery yields `None`.
    async fn admit(
        &self,
        record: &FeedOrderRecord,
        base_token: &str,
        quote_token: &str,
    ) -> Option<OrderSummary> {
        let order_type = match record.side {
            FeedSide::Bid => OrderSide::Buy,
            FeedSide::Ask => OrderSide::Sell,
        };
        let persisted =
            match PersistedOrder::from_feed_record(record, base_token, quote_token, order_type) {
                Some(persisted) => persisted,
                None => {
                    debug!(
                        "Discarding {} without trigger parameters",
                        record.order_hash
                    );
                    return None;
                }
            };

        if let Err(e) = self.store.insert(&persisted).await {
            error!("Failed to persist order {}: {}", record.order_hash, e);
            return None;
        }

        let summary = persisted.to_summary();
        if self.state.write().await.insert(summary.clone()) {
            info!(
                "New conditional order {} on {}-{}",
                summary.order_hash, base_token, quote_token
            );
            Some(summary)
        } else {
            None
        }
    }

    /// Remove from store and cache. Safe to call for unknown hashes.
    async fn evict(&self, order_hash: &str) {
        if let Err(e) = self.store.delete(order_hash).await {
            error!("Failed to delete order {}: {}", order_hash, e);
            return;
        }
        if self.state.write().await.remove(order_hash) {
            debug!("Order {} removed", order_hash);
        }
    }

    /// Apply one push delta. Both arms are idempotent under duplicate
    /// delivery, which also makes a delta arriving mid-reconciliation
    /// safe.
    async fn apply_book_event(&self, event: BookEvent) {
        match event {
            BookEvent::New { market, record } => {
                let cached = self
                    .state
                    .read()
                    .await
                    .by_hash
                    .contains_key(&record.order_hash);
                if cached {
                    return;
                }
                if let Some((base_token, quote_token)) = self.resolve_valid_pair(&record) {
                    if let Some(summary) = self.admit(&record, &base_token, &quote_token).await {
                        let _ = self.new_order_tx.send(summary);
                    }
                } else {
                    debug!("Ignoring invalid order {} on {}", record.order_hash, market);
                }
            }
            BookEvent::Remove { order_hash, .. } => {
                let cached = self.state.read().await.by_hash.contains_key(&order_hash);
                if cached {
                    self.evict(&order_hash).await;
                }
            }
        }
    }

    /// One reconciliation pass: per tracked pair, fetch the authoritative
    /// snapshot, admit valid unseen orders, and evict everything the
    /// snapshot no longer contains. A failing pair is skipped so its
    /// siblings still converge.
    async fn reconcile(&self) {
        let now_seconds = chrono::Utc::now().timestamp();

        for oracle in &self.network.oracles {
            let pair = oracle.pair_key();
            let snapshot = match self.book_source.fetch_stop_limit_book(&pair).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Snapshot fetch for {} failed: {}", pair, e);
                    continue;
                }
            };

            let mut found: HashSet<String> = HashSet::new();
            for record in snapshot.bids.iter().chain(snapshot.asks.iter()) {
                found.insert(record.order_hash.clone());

                let cached = self
                    .state
                    .read()
                    .await
                    .by_hash
                    .contains_key(&record.order_hash);
                if cached {
                    continue;
                }
                if let Some((base_token, quote_token)) = self.resolve_valid_pair(record) {
                    if let Some(summary) = self.admit(record, &base_token, &quote_token).await {
                        let _ = self.new_order_tx.send(summary);
                    }
                }
            }

            // Opportunistic expiry cull: expired rows go even if the feed
            // still lists them.
            match self
                .store
                .find_for_pair(&oracle.base_token, &oracle.quote_token)
                .await
            {
                Ok(persisted) => {
                    for order in persisted {
                        if order.is_expired(now_seconds) {
                            found.remove(&order.order_hash);
                        }
                    }
                }
                Err(e) => warn!("Expiry scan for {} failed: {}", pair, e),
            }

            let cached_hashes = self.state.read().await.hashes_for_pair(&pair);
            for order_hash in cached_hashes {
                if !found.contains(&order_hash) {
                    self.evict(&order_hash).await;
                }
            }
        }

        self.synced.store(true, Ordering::SeqCst);
    }

    /// Load the persisted cache, culling rows that expired while the
    /// process was down. Loaded orders are known, not new: nothing is
    /// emitted.
    async fn load_cached_orders(&self) {
        let now_seconds = chrono::Utc::now().timestamp();

        for oracle in &self.network.oracles {
            let persisted = match self
                .store
                .find_for_pair(&oracle.base_token, &oracle.quote_token)
                .await
            {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!("Cache load for {} failed: {}", oracle.pair_key(), e);
                    continue;
                }
            };

            for order in persisted {
                if order.is_expired(now_seconds) {
                    if let Err(e) = self.store.delete(&order.order_hash).await {
                        error!("Failed to cull expired order {}: {}", order.order_hash, e);
                    }
                    continue;
                }
                self.state.write().await.insert(order.to_summary());
            }
        }
    }
}

pub struct OrderCache {
    config: Arc<Config>,
    inner: Arc<CacheInner>,
    ws_task: Mutex<Option<JoinHandle<()>>>,
    delta_task: Mutex<Option<JoinHandle<()>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl OrderCache {
    pub fn new(
        config: Arc<Config>,
        network: Arc<Network>,
        store: Arc<dyn OrderStore>,
        book_source: Arc<dyn BookSource>,
        matching: Arc<dyn MatchingService>,
    ) -> Self {
        let (new_order_tx, _) = broadcast::channel(256);
        Self {
            config,
            inner: Arc::new(CacheInner {
                network,
                store,
                book_source,
                matching,
                state: RwLock::new(CacheState::default()),
                new_order_tx,
                started: Arc::new(AtomicBool::new(false)),
                ws_connected: Arc::new(AtomicBool::new(false)),
                synced: AtomicBool::new(false),
            }),
            ws_task: Mutex::new(None),
            delta_task: Mutex::new(None),
            sync_task: Mutex::new(None),
        }
    }

    pub fn subscribe_new_orders(&self) -> broadcast::Receiver<OrderSummary> {
        self.inner.new_order_tx.subscribe()
    }

    /// Load the persisted cache, open the push connection, then converge
    /// once against the REST snapshot before the periodic timer takes
    /// over.
    pub async fn start(&self) {
        self.stop().await;
        self.inner.started.store(true, Ordering::SeqCst);

        self.inner.load_cached_orders().await;

        let (events_tx, mut events_rx) = mpsc::channel(256);
        let ws_handle = feed::spawn_book_stream(
            Arc::clone(&self.config),
            events_tx,
            Arc::clone(&self.inner.ws_connected),
            Arc::clone(&self.inner.started),
        );
        *self.ws_task.lock().await = Some(ws_handle);

        let inner = Arc::clone(&self.inner);
        let delta_handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                inner.apply_book_event(event).await;
            }
        });
        *self.delta_task.lock().await = Some(delta_handle);

        self.inner.reconcile().await;

        let inner = Arc::clone(&self.inner);
        let poll_rate = Duration::from_millis(self.config.api_poll_rate_ms);
        let sync_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_rate);
            interval.tick().await;
            loop {
                interval.tick().await;
                inner.reconcile().await;
            }
        });
        *self.sync_task.lock().await = Some(sync_handle);
    }

    pub async fn stop(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        for task in [&self.ws_task, &self.delta_task, &self.sync_task] {
            if let Some(handle) = task.lock().await.take() {
                handle.abort();
            }
        }
        self.inner.ws_connected.store(false, Ordering::SeqCst);
    }

    /// True only once the initial reconciliation has succeeded and the
    /// push connection is currently open. Consumers must not act on a
    /// cache known to be incomplete or stale.
    pub fn is_connected(&self) -> bool {
        self.inner.synced.load(Ordering::SeqCst)
            && self.inner.ws_connected.load(Ordering::SeqCst)
    }

    pub async fn get_orders(&self, base_token: &str, quote_token: &str) -> Vec<OrderSummary> {
        self.inner
            .state
            .read()
            .await
            .by_pair
            .get(&crate::types::pair_key(base_token, quote_token))
            .cloned()
            .unwrap_or_default()
    }

    /// Counter-orders for the given candidates. A matching-service
    /// failure degrades to an empty map; the cycle retries later.
    pub async fn match_candidates(
        &self,
        orders: &[OrderSummary],
    ) -> HashMap<String, MatchCandidate> {
        match self.inner.matching.find_matches(orders).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Matching service unavailable: {}", e);
                HashMap::new()
            }
        }
    }

    /// The full signed order behind a cached summary.
    pub async fn signed_order(&self, order_hash: &str) -> Option<SignedOrder> {
        match self.inner.store.find_by_hash(order_hash).await {
            Ok(order) => order.map(|o| o.signed_order),
            Err(e) => {
                error!("Signed order lookup for {} failed: {}", order_hash, e);
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn apply_book_event(&self, event: BookEvent) {
        self.inner.apply_book_event(event).await
    }

    #[cfg(test)]
    pub(crate) async fn reconcile_once(&self) {
        self.inner.reconcile().await
    }

    #[cfg(test)]
    pub(crate) async fn load_cached(&self) {
        self.inner.load_cached_orders().await
    }

    #[cfg(test)]
    pub(crate) fn mark_connected(&self) {
        self.inner.synced.store(true, Ordering::SeqCst);
        self.inner.ws_connected.store(true, Ordering::SeqCst);
    }
}
