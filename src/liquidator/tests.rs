use super::*;
use crate::config::Config;
use crate::error::LiquidatorError;
use crate::execution::{TradeExecutor, TransactionStatus, TransactionTracker};
use crate::gas::GasPriceService;
use crate::oracle::client::{OracleAnswer, OracleClient};
use crate::oracle::OraclePriceService;
use crate::orders::feed::test_fixtures::stop_limit_record;
use crate::orders::feed::{BookEvent, BookSource, OrderbookSnapshot};
use crate::orders::matcher::{MatchCandidate, MatchingService};
use crate::orders::store::MemoryOrderStore;
use crate::orders::OrderCache;
use crate::registry::load_network;
use crate::types::{SignedOrder, NULL_ADDRESS};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

const ETH_USD_ORACLE: &str = "0x5f4ec3df9cbd43714fe2740f5e3616155c5b8419";
const DAI_WETH_ORACLE: &str = "0x773616e4d11a78f511299002da57a0a94577f1f4";
const DAI_ASSET_DATA: &str =
    "0xf47261b00000000000000000000000006b175474e89094c44da98b954eedeac495271d0f";
const WETH_ASSET_DATA: &str =
    "0xf47261b0000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

struct NoopOracleClient;

#[async_trait]
impl OracleClient for NoopOracleClient {
    async fn latest_answer(&self, _oracle_address: &str) -> Result<Decimal, LiquidatorError> {
        Err(LiquidatorError::OracleError("offline".to_string()))
    }

    async fn subscribe(
        &self,
        _oracle_addresses: &[String],
    ) -> Result<mpsc::Receiver<OracleAnswer>, LiquidatorError> {
        Err(LiquidatorError::WebSocketError("offline".to_string()))
    }
}

struct NoopBookSource;

#[async_trait]
impl BookSource for NoopBookSource {
    async fn fetch_stop_limit_book(
        &self,
        market: &str,
    ) -> Result<OrderbookSnapshot, LiquidatorError> {
        Err(LiquidatorError::FeedError(format!("no book for {}", market)))
    }
}

#[derive(Default)]
struct StubMatcher {
    matches: Mutex<HashMap<String, MatchCandidate>>,
}

impl StubMatcher {
    async fn set_match(&self, order_hash: &str, candidate: MatchCandidate) {
        self.matches
            .lock()
            .await
            .insert(order_hash.to_string(), candidate);
    }
}

#[async_trait]
impl MatchingService for StubMatcher {
    async fn find_matches(
        &self,
        orders: &[OrderSummary],
    ) -> Result<HashMap<String, MatchCandidate>, LiquidatorError> {
        let matches = self.matches.lock().await;
        Ok(orders
            .iter()
            .filter_map(|o| {
                matches
                    .get(&o.order_hash)
                    .map(|c| (o.order_hash.clone(), c.clone()))
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingExecutor {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

#[async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute_trade(
        &self,
        _left_order: &SignedOrder,
        _right_order: &SignedOrder,
        _gas_price: Decimal,
    ) -> Result<String, LiquidatorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LiquidatorError::ExecutionError("reverted".to_string()));
        }
        Ok(format!("0xtx{}", call))
    }

    async fn poll_status(
        &self,
        _transaction_hash: &str,
    ) -> Result<TransactionStatus, LiquidatorError> {
        Err(LiquidatorError::ExecutionError("not confirmed".to_string()))
    }
}

struct Harness {
    liquidator: Liquidator,
    cache: Arc<OrderCache>,
    oracle: Arc<OraclePriceService>,
    matcher: Arc<StubMatcher>,
    executor: Arc<RecordingExecutor>,
}

fn harness() -> Harness {
    let config = Arc::new(Config::test_defaults());
    let network = Arc::new(load_network(1, None).expect("mainnet registry"));

    let gas = Arc::new(GasPriceService::new(config.clone()));
    let oracle = Arc::new(OraclePriceService::new(
        config.clone(),
        network.oracles.clone(),
        Arc::new(NoopOracleClient),
    ));
    let matcher = Arc::new(StubMatcher::default());
    let cache = Arc::new(OrderCache::new(
        config.clone(),
        network.clone(),
        Arc::new(MemoryOrderStore::new()),
        Arc::new(NoopBookSource),
        matcher.clone(),
    ));
    let executor = Arc::new(RecordingExecutor::default());
    let tracker = Arc::new(TransactionTracker::new(executor.clone(), &config));

    let liquidator = Liquidator::new(
        config,
        network,
        gas,
        oracle.clone(),
        cache.clone(),
        executor.clone(),
        tracker,
    );

    Harness {
        liquidator,
        cache,
        oracle,
        matcher,
        executor,
    }
}

fn counter_order() -> SignedOrder {
    SignedOrder {
        chain_id: 1,
        exchange_address: "0x61935cbdd02287b511119ddb11aeb42f1593b7ef".to_string(),
        maker_address: "0x2222222222222222222222222222222222222222".to_string(),
        taker_address: NULL_ADDRESS.to_string(),
        fee_recipient_address: NULL_ADDRESS.to_string(),
        sender_address: NULL_ADDRESS.to_string(),
        maker_asset_amount: dec!(2000000000000000000),
        taker_asset_amount: dec!(900000000000000000),
        maker_fee: Decimal::ZERO,
        taker_fee: Decimal::ZERO,
        expiration_time_seconds: dec!(32503680000),
        salt: "987654321".to_string(),
        maker_asset_data: DAI_ASSET_DATA.to_string(),
        taker_asset_data: WETH_ASSET_DATA.to_string(),
        maker_fee_asset_data: "0x".to_string(),
        taker_fee_asset_data: "0x".to_string(),
        signature: "0x1c".to_string(),
    }
}

async fn prime(h: &Harness, order_hashes: &[&str]) {
    for order_hash in order_hashes {
        h.cache
            .apply_book_event(BookEvent::New {
                market: "DAI-WETH".to_string(),
                record: Box::new(stop_limit_record(order_hash)),
            })
            .await;
    }
    h.cache.mark_connected();
    h.oracle.inject_answer(ETH_USD_ORACLE, dec!(300000000000));
    h.oracle.inject_answer(DAI_WETH_ORACLE, dec!(400000000000000));
    h.liquidator
        .set_state_for_tests(LiquidatorState::Running)
        .await;
}

fn dai_price_update() -> PriceUpdate {
    PriceUpdate {
        base_token: "DAI".to_string(),
        quote_token: "WETH".to_string(),
        price: dec!(400000000000000),
    }
}

#[tokio::test]
async fn profitable_match_is_submitted_and_tracked() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;
    h.matcher
        .set_match(
            "0xstop1",
            MatchCandidate {
                counter_order: counter_order(),
                fill_amount: dec!(900000000000000000),
            },
        )
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;

    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    let pending = h
        .liquidator
        .pending_liquidation("0xtx1")
        .await
        .expect("pending liquidation recorded");
    assert_eq!(pending.base_token, "DAI");
    assert_eq!(pending.quote_token, "WETH");
    assert!(pending.fiat_profit > dec!(4600));
}

#[tokio::test]
async fn completion_clears_the_pending_liquidation() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;
    h.matcher
        .set_match(
            "0xstop1",
            MatchCandidate {
                counter_order: counter_order(),
                fill_amount: dec!(900000000000000000),
            },
        )
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;
    assert!(h.liquidator.pending_liquidation("0xtx1").await.is_some());

    h.liquidator
        .handle_transaction_complete(TransactionOutcome {
            transaction_hash: "0xtx1".to_string(),
            success: true,
        })
        .await;
    assert!(h.liquidator.pending_liquidation("0xtx1").await.is_none());

    // A completion for an unknown hash is a no-op.
    h.liquidator
        .handle_transaction_complete(TransactionOutcome {
            transaction_hash: "0xunknown".to_string(),
            success: false,
        })
        .await;
}

#[tokio::test]
async fn zero_fill_matches_are_never_submitted() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;
    h.matcher
        .set_match(
            "0xstop1",
            MatchCandidate {
                counter_order: counter_order(),
                fill_amount: Decimal::ZERO,
            },
        )
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;

    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
    assert!(h.liquidator.pending_liquidation("0xtx1").await.is_none());
}

#[tokio::test]
async fn handlers_are_no_ops_while_not_running() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;
    h.matcher
        .set_match(
            "0xstop1",
            MatchCandidate {
                counter_order: counter_order(),
                fill_amount: dec!(900000000000000000),
            },
        )
        .await;
    h.liquidator
        .set_state_for_tests(LiquidatorState::Stopped)
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handlers_wait_for_a_connected_cache() {
    let h = harness();
    // Everything primed except the cache's connected flags.
    h.cache
        .apply_book_event(BookEvent::New {
            market: "DAI-WETH".to_string(),
            record: Box::new(stop_limit_record("0xstop1")),
        })
        .await;
    h.oracle.inject_answer(ETH_USD_ORACLE, dec!(300000000000));
    h.oracle.inject_answer(DAI_WETH_ORACLE, dec!(400000000000000));
    h.liquidator
        .set_state_for_tests(LiquidatorState::Running)
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn new_order_notification_runs_the_same_pipeline() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;
    h.matcher
        .set_match(
            "0xstop1",
            MatchCandidate {
                counter_order: counter_order(),
                fill_amount: dec!(900000000000000000),
            },
        )
        .await;

    let order = h.cache.get_orders("DAI", "WETH").await.remove(0);
    h.liquidator.handle_new_order(order).await;

    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    assert!(h.liquidator.pending_liquidation("0xtx1").await.is_some());
}

#[tokio::test]
async fn unprofitable_orders_are_noticed_once() {
    let h = harness();
    prime(&h, &["0xstop1"]).await;

    // Out of the order's trigger range: not actionable.
    let update = PriceUpdate {
        base_token: "DAI".to_string(),
        quote_token: "WETH".to_string(),
        price: dec!(500000000000000),
    };
    h.liquidator.handle_price_update(update.clone()).await;
    h.liquidator.handle_price_update(update).await;

    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.liquidator.noticed_count().await, 1);
}

#[tokio::test]
async fn one_failed_submission_does_not_abort_the_batch() {
    let h = harness();
    prime(&h, &["0xstop1", "0xstop2"]).await;
    for order_hash in ["0xstop1", "0xstop2"] {
        h.matcher
            .set_match(
                order_hash,
                MatchCandidate {
                    counter_order: counter_order(),
                    fill_amount: dec!(900000000000000000),
                },
            )
            .await;
    }
    h.executor.fail_next.store(true, Ordering::SeqCst);

    h.liquidator.handle_price_update(dai_price_update()).await;

    // Both submissions were attempted; only the second produced a
    // pending liquidation, and nothing was rolled back.
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
    assert!(h.liquidator.pending_liquidation("0xtx1").await.is_none());
    assert!(h.liquidator.pending_liquidation("0xtx2").await.is_some());
}

#[tokio::test]
async fn missing_fiat_anchor_skips_the_tick() {
    let h = harness();
    h.cache
        .apply_book_event(BookEvent::New {
            market: "DAI-WETH".to_string(),
            record: Box::new(stop_limit_record("0xstop1")),
        })
        .await;
    h.cache.mark_connected();
    // Only the pair price is known; no WETH-USD anchor.
    h.oracle.inject_answer(DAI_WETH_ORACLE, dec!(400000000000000));
    h.liquidator
        .set_state_for_tests(LiquidatorState::Running)
        .await;

    h.liquidator.handle_price_update(dai_price_update()).await;
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
}
