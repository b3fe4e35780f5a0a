// src/orders/feed.rs
//! Order feed access: REST snapshots of the stop-limit book and the
//! websocket push channel delivering NEW/REMOVE deltas.

use crate::config::Config;
use crate::error::LiquidatorError;
use crate::types::SignedOrder;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FeedSide {
    #[serde(rename = "BID")]
    Bid,
    #[serde(rename = "ASK")]
    Ask,
}

/// One resting order as reported by the feed. Trigger parameters are only
/// present on conditional orders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOrderRecord {
    pub order_hash: String,
    #[serde(rename = "type")]
    pub side: FeedSide,
    pub execution_type: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default)]
    pub remaining_base_token_amount: Option<String>,
    pub base_token_address: String,
    pub quote_token_address: String,
    pub signed_order: SignedOrder,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub min_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub oracle_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookSnapshot {
    pub bids: Vec<FeedOrderRecord>,
    pub asks: Vec<FeedOrderRecord>,
}

/// A push delta from the book channel.
#[derive(Debug, Clone)]
pub enum BookEvent {
    New {
        market: String,
        record: Box<FeedOrderRecord>,
    },
    Remove {
        market: String,
        order_hash: String,
    },
}

/// REST side of the order feed, behind a trait so reconciliation can be
/// driven by a stub book in tests.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn fetch_stop_limit_book(&self, market: &str)
        -> Result<OrderbookSnapshot, LiquidatorError>;
}

pub struct HttpBookSource {
    api_url: String,
    http: reqwest::Client,
}

impl HttpBookSource {
    pub fn new(config: &Arc<Config>) -> Self {
        Self {
            api_url: config.api_url.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BookSource for HttpBookSource {
    async fn fetch_stop_limit_book(
        &self,
        market: &str,
    ) -> Result<OrderbookSnapshot, LiquidatorError> {
        let url = format!("{}/markets/{}/stopLimitBook", self.api_url, market);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| LiquidatorError::FeedError(format!("book request {}: {}", market, e)))?
            .json()
            .await
            .map_err(|e| LiquidatorError::FeedError(format!("book decode {}: {}", market, e)))
    }
}

/// Run the push channel: connect, subscribe to the full book, forward
/// deltas, and keep the connection alive with a ping/pong heartbeat.
/// Reconnects after a fixed backoff for as long as `started` holds.
pub(crate) fn spawn_book_stream(
    config: Arc<Config>,
    events_tx: mpsc::Sender<BookEvent>,
    connected: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let backoff = Duration::from_millis(config.ws_reconnect_delay_ms);
        while started.load(Ordering::SeqCst) {
            match run_connection(&config, &events_tx, &connected).await {
                Ok(()) => debug!("Book stream closed"),
                Err(e) => warn!("Book stream error: {}", e),
            }
            connected.store(false, Ordering::SeqCst);
            if !started.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(backoff).await;
        }
    })
}

async fn run_connection(
    config: &Arc<Config>,
    events_tx: &mpsc::Sender<BookEvent>,
    connected: &Arc<AtomicBool>,
) -> Result<(), LiquidatorError> {
    let (ws_stream, _) = connect_async(&config.ws_url)
        .await
        .map_err(|e| LiquidatorError::WebSocketError(format!("connect: {}", e)))?;
    let (mut write, mut read) = ws_stream.split();

    let request_id: u64 = rand::thread_rng().gen();
    let handshake = json!({
        "type": "SUBSCRIBE",
        "topic": "BOOK",
        "market": "ALL",
        "requestId": format!("liquidator-{}", request_id),
        "chainId": config.chain_id,
    });
    write
        .send(Message::Text(handshake.to_string()))
        .await
        .map_err(|e| LiquidatorError::WebSocketError(format!("subscribe: {}", e)))?;

    connected.store(true, Ordering::SeqCst);
    info!("Order feed connected, subscribed to the full book");

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(config.ws_heartbeat_interval_ms));
    heartbeat.tick().await;
    let heartbeat_timeout = Duration::from_millis(config.ws_heartbeat_timeout_ms);
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        for event in parse_book_message(&text) {
                            if events_tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(LiquidatorError::WebSocketError(format!("read: {}", e)));
                    }
                }
            }
            _ = heartbeat.tick() => {
                if pong_deadline.is_none() {
                    pong_deadline = Some(tokio::time::Instant::now() + heartbeat_timeout);
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| LiquidatorError::WebSocketError(format!("ping: {}", e)))?;
                }
            }
            _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if pong_deadline.is_some() => {
                // The remote stopped answering pings; force a reconnect.
                return Err(LiquidatorError::WebSocketError(
                    "heartbeat timed out".to_string(),
                ));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    actions: Vec<BookAction>,
}

#[derive(Debug, Deserialize)]
struct BookAction {
    action: String,
    market: String,
    event: serde_json::Value,
}

/// Parse a push message into deltas. A malformed message or action is
/// dropped, never an error.
fn parse_book_message(text: &str) -> Vec<BookEvent> {
    let message: BookMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            debug!("Ignoring non-book ws message");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    for action in message.actions {
        match action.action.as_str() {
            "NEW" => {
                let record = action
                    .event
                    .get("order")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<FeedOrderRecord>(v).ok());
                match record {
                    Some(record) => events.push(BookEvent::New {
                        market: action.market,
                        record: Box::new(record),
                    }),
                    None => debug!("Dropping malformed NEW action for {}", action.market),
                }
            }
            "REMOVE" => {
                match action
                    .event
                    .get("orderHash")
                    .and_then(|v| v.as_str())
                {
                    Some(order_hash) => events.push(BookEvent::Remove {
                        market: action.market,
                        order_hash: order_hash.to_string(),
                    }),
                    None => debug!("Dropping malformed REMOVE action for {}", action.market),
                }
            }
            other => debug!("Ignoring unknown book action {}", other),
        }
    }
    events
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const SNAPSHOT: &str = r#"{
        "bids": [{
            "orderHash": "0xaaa1",
            "type": "BID",
            "executionType": "STOP-LIMIT",
            "price": "400000000000000",
            "remainingBaseTokenAmount": "2000000000000000000",
            "baseTokenAddress": "0x6b175474e89094c44da98b954eedeac495271d0f",
            "quoteTokenAddress": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            "minPrice": "380000000000000",
            "maxPrice": "420000000000000",
            "oracleAddress": "0x773616e4d11a78f511299002da57a0a94577f1f4",
            "signedOrder": {
                "chainId": 1,
                "exchangeAddress": "0x61935cbdd02287b511119ddb11aeb42f1593b7ef",
                "makerAddress": "0x1111111111111111111111111111111111111111",
                "takerAddress": "0x0000000000000000000000000000000000000000",
                "feeRecipientAddress": "0x0000000000000000000000000000000000000000",
                "senderAddress": "0x0000000000000000000000000000000000000000",
                "makerAssetAmount": "2000000000000000000",
                "takerAssetAmount": "1000000000000000000",
                "makerFee": "0",
                "takerFee": "0",
                "expirationTimeSeconds": "32503680000",
                "salt": "123456789",
                "makerAssetData": "0xf47261b00000000000000000000000006b175474e89094c44da98b954eedeac495271d0f",
                "takerAssetData": "0xf47261b0000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                "makerFeeAssetData": "0x",
                "takerFeeAssetData": "0x",
                "signature": "0x1b"
            }
        }],
        "asks": []
    }"#;

    #[test]
    fn snapshot_decodes_with_trigger_parameters() {
        let snapshot: OrderbookSnapshot = serde_json::from_str(SNAPSHOT).expect("snapshot");
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 0);

        let record = &snapshot.bids[0];
        assert_eq!(record.side, FeedSide::Bid);
        assert_eq!(record.min_price, Some(dec!(380000000000000)));
        assert_eq!(record.signed_order.maker_asset_amount, dec!(2000000000000000000));
    }

    #[test]
    fn book_messages_parse_into_deltas() {
        let snapshot: OrderbookSnapshot = serde_json::from_str(SNAPSHOT).expect("snapshot");
        let record_json =
            serde_json::from_str::<serde_json::Value>(SNAPSHOT).unwrap()["bids"][0].clone();
        let order_json = serde_json::json!({
            "actions": [
                { "action": "REMOVE", "market": "DAI-WETH", "event": { "orderHash": "0xdead" } },
                { "action": "NEW", "market": "DAI-WETH", "event": { "order": record_json } },
                { "action": "TRADE", "market": "DAI-WETH", "event": {} }
            ]
        });

        let events = parse_book_message(&order_json.to_string());
        assert_eq!(events.len(), 2);
        match &events[0] {
            BookEvent::Remove { market, order_hash } => {
                assert_eq!(market, "DAI-WETH");
                assert_eq!(order_hash, "0xdead");
            }
            other => panic!("expected REMOVE, got {:?}", other),
        }
        match &events[1] {
            BookEvent::New { record, .. } => {
                assert_eq!(record.order_hash, snapshot.bids[0].order_hash)
            }
            other => panic!("expected NEW, got {:?}", other),
        }
    }

    #[test]
    fn malformed_messages_yield_no_deltas() {
        assert!(parse_book_message("not json").is_empty());
        assert!(parse_book_message(r#"{"requestId": "ack"}"#).is_empty());
        assert!(
            parse_book_message(r#"{"actions": [{"action": "NEW", "market": "X-Y", "event": {}}]}"#)
                .is_empty()
        );
    }
}
