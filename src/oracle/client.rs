// src/oracle/client.rs
//! Read/subscription access to the on-chain price oracles, behind a trait
//! so the price service can be driven by fakes in tests.

use crate::config::Config;
use crate::error::LiquidatorError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Log topic of the oracle answer-updated event.
pub const ANSWER_UPDATED_TOPIC: &str =
    "0x0559884fd3a460db3073b7fc896cc77986f16e378210ded43186175bf646fc5f";

/// Function selector of the oracle's latest-answer read call.
const LATEST_ANSWER_SELECTOR: &str = "0x50d25bcd";

/// A raw price observation pushed by one oracle.
#[derive(Debug, Clone)]
pub struct OracleAnswer {
    pub oracle_address: String,
    pub price: Decimal,
}

#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Latest raw integer price reported by the oracle at `oracle_address`.
    async fn latest_answer(&self, oracle_address: &str) -> Result<Decimal, LiquidatorError>;

    /// Open the push subscription for the given oracle addresses. Answers
    /// arrive on the returned channel until the connection closes or the
    /// receiver is dropped.
    async fn subscribe(
        &self,
        oracle_addresses: &[String],
    ) -> Result<mpsc::Receiver<OracleAnswer>, LiquidatorError>;
}

/// JSON-RPC implementation: `eth_call` for reads, a websocket log
/// subscription for pushes.
pub struct JsonRpcOracleClient {
    http_url: String,
    ws_url: String,
    http: reqwest::Client,
}

impl JsonRpcOracleClient {
    pub fn new(config: &Arc<Config>) -> Self {
        Self {
            http_url: config.ethereum_rpc_http_url.clone(),
            ws_url: config.ethereum_rpc_ws_url.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OracleClient for JsonRpcOracleClient {
    async fn latest_answer(&self, oracle_address: &str) -> Result<Decimal, LiquidatorError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": oracle_address, "data": LATEST_ANSWER_SELECTOR }, "latest"],
        });

        let response: serde_json::Value = self
            .http
            .post(&self.http_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LiquidatorError::OracleError(format!("eth_call request: {}", e)))?
            .json()
            .await
            .map_err(|e| LiquidatorError::OracleError(format!("eth_call response: {}", e)))?;

        let result = response
            .get("result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                LiquidatorError::OracleError(format!(
                    "eth_call returned no result for {}",
                    oracle_address
                ))
            })?;

        hex_to_decimal(result)
    }

    async fn subscribe(
        &self,
        oracle_addresses: &[String],
    ) -> Result<mpsc::Receiver<OracleAnswer>, LiquidatorError> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| LiquidatorError::WebSocketError(format!("oracle ws connect: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", {
                "address": oracle_addresses,
                "topics": [ANSWER_UPDATED_TOPIC],
            }],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| LiquidatorError::WebSocketError(format!("oracle ws subscribe: {}", e)))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            // Keep the write half alive so queued pong replies can flush.
            let _write = write;
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match parse_log_notification(&text) {
                    Some(answer) => {
                        if tx.send(answer).await.is_err() {
                            break;
                        }
                    }
                    // Subscription confirmations and malformed events are
                    // dropped here; the polling refresh covers any gap.
                    None => debug!("Ignoring oracle ws message: {}", text),
                }
            }
            warn!("Oracle log subscription closed");
        });

        Ok(rx)
    }
}

/// Extract an answer from an `eth_subscription` log notification. The
/// updated answer is the first indexed topic after the event signature.
fn parse_log_notification(text: &str) -> Option<OracleAnswer> {
    let message: serde_json::Value = serde_json::from_str(text).ok()?;
    if message.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let result = message.get("params")?.get("result")?;
    let address = result.get("address")?.as_str()?.to_lowercase();
    let topics = result.get("topics")?.as_array()?;
    let price = hex_to_decimal(topics.get(1)?.as_str()?).ok()?;
    Some(OracleAnswer {
        oracle_address: address,
        price,
    })
}

/// Decode a 0x-prefixed 256-bit hex word into a Decimal. Oracle answers
/// are positive and far below the 96-bit Decimal mantissa limit.
pub fn hex_to_decimal(hex: &str) -> Result<Decimal, LiquidatorError> {
    let digits = hex.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if digits.len() > 24 {
        // 24 hex digits = 96 bits, the Decimal mantissa width.
        return Err(LiquidatorError::ParseError(format!(
            "oracle answer out of range: {}",
            hex
        )));
    }
    let value = u128::from_str_radix(digits, 16)
        .map_err(|e| LiquidatorError::ParseError(format!("oracle answer {}: {}", hex, e)))?;
    Ok(Decimal::from_i128_with_scale(value as i128, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn hex_answers_decode() {
        // 300000000000 = $3000.00 at the 10^8 fiat scale
        assert_eq!(
            hex_to_decimal("0x00000000000000000000000000000000000000000000000000000045d964b800")
                .unwrap(),
            dec!(300000000000)
        );
        assert_eq!(hex_to_decimal("0x0").unwrap(), Decimal::ZERO);
        assert!(hex_to_decimal("0xffffffffffffffffffffffffffffffffffffffff").is_err());
    }

    #[test]
    fn log_notifications_parse_price_from_topics() {
        let text = r#"{
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0xcd0c3e8af590364c09d0fa6a1210faf5",
                "result": {
                    "address": "0x773616E4d11A78F511299002da57A0a94577F1f4",
                    "topics": [
                        "0x0559884fd3a460db3073b7fc896cc77986f16e378210ded43186175bf646fc5f",
                        "0x00000000000000000000000000000000000000000000000000038d7ea4c68000",
                        "0x0000000000000000000000000000000000000000000000000000000000000457"
                    ],
                    "data": "0x"
                }
            }
        }"#;
        let answer = parse_log_notification(text).expect("answer");
        assert_eq!(answer.oracle_address, "0x773616e4d11a78f511299002da57a0a94577f1f4");
        assert_eq!(answer.price, dec!(1000000000000000));
    }

    #[test]
    fn non_subscription_messages_are_ignored() {
        assert!(parse_log_notification(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#).is_none());
        assert!(parse_log_notification("not json").is_none());
    }
}
