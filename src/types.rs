// src/types.rs
//! Shared domain types used across the liquidator's services.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Null sender address on signed orders that are not coordinated.
pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// `10^n` as an exact Decimal. Scales here never exceed 18.
pub fn pow10(n: u32) -> Decimal {
    Decimal::from_i128_with_scale(10i128.pow(n), 0)
}

/// Cache key for a trading pair, quoted as quote-per-base.
pub fn pair_key(base_token: &str, quote_token: &str) -> String {
    format!("{}-{}", base_token, quote_token)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
}

/// A reference price source for one pair. Fiat-denominated oracles report
/// at 10^8, token-denominated ones at 10^18; inverse oracles quote
/// base-per-quote and need adjustment before trigger checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Oracle {
    pub name: String,
    pub address: String,
    pub base_token: String,
    pub quote_token: String,
    pub is_fiat: bool,
    pub is_inverse: bool,
}

impl Oracle {
    pub fn pair_key(&self) -> String {
        pair_key(&self.base_token, &self.quote_token)
    }

    /// Fixed-point scale of the raw prices this oracle reports.
    pub fn scale(&self) -> u32 {
        if self.is_fiat {
            8
        } else {
            18
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// In-memory projection of a persisted conditional order, keyed by its
/// immutable `order_hash` and grouped by pair.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub base_token: String,
    pub quote_token: String,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub order_price: Decimal,
    pub maker_asset_amount: Decimal,
    pub taker_asset_amount: Decimal,
    pub taker_fee: Decimal,
    pub is_coordinated: bool,
    pub order_hash: String,
    pub order_type: OrderSide,
}

impl OrderSummary {
    pub fn pair_key(&self) -> String {
        pair_key(&self.base_token, &self.quote_token)
    }
}

/// Full signed order payload as delivered by the order feed and handed to
/// the execution service. Amounts travel as decimal strings on the wire.
/// The salt stays a string: it is a full 256-bit value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub chain_id: u64,
    pub exchange_address: String,
    pub maker_address: String,
    pub taker_address: String,
    pub fee_recipient_address: String,
    pub sender_address: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_asset_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_asset_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub expiration_time_seconds: Decimal,
    pub salt: String,
    pub maker_asset_data: String,
    pub taker_asset_data: String,
    pub maker_fee_asset_data: String,
    pub taker_fee_asset_data: String,
    pub signature: String,
}

impl SignedOrder {
    /// Coordinated orders route through the coordinator contract and carry
    /// a non-null sender address.
    pub fn is_coordinated(&self) -> bool {
        !self.sender_address.is_empty()
            && self.sender_address != "0x"
            && self.sender_address != NULL_ADDRESS
    }
}

/// Result of a profitability evaluation. `asset_profit` is denominated in
/// whole units of the taker-side token, `fiat_profit` in the configured
/// profit asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeProfit {
    pub is_profitable: bool,
    pub fiat_profit: Decimal,
    pub asset_profit: Decimal,
}

impl TradeProfit {
    pub fn unprofitable() -> Self {
        Self {
            is_profitable: false,
            fiat_profit: Decimal::ZERO,
            asset_profit: Decimal::ZERO,
        }
    }
}

/// Bookkeeping record for a submitted-but-unconfirmed liquidation.
/// Exactly one exists per outstanding transaction hash.
#[derive(Debug, Clone)]
pub struct PendingLiquidation {
    pub transaction_hash: String,
    pub base_token: String,
    pub quote_token: String,
    pub fiat_profit: Decimal,
}

/// Emitted by the oracle price service when a non-fiat pair's price
/// actually changed.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub base_token: String,
    pub quote_token: String,
    pub price: Decimal,
}

/// Emitted by the transaction tracker once a submission is confirmed.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub transaction_hash: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pow10_matches_expected_scales() {
        assert_eq!(pow10(0), dec!(1));
        assert_eq!(pow10(8), dec!(100_000_000));
        assert_eq!(pow10(18), Decimal::from_i128_with_scale(10i128.pow(18), 0));
    }

    #[test]
    fn oracle_scale_follows_denomination() {
        let fiat = Oracle {
            name: "EUR / USD".to_string(),
            address: "0xb49f677943bc038e9857d61e7d053caa2c1734c1".to_string(),
            base_token: "EUR".to_string(),
            quote_token: "USD".to_string(),
            is_fiat: true,
            is_inverse: false,
        };
        assert_eq!(fiat.scale(), 8);

        let token = Oracle {
            is_fiat: false,
            ..fiat.clone()
        };
        assert_eq!(token.scale(), 18);
    }

    #[test]
    fn coordinated_detection_ignores_null_senders() {
        let mut order = sample_order();
        assert!(!order.is_coordinated());
        order.sender_address = "0x".to_string();
        assert!(!order.is_coordinated());
        order.sender_address = "0x4d37f28d2db99e8d35a6c725a5400f5fffbeb4dc".to_string();
        assert!(order.is_coordinated());
    }

    fn sample_order() -> SignedOrder {
        SignedOrder {
            chain_id: 1,
            exchange_address: "0x61935cbdd02287b511119ddb11aeb42f1593b7ef".to_string(),
            maker_address: "0x1111111111111111111111111111111111111111".to_string(),
            taker_address: NULL_ADDRESS.to_string(),
            fee_recipient_address: NULL_ADDRESS.to_string(),
            sender_address: NULL_ADDRESS.to_string(),
            maker_asset_amount: dec!(1000000000000000000),
            taker_asset_amount: dec!(3000000000),
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
            expiration_time_seconds: dec!(1893456000),
            salt: "1234567890".to_string(),
            maker_asset_data: "0xf47261b0".to_string(),
            taker_asset_data: "0xf47261b0".to_string(),
            maker_fee_asset_data: "0x".to_string(),
            taker_fee_asset_data: "0x".to_string(),
            signature: "0x1b".to_string(),
        }
    }
}
