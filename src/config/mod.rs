// src/config/mod.rs
//! Immutable runtime configuration, loaded once from the environment and
//! passed by `Arc` to every component constructor.

use crate::error::LiquidatorError;
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Fiat units the profit of a liquidation may be reported in.
pub const SUPPORTED_PROFIT_ASSETS: &[&str] = &["USD", "AUD", "EUR", "CHF", "GBP", "JPY"];

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_id: u64,
    /// Base URL of the order feed's REST API.
    pub api_url: String,
    /// Websocket endpoint of the order feed's push channel.
    pub ws_url: String,
    /// JSON-RPC endpoint used for oracle reads.
    pub ethereum_rpc_http_url: String,
    /// Websocket JSON-RPC endpoint used for the oracle log subscription.
    pub ethereum_rpc_ws_url: String,
    pub gas_price_url: String,
    pub matcher_url: String,
    pub executor_url: String,
    pub db_path: String,
    /// Optional override of the embedded token/oracle registry.
    pub networks_path: Option<PathBuf>,
    pub gas_price_poll_rate_ms: u64,
    pub oracle_poll_rate_ms: u64,
    pub api_poll_rate_ms: u64,
    pub ws_reconnect_delay_ms: u64,
    pub ws_heartbeat_interval_ms: u64,
    pub ws_heartbeat_timeout_ms: u64,
    pub tx_poll_rate_ms: u64,
    pub minimum_profit_percent: Decimal,
    pub profit_asset: String,
    /// Unit gas charged per matched order as protocol fee. A constant of
    /// the protocol, not derived from observed gas usage.
    pub protocol_fee_gas: Decimal,
    /// Estimated unit gas of one match transaction.
    pub trade_gas: Decimal,
}

impl Config {
    pub fn from_env() -> Self {
        let chain_id = parse_env("CHAIN_ID", 1u64);
        Config {
            chain_id,
            api_url: env::var("ORDER_API_URL").unwrap_or_else(|_| default_api_url(chain_id)),
            ws_url: env::var("ORDER_API_WS_URL").unwrap_or_else(|_| default_ws_url(chain_id)),
            ethereum_rpc_http_url: env::var("ETHEREUM_RPC_HTTP_URL").unwrap_or_default(),
            ethereum_rpc_ws_url: env::var("ETHEREUM_RPC_WS_URL").unwrap_or_default(),
            gas_price_url: env::var("GAS_PRICE_SOURCE")
                .unwrap_or_else(|_| "https://ethgasstation.info/api/ethgasAPI.json".to_string()),
            matcher_url: env::var("MATCHER_URL").unwrap_or_default(),
            executor_url: env::var("EXECUTION_API_URL").unwrap_or_default(),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "orders.sqlite".to_string()),
            networks_path: env::var("NETWORKS_PATH").ok().map(PathBuf::from),
            gas_price_poll_rate_ms: parse_env("GAS_PRICE_POLL_RATE_MS", 60_000),
            oracle_poll_rate_ms: parse_env("ORACLE_POLL_RATE_MS", 60_000),
            api_poll_rate_ms: parse_env("API_POLL_RATE_MS", 60_000),
            ws_reconnect_delay_ms: parse_env("WS_RECONNECT_DELAY_MS", 5_000),
            ws_heartbeat_interval_ms: parse_env("WS_HEARTBEAT_INTERVAL_MS", 30_000),
            ws_heartbeat_timeout_ms: parse_env("WS_HEARTBEAT_TIMEOUT_MS", 10_000),
            tx_poll_rate_ms: parse_env("TX_POLL_RATE_MS", 10_000),
            minimum_profit_percent: parse_env("MINIMUM_PROFIT_PERCENT", Decimal::ONE),
            profit_asset: env::var("PROFIT_ASSET").unwrap_or_else(|_| "USD".to_string()),
            protocol_fee_gas: parse_env("PROTOCOL_FEE_GAS", Decimal::from(150_000u32)),
            trade_gas: parse_env("TRADE_GAS", Decimal::from(360_000u32)),
        }
    }

    /// Startup validation. Configuration errors are the only fatal error
    /// class in the process.
    pub fn validate(&self) -> Result<(), LiquidatorError> {
        if !SUPPORTED_PROFIT_ASSETS.contains(&self.profit_asset.as_str()) {
            return Err(LiquidatorError::ConfigError(format!(
                "PROFIT_ASSET must be one of {:?}, found {}",
                SUPPORTED_PROFIT_ASSETS, self.profit_asset
            )));
        }
        for (name, value) in [
            ("ORDER_API_URL", &self.api_url),
            ("ORDER_API_WS_URL", &self.ws_url),
            ("ETHEREUM_RPC_HTTP_URL", &self.ethereum_rpc_http_url),
            ("ETHEREUM_RPC_WS_URL", &self.ethereum_rpc_ws_url),
            ("GAS_PRICE_SOURCE", &self.gas_price_url),
        ] {
            if let Err(e) = Url::parse(value) {
                return Err(LiquidatorError::ConfigError(format!(
                    "{} must be a valid URL, found {:?}: {}",
                    name, value, e
                )));
            }
        }
        for (name, value) in [
            ("GAS_PRICE_POLL_RATE_MS", self.gas_price_poll_rate_ms),
            ("ORACLE_POLL_RATE_MS", self.oracle_poll_rate_ms),
            ("API_POLL_RATE_MS", self.api_poll_rate_ms),
            ("TX_POLL_RATE_MS", self.tx_poll_rate_ms),
        ] {
            if value == 0 {
                return Err(LiquidatorError::ConfigError(format!(
                    "{} must be a positive integer",
                    name
                )));
            }
        }
        if self.minimum_profit_percent < Decimal::ZERO {
            return Err(LiquidatorError::ConfigError(
                "MINIMUM_PROFIT_PERCENT must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Config {
    /// Fixed configuration for unit tests; no environment reads.
    pub(crate) fn test_defaults() -> Self {
        use rust_decimal_macros::dec;
        Config {
            chain_id: 1,
            api_url: default_api_url(1),
            ws_url: default_ws_url(1),
            ethereum_rpc_http_url: "https://rpc.example.test".to_string(),
            ethereum_rpc_ws_url: "wss://rpc.example.test/ws".to_string(),
            gas_price_url: "https://ethgasstation.info/api/ethgasAPI.json".to_string(),
            matcher_url: "https://matcher.example.test".to_string(),
            executor_url: "https://executor.example.test".to_string(),
            db_path: ":memory:".to_string(),
            networks_path: None,
            gas_price_poll_rate_ms: 60_000,
            oracle_poll_rate_ms: 60_000,
            api_poll_rate_ms: 60_000,
            ws_reconnect_delay_ms: 5_000,
            ws_heartbeat_interval_ms: 30_000,
            ws_heartbeat_timeout_ms: 10_000,
            tx_poll_rate_ms: 10_000,
            minimum_profit_percent: dec!(1),
            profit_asset: "USD".to_string(),
            protocol_fee_gas: dec!(150000),
            trade_gas: dec!(360000),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_api_url(chain_id: u64) -> String {
    match chain_id {
        3 => "https://rest.bamboorelay.com/ropsten/0x".to_string(),
        4 => "https://rest.bamboorelay.com/rinkeby/0x".to_string(),
        42 => "https://rest.bamboorelay.com/kovan/0x".to_string(),
        1337 => "https://localhost.bamboorelay.com/0x".to_string(),
        _ => "https://rest.bamboorelay.com/main/0x".to_string(),
    }
}

fn default_ws_url(chain_id: u64) -> String {
    match chain_id {
        1337 => "wss://localhost.bamboorelay.com/0x/ws".to_string(),
        _ => "wss://rest.bamboorelay.com/0x/ws".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes() {
        assert!(Config::test_defaults().validate().is_ok());
    }

    #[test]
    fn unknown_profit_asset_is_rejected() {
        let mut config = Config::test_defaults();
        config.profit_asset = "XAU".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_rate_is_rejected() {
        let mut config = Config::test_defaults();
        config.api_poll_rate_ms = 0;
        assert!(config.validate().is_err());
    }
}
