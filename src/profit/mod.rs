// src/profit/mod.rs
//! Pure profitability arithmetic. Everything here is side-effect free and
//! operates on exact decimals; floats never touch these paths.


use crate::config::Config;
use crate::oracle::invert_price;
use crate::registry::Network;
use crate::types::{pow10, OrderSide, OrderSummary, SignedOrder, TradeProfit};
use rust_decimal::Decimal;

/// ERC-20 asset data: 4-byte proxy selector followed by the token address
/// left-padded to 32 bytes.
const ERC20_PROXY_SELECTOR: &str = "0xf47261b0";

/// Unit-gas constants for the fee estimate. Both are protocol/operational
/// constants, not derived from observed gas usage.
#[derive(Debug, Clone)]
pub struct GasCosts {
    /// Unit gas charged as protocol fee per matched order.
    pub protocol_fee_gas: Decimal,
    /// Estimated unit gas of one match transaction.
    pub trade_gas: Decimal,
}

impl GasCosts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            protocol_fee_gas: config.protocol_fee_gas,
            trade_gas: config.trade_gas,
        }
    }
}

/// Decide whether filling `order` at the current oracle `price` clears the
/// fee and gas estimates by at least `min_profit_pct` percent.
///
/// The trigger range is checked against the raw oracle value, so an
/// inverse pair re-inverts the normalized price first. Outside the range
/// the order is simply not actionable.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_order(
    order: &OrderSummary,
    price: Decimal,
    gas_price: Decimal,
    eth_fiat_price: Decimal,
    token_fiat_price: Decimal,
    min_profit_pct: Decimal,
    gas_costs: &GasCosts,
    network: &Network,
    is_inverse: bool,
) -> TradeProfit {
    if price <= Decimal::ZERO {
        return TradeProfit::unprofitable();
    }

    let check_price = if is_inverse {
        invert_price(price, 18)
    } else {
        price
    };
    if order.min_price > check_price || order.max_price < check_price {
        return TradeProfit::unprofitable();
    }

    let base_token = match network.token_by_symbol(&order.base_token) {
        Some(token) => token,
        None => return TradeProfit::unprofitable(),
    };
    let quote_token = match network.token_by_symbol(&order.quote_token) {
        Some(token) => token,
        None => return TradeProfit::unprofitable(),
    };

    let shifted_price = price / pow10(18);

    // The taker fills the taker amount; the remainder of the maker amount
    // valued at the current price is the gross profit.
    let trade_profit = match order.order_type {
        OrderSide::Buy => order.maker_asset_amount - order.taker_asset_amount * shifted_price,
        OrderSide::Sell => order.maker_asset_amount - order.taker_asset_amount / shifted_price,
    };

    let decimals = match order.order_type {
        OrderSide::Buy => quote_token.decimals,
        OrderSide::Sell => base_token.decimals,
    };
    let asset_profit = (trade_profit - order.taker_fee) / pow10(decimals);

    settle(
        asset_profit,
        order.order_type,
        gas_price,
        eth_fiat_price,
        token_fiat_price,
        min_profit_pct,
        gas_costs,
        is_inverse,
    )
}

/// Decide whether atomically matching a triggered conditional order
/// against a counter-order is profitable on the realized fill.
///
/// Base and quote are resolved by matching the counter-order's asset
/// addresses against the configured oracle pairs; an unresolvable pair is
/// unprofitable, never an error.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_match(
    stop_limit_order: &SignedOrder,
    matched_order: &SignedOrder,
    gas_price: Decimal,
    eth_fiat_price: Decimal,
    token_fiat_price: Decimal,
    min_profit_pct: Decimal,
    gas_costs: &GasCosts,
    network: &Network,
    is_inverse: bool,
) -> TradeProfit {
    let token_a_address = match erc20_asset_token(&matched_order.taker_asset_data) {
        Some(address) => address,
        None => return TradeProfit::unprofitable(),
    };
    let token_b_address = match erc20_asset_token(&matched_order.maker_asset_data) {
        Some(address) => address,
        None => return TradeProfit::unprofitable(),
    };

    let token_a = match network.token_by_address(&token_a_address) {
        Some(token) => token,
        None => return TradeProfit::unprofitable(),
    };
    let token_b = match network.token_by_address(&token_b_address) {
        Some(token) => token,
        None => return TradeProfit::unprofitable(),
    };

    let mut resolved = None;
    for oracle in &network.oracles {
        if oracle.base_token == token_a.symbol && oracle.quote_token == token_b.symbol {
            resolved = Some((token_a, token_b, OrderSide::Sell));
        } else if oracle.base_token == token_b.symbol && oracle.quote_token == token_a.symbol {
            resolved = Some((token_b, token_a, OrderSide::Buy));
        }
    }
    let (base_token, quote_token, order_type) = match resolved {
        Some(resolved) => resolved,
        None => return TradeProfit::unprofitable(),
    };

    if matched_order.maker_asset_amount <= Decimal::ZERO {
        return TradeProfit::unprofitable();
    }

    // The fill is capped by the lesser capacity. When the matched order is
    // the limiting side its taker amount is scaled down with ceiling
    // division; every other whole-unit amount rounds toward the floor.
    let matched_filled_amount =
        if stop_limit_order.taker_asset_amount > matched_order.maker_asset_amount {
            matched_order.taker_asset_amount
        } else {
            ((stop_limit_order.taker_asset_amount / matched_order.maker_asset_amount)
                * matched_order.taker_asset_amount)
                .ceil()
        };

    let trade_profit = stop_limit_order.maker_asset_amount - matched_filled_amount;

    let decimals = match order_type {
        OrderSide::Buy => quote_token.decimals,
        OrderSide::Sell => base_token.decimals,
    };
    let asset_profit =
        (trade_profit - stop_limit_order.taker_fee - matched_order.taker_fee) / pow10(decimals);

    settle(
        asset_profit,
        order_type,
        gas_price,
        eth_fiat_price,
        token_fiat_price,
        min_profit_pct,
        gas_costs,
        is_inverse,
    )
}

/// Shared tail of both evaluations: fiat conversion, fee deduction and
/// the minimum-profit threshold.
#[allow(clippy::too_many_arguments)]
fn settle(
    asset_profit: Decimal,
    order_type: OrderSide,
    gas_price: Decimal,
    eth_fiat_price: Decimal,
    token_fiat_price: Decimal,
    min_profit_pct: Decimal,
    gas_costs: &GasCosts,
    is_inverse: bool,
) -> TradeProfit {
    if eth_fiat_price <= Decimal::ZERO {
        return TradeProfit::unprofitable();
    }

    let gross_fiat_profit = if is_inverse {
        match order_type {
            OrderSide::Buy => asset_profit / eth_fiat_price * token_fiat_price,
            OrderSide::Sell => asset_profit * eth_fiat_price,
        }
    } else {
        match order_type {
            OrderSide::Buy => asset_profit * eth_fiat_price,
            OrderSide::Sell => asset_profit * token_fiat_price,
        }
    };

    // An atomic match settles two orders, so the protocol fee applies
    // twice; both estimates are fiat-valued through ETH.
    let wei = pow10(18);
    let protocol_fee_fiat =
        gas_costs.protocol_fee_gas * gas_price * Decimal::TWO / wei * eth_fiat_price;
    let gas_cost_fiat = gas_costs.trade_gas * gas_price / wei * eth_fiat_price;

    let fiat_profit = gross_fiat_profit - protocol_fee_fiat - gas_cost_fiat;

    let is_profitable = fiat_profit > Decimal::ZERO
        && fiat_profit / gross_fiat_profit * Decimal::ONE_HUNDRED >= min_profit_pct;

    TradeProfit {
        is_profitable,
        fiat_profit,
        asset_profit,
    }
}

/// Token address from ERC-20 asset data: the selector plus a left-padded
/// 32-byte word.
fn erc20_asset_token(asset_data: &str) -> Option<String> {
    let data = asset_data.to_lowercase();
    let payload = data.strip_prefix(ERC20_PROXY_SELECTOR)?;
    if payload.len() != 64 {
        return None;
    }
    Some(format!("0x{}", &payload[24..]))
}
