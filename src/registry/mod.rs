// src/registry/mod.rs
//! Static per-network token and oracle lists. Loaded once at startup from
//! the embedded defaults or an overriding JSON file.

use crate::error::LiquidatorError;
use crate::types::{Oracle, Token};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

static DEFAULT_NETWORKS: Lazy<HashMap<String, NetworkData>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../data/networks.json"))
        .expect("embedded networks.json is valid")
});

#[derive(Debug, Clone, Deserialize)]
struct NetworkData {
    tokens: Vec<Token>,
    oracles: Vec<Oracle>,
}

/// All statically-known tokens and price oracles for one chain.
#[derive(Debug, Clone)]
pub struct Network {
    pub chain_id: u64,
    pub tokens: Vec<Token>,
    pub oracles: Vec<Oracle>,
}

impl Network {
    pub fn token_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.symbol == symbol)
    }

    /// Addresses compare case-insensitively; feeds are not consistent
    /// about checksum casing.
    pub fn token_by_address(&self, address: &str) -> Option<&Token> {
        let wanted = address.to_lowercase();
        self.tokens
            .iter()
            .find(|t| t.address.to_lowercase() == wanted)
    }

    pub fn oracle_for_pair(&self, base_token: &str, quote_token: &str) -> Option<&Oracle> {
        self.oracles
            .iter()
            .find(|o| o.base_token == base_token && o.quote_token == quote_token)
    }

    pub fn oracle_by_address(&self, address: &str) -> Option<&Oracle> {
        let wanted = address.to_lowercase();
        self.oracles
            .iter()
            .find(|o| o.address.to_lowercase() == wanted)
    }
}

/// Load the network for `chain_id`, from `path` when given, otherwise from
/// the embedded registry.
pub fn load_network(chain_id: u64, path: Option<&Path>) -> Result<Network, LiquidatorError> {
    let data = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|e| {
                LiquidatorError::ConfigError(format!(
                    "failed to read networks file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let parsed: HashMap<String, NetworkData> = serde_json::from_str(&raw)
                .map_err(|e| {
                    LiquidatorError::ConfigError(format!(
                        "failed to parse networks file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            parsed
                .get(&chain_id.to_string())
                .cloned()
                .ok_or_else(|| {
                    LiquidatorError::ConfigError(format!(
                        "no network entry for chain id {} in {}",
                        chain_id,
                        path.display()
                    ))
                })?
        }
        None => DEFAULT_NETWORKS
            .get(&chain_id.to_string())
            .cloned()
            .ok_or_else(|| {
                LiquidatorError::ConfigError(format!(
                    "no embedded network entry for chain id {}",
                    chain_id
                ))
            })?,
    };

    Ok(Network {
        chain_id,
        tokens: data.tokens,
        oracles: data.oracles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_mainnet_registry_resolves() {
        let network = load_network(1, None).expect("mainnet registry");
        assert_eq!(network.chain_id, 1);
        assert!(network.token_by_symbol("WETH").is_some());
        assert!(network
            .token_by_address("0xC02AAA39B223FE8D0A0E5C4F27EAD9083C756CC2")
            .is_some());

        let oracle = network.oracle_for_pair("DAI", "WETH").expect("DAI-WETH oracle");
        assert!(!oracle.is_fiat);
        assert_eq!(oracle.scale(), 18);

        let eth_usd = network.oracle_for_pair("WETH", "USD").expect("WETH-USD oracle");
        assert!(eth_usd.is_fiat);
        assert_eq!(eth_usd.scale(), 8);
    }

    #[test]
    fn unknown_chain_is_a_config_error() {
        let err = load_network(99, None).unwrap_err();
        assert!(err.is_fatal());
    }
}
