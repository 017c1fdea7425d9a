//! Wallet - reconciliation state for monitored addresses
//!
//! ```text
//! Indexer ──► UtxoCache (per network+address, TTL) ──┐
//!    │                                              ├──► classify() ──► WalletBalance
//!    └─────► MempoolStore (per address snapshot) ───┘
//! ```
//!
//! Both stores replace entries wholesale on every successful fetch and lock
//! per key, so a slow indexer response for one address never blocks
//! another.

mod balance;
mod cache;
mod mempool;

pub use balance::{classify, Thresholds, WalletBalance};
pub use cache::{CacheKey, CacheRead, UnspentOutput, UtxoCache, UtxoSnapshot};
pub use mempool::{MempoolEntry, MempoolSnapshot, MempoolStore};

use bitcoin::{Address, Network};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parse an address and check it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|e| Error::validation(format!("address {}: {}", address, e)))?
        .require_network(network)
        .map_err(|_| Error::validation(format!("address {} is not valid for {}", address, network)))
}

/// Canonical form used as the registry key: bech32 lowercased, base58 as
/// given. Strings that do not parse are only trimmed.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    match Address::from_str(trimmed) {
        Ok(parsed) => parsed.assume_checked().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_checks_network() {
        let mainnet = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert!(parse_address(mainnet, Network::Bitcoin).is_ok());
        assert!(matches!(parse_address(mainnet, Network::Testnet), Err(Error::Validation(_))));
        assert!(matches!(parse_address("not-an-address", Network::Bitcoin), Err(Error::Validation(_))));
    }

    #[test]
    fn normalize_lowercases_bech32_only() {
        let segwit = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert_eq!(normalize_address(&format!(" {} ", segwit.to_uppercase())), segwit);
        assert_eq!(normalize_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"), "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert_eq!(normalize_address(" junk "), "junk");
    }
}
