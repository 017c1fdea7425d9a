//! Path constants for the indexer REST API and push feed
//!
//! Esplora / mempool.space layout. Everything the clients send over the
//! wire is named here so alternate indexers only need a new table.

/// REST paths, relative to `IndexerConfig::base_url`
pub mod rest {
    pub const TIP_HEIGHT: &str = "/blocks/tip/height";
    pub const TX: &str = "/tx";
    pub const ADDRESS: &str = "/address";
    pub const UTXO_SUFFIX: &str = "/utxo";
    pub const MEMPOOL_SUFFIX: &str = "/txs/mempool";
    pub const FEES_RECOMMENDED: &str = "/v1/fees/recommended";

    pub fn address_utxos(address: &str) -> String { format!("{}/{}{}", ADDRESS, address, UTXO_SUFFIX) }
    pub fn address_mempool(address: &str) -> String { format!("{}/{}{}", ADDRESS, address, MEMPOOL_SUFFIX) }
    pub fn tx(txid: &str) -> String { format!("{}/{}", TX, txid) }
}

/// Push feed message keys
pub mod feed {
    pub const TRACK_ADDRESS: &str = "track-address";
    pub const ADDRESS_TRANSACTIONS: &str = "address-transactions";
    pub const BLOCK_TRANSACTIONS: &str = "block-transactions";
    pub const ADDRESS_REMOVED_TRANSACTIONS: &str = "address-removed-transactions";
    pub const PONG: &str = "pong";
}

/// Fiat price endpoint
pub mod prices {
    pub const PRICES: &str = "/v1/prices";
}

/// Monitor HTTP surface
pub mod http {
    pub const HEALTH: &str = "/health";
    pub const ADDRESSES: &str = "/addresses";
    pub const ADDRESS: &str = "/addresses/:address";
    pub const BALANCE: &str = "/balance/:address";
    pub const STATUS: &str = "/status";
    pub const EVENTS: &str = "/events";
    pub const CONFLICT: &str = "/conflict";
}
