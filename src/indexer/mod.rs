//! Indexer - the external ledger collaborators
//!
//! Three seams, each a trait so the reconciliation engine can run against
//! fakes:
//!
//! | Trait | Implementation | Used by |
//! |-------|----------------|---------|
//! | [`Indexer`] | [`EsploraClient`] (REST) | cache, mempool store, builder resolve |
//! | [`PushFeed`] | [`WsFeed`] (WebSocket) | subscription manager |
//! | [`Broadcaster`] | [`EsploraClient`] | CLI / HTTP only, never the builder |

mod feed;
mod rest;
pub mod types;

pub use feed::{parse_feed_message, FeedEvent, WsFeed};
pub use rest::EsploraClient;
pub use types::{MempoolTx, RecommendedFees, TxOutput, TxRecord, TxStatus, UtxoRecord, VinRecord, VoutRecord};

use async_trait::async_trait;
use bitcoin::{Network, Txid};
use tokio::sync::mpsc;

use crate::error::Result;

/// Pull side of the ledger indexer
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn tip_height(&self) -> Result<u32>;
    async fn address_utxos(&self, address: &str) -> Result<Vec<UtxoRecord>>;
    async fn address_mempool(&self, address: &str) -> Result<Vec<MempoolTx>>;
    async fn transaction(&self, txid: &Txid) -> Result<TxRecord>;
    async fn recommended_fees(&self) -> Result<RecommendedFees>;
}

/// Push side: one subscription per address. The returned channel closes
/// when the underlying connection drops.
#[async_trait]
pub trait PushFeed: Send + Sync {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<FeedEvent>>;
}

/// Relays a raw signed transaction
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, raw_hex: &str, network: Network) -> Result<Txid>;
}
