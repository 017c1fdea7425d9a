//! Mempool snapshot store - per-address unconfirmed transactions

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::indexer::{Indexer, MempoolTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolEntry {
    pub txid: Txid,
    pub fee: u64,
    pub virtual_size: u64,
    pub is_replaceable: bool,
    /// First time any snapshot for this address contained the transaction
    pub observed_at: DateTime<Utc>,
    /// Σ outputs paying the monitored address
    pub receive_amount: u64,
    /// (vout, value) of every output paying the monitored address
    pub receiving_outputs: Vec<(u32, u64)>,
}

impl MempoolEntry {
    pub fn from_tx(tx: &MempoolTx, address: &str, observed_at: DateTime<Utc>) -> Self {
        let receiving_outputs: Vec<(u32, u64)> = tx
            .outputs
            .iter()
            .filter(|o| o.address.as_deref() == Some(address))
            .map(|o| (o.vout, o.value))
            .collect();
        Self {
            txid: tx.txid,
            fee: tx.fee,
            virtual_size: tx.vsize,
            is_replaceable: tx.replaceable.unwrap_or(false),
            observed_at,
            receive_amount: receiving_outputs.iter().map(|(_, v)| v).sum(),
            receiving_outputs,
        }
    }

    pub fn is_incoming(&self) -> bool { self.receive_amount > 0 }

    pub fn fee_rate(&self) -> f64 {
        if self.virtual_size == 0 { 0.0 } else { self.fee as f64 / self.virtual_size as f64 }
    }
}

#[derive(Debug, Clone)]
pub struct MempoolSnapshot {
    pub entries: Vec<MempoolEntry>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl MempoolSnapshot {
    pub fn age(&self) -> Duration { self.fetched_at.elapsed() }
}

#[derive(Default)]
struct Slot {
    fetch: tokio::sync::Mutex<()>,
    entry: RwLock<Option<MempoolSnapshot>>,
}

impl Slot {
    fn read(&self) -> Option<MempoolSnapshot> { self.entry.read().unwrap_or_else(|p| p.into_inner()).clone() }
}

pub struct MempoolStore {
    indexer: Arc<dyn Indexer>,
    fetch_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl MempoolStore {
    pub fn new(indexer: Arc<dyn Indexer>, fetch_timeout: Duration) -> Self {
        Self { indexer, fetch_timeout, slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, address: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(address.to_string()).or_default().clone()
    }

    fn existing_slot(&self, address: &str) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.get(address).cloned()
    }

    /// Re-read the full unconfirmed set and replace the snapshot. A failed
    /// fetch leaves the previous snapshot in place.
    pub async fn refresh(&self, address: &str) -> Result<MempoolSnapshot> {
        let slot = self.slot(address);
        let _fetching = slot.fetch.lock().await;

        let txs = tokio::time::timeout(self.fetch_timeout, self.indexer.address_mempool(address))
            .await
            .map_err(|_| Error::upstream(format!("mempool fetch for {} timed out", address)))??;

        let now = Utc::now();
        let first_seen: HashMap<Txid, DateTime<Utc>> = slot
            .read()
            .map(|prev| prev.entries.iter().map(|e| (e.txid, e.observed_at)).collect())
            .unwrap_or_default();

        let mut entries: Vec<MempoolEntry> = Vec::with_capacity(txs.len());
        for tx in &txs {
            if entries.iter().any(|e| e.txid == tx.txid) {
                continue;
            }
            let observed_at = first_seen.get(&tx.txid).copied().unwrap_or(now);
            entries.push(MempoolEntry::from_tx(tx, address, observed_at));
        }

        debug!(address, txs = entries.len(), "mempool_snapshot_refreshed");
        let snapshot = MempoolSnapshot { entries, fetched_at: Instant::now(), fetched_at_utc: now };
        *slot.entry.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Current snapshot, never waits on an in-flight fetch
    pub fn get(&self, address: &str) -> Option<MempoolSnapshot> {
        self.existing_slot(address)?.read()
    }

    /// Snapshot if one exists, otherwise fetch it. The flag reports whether
    /// the result came from the store.
    pub async fn get_or_fetch(&self, address: &str) -> Result<(MempoolSnapshot, bool)> {
        if let Some(snapshot) = self.get(address) {
            return Ok((snapshot, true));
        }
        Ok((self.refresh(address).await?, false))
    }

    pub fn evict(&self, address: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.remove(address).is_some()
    }
}
