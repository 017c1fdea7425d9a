//! Unspent-output cache - per (network, address) TTL store

use bitcoin::{Network, OutPoint, Txid};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::parse_address;
use crate::error::{Error, Result};
use crate::indexer::{Indexer, UtxoRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnspentOutput {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub confirmation_height: Option<u32>,
    pub confirmation_time: Option<u64>,
    pub is_confirmed: bool,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> OutPoint { OutPoint { txid: self.txid, vout: self.vout } }

    /// Blocks mined on top of (and including) the confirming block. A
    /// confirmed output with unknown height or tip counts as one.
    pub fn confirmations(&self, tip_height: Option<u32>) -> u32 {
        if !self.is_confirmed {
            return 0;
        }
        match (tip_height, self.confirmation_height) {
            (Some(tip), Some(height)) if tip >= height => tip - height + 1,
            _ => 1,
        }
    }
}

impl From<UtxoRecord> for UnspentOutput {
    fn from(r: UtxoRecord) -> Self {
        Self {
            txid: r.txid,
            vout: r.vout,
            value: r.value,
            confirmation_height: r.status.block_height,
            confirmation_time: r.status.block_time,
            is_confirmed: r.status.confirmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub network: Network,
    pub address: String,
}

/// One complete fetch result. Never merged, only replaced.
#[derive(Debug, Clone)]
pub struct UtxoSnapshot {
    pub outputs: Vec<UnspentOutput>,
    pub tip_height: Option<u32>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl UtxoSnapshot {
    pub fn age(&self) -> Duration { self.fetched_at.elapsed() }
}

/// Result of a cache read
#[derive(Debug, Clone)]
pub struct CacheRead {
    pub snapshot: UtxoSnapshot,
    pub from_cache: bool,
    /// Set when a refresh failed and the prior entry was served instead
    pub stale: bool,
    pub error: Option<String>,
}

impl CacheRead {
    pub fn outputs(&self) -> &[UnspentOutput] { &self.snapshot.outputs }
    pub fn age(&self) -> Duration { self.snapshot.age() }
}

/// Fetches for one key are serialized by `fetch`; readers never wait on it.
#[derive(Default)]
struct Slot {
    fetch: tokio::sync::Mutex<()>,
    entry: RwLock<Option<UtxoSnapshot>>,
}

impl Slot {
    fn read(&self) -> Option<UtxoSnapshot> { self.entry.read().unwrap_or_else(|p| p.into_inner()).clone() }

    fn fresh(&self, ttl: Duration) -> Option<UtxoSnapshot> { self.read().filter(|s| s.age() < ttl) }

    fn store(&self, snapshot: UtxoSnapshot) { *self.entry.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot); }
}

pub struct UtxoCache {
    indexer: Arc<dyn Indexer>,
    ttl: Duration,
    fetch_timeout: Duration,
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
}

impl UtxoCache {
    pub fn new(indexer: Arc<dyn Indexer>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self { indexer, ttl, fetch_timeout, slots: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    fn slot(&self, key: CacheKey) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(key).or_default().clone()
    }

    fn existing_slot(&self, key: &CacheKey) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.get(key).cloned()
    }

    /// Serve the cached entry while younger than the TTL, otherwise fetch
    /// the full list and replace it.
    pub async fn get_or_fetch(&self, address: &str, network: Network) -> Result<CacheRead> {
        parse_address(address, network)?;
        let slot = self.slot(CacheKey { network, address: address.to_string() });
        if let Some(snapshot) = slot.fresh(self.ttl) {
            return Ok(CacheRead { snapshot, from_cache: true, stale: false, error: None });
        }
        let _fetching = slot.fetch.lock().await;
        // filled by whoever held the lock before us
        if let Some(snapshot) = slot.fresh(self.ttl) {
            return Ok(CacheRead { snapshot, from_cache: true, stale: false, error: None });
        }
        self.fetch_into(address, &slot).await
    }

    /// Fetch regardless of TTL. On failure the prior entry is kept and
    /// returned marked stale.
    pub async fn refresh(&self, address: &str, network: Network) -> Result<CacheRead> {
        parse_address(address, network)?;
        let slot = self.slot(CacheKey { network, address: address.to_string() });
        let _fetching = slot.fetch.lock().await;
        self.fetch_into(address, &slot).await
    }

    /// Last known entry without touching the indexer or waiting on a fetch
    pub fn peek(&self, address: &str, network: Network) -> Option<UtxoSnapshot> {
        self.existing_slot(&CacheKey { network, address: address.to_string() })?.read()
    }

    /// Drop every key for `address`. Fetches already holding a slot finish
    /// into the detached slot and are discarded.
    pub fn evict(&self, address: &str) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let before = slots.len();
        slots.retain(|key, _| key.address != address);
        before - slots.len()
    }

    pub fn contains(&self, address: &str, network: Network) -> bool {
        self.existing_slot(&CacheKey { network, address: address.to_string() }).is_some()
    }

    async fn fetch_into(&self, address: &str, slot: &Slot) -> Result<CacheRead> {
        match self.fetch(address).await {
            Ok(snapshot) => {
                debug!(address, outputs = snapshot.outputs.len(), tip = ?snapshot.tip_height, "utxo_cache_refreshed");
                slot.store(snapshot.clone());
                Ok(CacheRead { snapshot, from_cache: false, stale: false, error: None })
            }
            Err(e) => match slot.read() {
                Some(prior) => {
                    warn!(address, error = %e, age_ms = prior.age().as_millis() as u64, "utxo_fetch_failed_serving_stale");
                    Ok(CacheRead { snapshot: prior, from_cache: true, stale: true, error: Some(e.to_string()) })
                }
                None => Err(e),
            },
        }
    }

    async fn fetch(&self, address: &str) -> Result<UtxoSnapshot> {
        let indexer = &self.indexer;
        let (utxos, tip) = tokio::time::timeout(self.fetch_timeout, async {
            tokio::try_join!(indexer.address_utxos(address), indexer.tip_height())
        })
        .await
        .map_err(|_| Error::upstream(format!("utxo fetch for {} timed out", address)))??;

        Ok(UtxoSnapshot {
            outputs: utxos.into_iter().map(UnspentOutput::from).collect(),
            tip_height: Some(tip),
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        })
    }
}
