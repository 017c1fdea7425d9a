//! Monitor - the owned registry of watched addresses
//!
//! Constructs and tears down every runtime piece of the reconciliation
//! engine and exposes the core surface:
//!
//! | Operation | Returns |
//! |-----------|---------|
//! | [`Monitor::add_monitored_address`] | `true` when newly added |
//! | [`Monitor::remove_monitored_address`] | `true` when it was monitored |
//! | [`Monitor::get_balance`] | [`BalanceReport`] |
//! | [`Monitor::get_full_status`] | address → [`AddressStatus`] |
//! | [`Monitor::build_conflict_set`] | [`ConflictSet`] |
//!
//! ## Lifecycle
//!
//! ```ignore
//! let monitor = Monitor::new(config, indexer, feed);
//! let tasks = monitor.start(&shutdown);   // event worker + poller (+ rates)
//! monitor.add_monitored_address("bc1q...", Network::Bitcoin).await?;
//! shutdown.trigger().await;               // stops tasks, drops subscriptions
//! ```

mod config;

pub use config::{Config, ConflictConfig, IndexerConfig, MonitorConfig, RatesConfig};

use async_trait::async_trait;
use bitcoin::{Network, PrivateKey, Txid};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conflict::{self, CandidateSpec, ConflictSet, OutpointDescriptor};
use crate::error::{Error, Result};
use crate::indexer::{Indexer, PushFeed};
use crate::rates::{FiatRate, FiatValue, RateService};
use crate::runtime::Shutdown;
use crate::sync::{
    EventRecord, EventSink, Poller, RefreshSource, Refresher, SubscriptionManager, SubscriptionStatus, SyncEvent,
};
use crate::wallet::{
    classify, normalize_address, parse_address, MempoolEntry, MempoolStore, Thresholds, UnspentOutput, UtxoCache, WalletBalance,
};

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub address: String,
    pub network: Network,
    #[serde(flatten)]
    pub balance: WalletBalance,
    pub tip_height: Option<u32>,
    pub from_cache: bool,
    pub age_ms: u64,
    /// A refresh failed and older data was used
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiat: Option<FiatValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressStatus {
    pub network: Network,
    pub balance: WalletBalance,
    pub utxos: Vec<UnspentOutput>,
    pub mempool: Vec<MempoolEntry>,
    pub tip_height: Option<u32>,
    /// False until the first successful unspent-output fetch
    pub synced: bool,
    pub utxos_fetched_at: Option<DateTime<Utc>>,
    pub mempool_fetched_at: Option<DateTime<Utc>>,
    pub subscription: Option<SubscriptionStatus>,
}

struct Inner {
    config: Config,
    thresholds: Thresholds,
    indexer: Arc<dyn Indexer>,
    cache: UtxoCache,
    mempool: MempoolStore,
    subscriptions: SubscriptionManager,
    addresses: RwLock<BTreeMap<String, Network>>,
    events: EventSink,
    rates: RwLock<Option<Arc<RateService>>>,
}

/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(config: Config, indexer: Arc<dyn Indexer>, feed: Arc<dyn PushFeed>) -> Self {
        let events = EventSink::new(config.monitor.event_log_capacity);
        let m = &config.monitor;
        let inner = Inner {
            thresholds: Thresholds {
                min_confirmations_spendable: m.min_confirmations_spendable,
                min_confirmations_safe: m.min_confirmations_safe,
            },
            cache: UtxoCache::new(indexer.clone(), m.cache_ttl(), m.fetch_timeout()),
            mempool: MempoolStore::new(indexer.clone(), m.fetch_timeout()),
            subscriptions: SubscriptionManager::new(feed, m.reconnect_backoff(), m.fetch_timeout(), events.clone()),
            addresses: RwLock::new(BTreeMap::new()),
            events,
            rates: RwLock::new(None),
            indexer,
            config,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &Config { &self.inner.config }

    pub fn indexer(&self) -> Arc<dyn Indexer> { self.inner.indexer.clone() }

    /// Attach a fiat-rate source used to annotate balances
    pub fn set_rates(&self, rates: Arc<RateService>) {
        *self.inner.rates.write().unwrap_or_else(|p| p.into_inner()) = Some(rates);
    }

    /// Spawn the event worker, the poller and (when attached) the rate
    /// service. Only the first call starts anything. Addresses added before
    /// this are picked up by the first poll sweep.
    pub fn start(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let Some(rx) = self.inner.events.attach_worker() else {
            warn!("monitor_already_started");
            return Vec::new();
        };

        let mut tasks = vec![tokio::spawn(run_worker(self.inner.clone(), rx, shutdown.subscribe()))];

        let m = &self.inner.config.monitor;
        let refresher: Arc<dyn Refresher> = self.inner.clone();
        tasks.push(Poller::new(m.poll_interval(), m.max_concurrent_fetches).spawn(refresher, shutdown.subscribe()));

        if let Some(rates) = self.inner.rates() {
            tasks.push(rates.spawn(shutdown.subscribe()));
        }
        info!(tasks = tasks.len(), "monitor_started");
        tasks
    }

    /// Start watching `address`. Re-adding an address already watched on
    /// the same network is a no-op returning `false`. Must be called inside
    /// a Tokio runtime.
    pub async fn add_monitored_address(&self, address: &str, network: Network) -> Result<bool> {
        let address = parse_address(address, network)?.to_string();
        {
            let mut addresses = self.inner.addresses.write().unwrap_or_else(|p| p.into_inner());
            match addresses.get(&address) {
                Some(existing) if *existing == network => return Ok(false),
                Some(existing) => {
                    return Err(Error::validation(format!("{} is already monitored on {}", address, existing)));
                }
                None => {
                    addresses.insert(address.clone(), network);
                }
            }
        }
        self.inner.subscriptions.subscribe(&address);
        info!(address = %address, %network, "address_added");
        self.inner.events.emit(SyncEvent::AddressAdded { address, network });
        Ok(true)
    }

    /// Stop watching `address`. The subscription is REMOVED, its task aborted
    /// and cached data evicted before this returns.
    pub fn remove_monitored_address(&self, address: &str) -> bool {
        let address = normalize_address(address);
        let removed = self.inner.addresses.write().unwrap_or_else(|p| p.into_inner()).remove(&address).is_some();
        if !removed {
            return false;
        }
        self.inner.subscriptions.unsubscribe(&address);
        self.inner.discard(&address);
        info!(address = %address, "address_removed");
        self.inner.events.emit(SyncEvent::AddressRemoved { address });
        true
    }

    pub fn monitored_addresses(&self) -> Vec<(String, Network)> { self.inner.snapshot_addresses() }

    pub fn is_monitored(&self, address: &str) -> bool { self.inner.network_of(&normalize_address(address)).is_some() }

    /// Balance for a monitored address. Served from the cache within the
    /// TTL; an indexer failure falls back to older data marked stale and
    /// only errors when nothing has ever been fetched.
    pub async fn get_balance(&self, address: &str) -> Result<BalanceReport> {
        let address = normalize_address(address);
        let address = address.as_str();
        let network = self
            .inner
            .network_of(address)
            .ok_or_else(|| Error::validation(format!("{} is not monitored", address)))?;

        let read = self.inner.cache.get_or_fetch(address, network).await?;
        let (entries, mempool_error) = match self.inner.mempool.get_or_fetch(address).await {
            Ok((snapshot, _)) => (snapshot.entries, None),
            Err(e) => {
                warn!(address, error = %e, "mempool_unavailable");
                (Vec::new(), Some(e.to_string()))
            }
        };

        if self.inner.network_of(address).is_none() {
            self.inner.discard(address);
            return Err(Error::validation(format!("{} was removed", address)));
        }

        let balance = classify(read.outputs(), read.snapshot.tip_height, &entries, self.inner.thresholds);
        let fiat = self.inner.rates().and_then(|r| r.annotate(balance.total));
        debug!(address, total = balance.total, from_cache = read.from_cache, stale = read.stale, "balance");

        Ok(BalanceReport {
            address: address.to_string(),
            network,
            tip_height: read.snapshot.tip_height,
            from_cache: read.from_cache,
            age_ms: read.age().as_millis() as u64,
            stale: read.stale || mempool_error.is_some(),
            error: read.error.or(mempool_error),
            fiat,
            balance,
        })
    }

    /// Everything known about every monitored address. Never touches the
    /// indexer and never waits on an in-flight fetch.
    pub fn get_full_status(&self) -> BTreeMap<String, AddressStatus> {
        let mut status = BTreeMap::new();
        for (address, network) in self.inner.snapshot_addresses() {
            let utxos = self.inner.cache.peek(&address, network);
            let mempool = self.inner.mempool.get(&address);
            let outputs = utxos.as_ref().map(|s| s.outputs.clone()).unwrap_or_default();
            let entries = mempool.as_ref().map(|s| s.entries.clone()).unwrap_or_default();
            let tip_height = utxos.as_ref().and_then(|s| s.tip_height);
            status.insert(
                address.clone(),
                AddressStatus {
                    network,
                    balance: classify(&outputs, tip_height, &entries, self.inner.thresholds),
                    utxos: outputs,
                    mempool: entries,
                    tip_height,
                    synced: utxos.is_some(),
                    utxos_fetched_at: utxos.map(|s| s.fetched_at_utc),
                    mempool_fetched_at: mempool.map(|s| s.fetched_at_utc),
                    subscription: self.inner.subscriptions.status(&address),
                },
            );
        }
        // drop anything removed while we were reading
        status.retain(|address, _| self.inner.network_of(address).is_some());
        status
    }

    /// Sign competing spends of one outpoint. Never broadcasts.
    pub fn build_conflict_set(
        &self,
        outpoint: &OutpointDescriptor,
        key: &PrivateKey,
        specs: &[CandidateSpec],
    ) -> Result<ConflictSet> {
        conflict::build_conflict_set(&self.inner.config.conflict, outpoint, key, specs)
    }

    /// Descriptor for `txid:vout` from the indexer's transaction detail
    pub async fn resolve_outpoint(&self, txid: Txid, vout: u32, network: Network) -> Result<OutpointDescriptor> {
        OutpointDescriptor::resolve(self.inner.indexer.as_ref(), txid, vout, network).await
    }

    /// Force a refresh of one monitored address
    pub async fn refresh(&self, address: &str) -> Result<()> {
        self.inner.refresh_address(&normalize_address(address), RefreshSource::Push).await
    }

    pub fn subscription_status(&self, address: &str) -> Option<SubscriptionStatus> {
        self.inner.subscriptions.status(&normalize_address(address))
    }

    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> { self.inner.events.recent(limit) }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> { self.inner.events.subscribe() }

    /// Fetch a fiat rate now instead of waiting for the rate service
    pub async fn refresh_rates(&self) -> Option<FiatRate> {
        let rates = self.inner.rates()?;
        match rates.refresh().await {
            Ok(rate) => Some(rate),
            Err(e) => {
                warn!(error = %e, "fiat_rate_fetch_failed");
                None
            }
        }
    }

    /// Drop every subscription. Background tasks stop on the shutdown signal.
    pub fn shutdown(&self) { self.inner.subscriptions.shutdown(); }
}

impl Inner {
    fn network_of(&self, address: &str) -> Option<Network> {
        self.addresses.read().unwrap_or_else(|p| p.into_inner()).get(address).copied()
    }

    fn snapshot_addresses(&self) -> Vec<(String, Network)> {
        self.addresses.read().unwrap_or_else(|p| p.into_inner()).iter().map(|(a, n)| (a.clone(), *n)).collect()
    }

    fn rates(&self) -> Option<Arc<RateService>> { self.rates.read().unwrap_or_else(|p| p.into_inner()).clone() }

    fn discard(&self, address: &str) {
        self.cache.evict(address);
        self.mempool.evict(address);
    }

    /// Full re-read of both stores. Results for an address removed while
    /// the fetch was in flight are discarded.
    async fn refresh_address(&self, address: &str, source: RefreshSource) -> Result<()> {
        let Some(network) = self.network_of(address) else {
            return Ok(());
        };

        let (utxos, mempool) = tokio::join!(self.cache.refresh(address, network), self.mempool.refresh(address));

        if self.network_of(address).is_none() {
            self.discard(address);
            debug!(address, "refresh_discarded_after_removal");
            return Ok(());
        }

        let outcome = match (utxos, mempool) {
            (Ok(read), Ok(snapshot)) if !read.stale => Ok((read.snapshot.outputs.len(), snapshot.entries.len())),
            (Ok(read), Ok(_)) => Err(Error::upstream(read.error.unwrap_or_else(|| "refresh failed".into()))),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        match outcome {
            Ok((utxos, mempool_txs)) => {
                self.events.emit(SyncEvent::Refreshed { address: address.to_string(), source, utxos, mempool_txs });
                Ok(())
            }
            Err(e) => {
                warn!(address, ?source, error = %e, "refresh_failed");
                self.events.emit(SyncEvent::FetchFailed { address: address.to_string(), source, error: e.to_string() });
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Refresher for Inner {
    fn targets(&self) -> Vec<String> { self.snapshot_addresses().into_iter().map(|(a, _)| a).collect() }

    async fn refresh(&self, address: &str, source: RefreshSource) -> Result<()> {
        self.refresh_address(address, source).await
    }
}

/// Turns feed and registry events into refreshes
async fn run_worker(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<SyncEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                inner.subscriptions.shutdown();
                info!("monitor_stopped");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                let source = match &event {
                    SyncEvent::AddressAdded { .. } => RefreshSource::Added,
                    SyncEvent::TxDetected { .. } => RefreshSource::Push,
                    _ => continue,
                };
                let inner = inner.clone();
                let address = event.address().to_string();
                tokio::spawn(async move {
                    // failures are already recorded as FetchFailed
                    let _ = inner.refresh_address(&address, source).await;
                });
            }
        }
    }
}
