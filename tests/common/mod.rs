//! In-process fakes for the indexer and push feed

#![allow(dead_code)]

use async_trait::async_trait;
use rbfwatch::indexer::{FeedEvent, Indexer, MempoolTx, PushFeed, RecommendedFees, TxOutput, TxRecord, UtxoRecord};
use rbfwatch::monitor::{Config, MonitorConfig};
use rbfwatch::{Error, Monitor, Result, Txid};
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ADDR_A: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
pub const ADDR_B: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub const ADDR_C: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

pub fn txid(n: u8) -> Txid {
    Txid::from_str(&format!("{:02x}", n).repeat(32)).unwrap()
}

pub fn incoming(n: u8, address: &str, value: u64) -> MempoolTx {
    MempoolTx {
        txid: txid(n),
        fee: 300,
        vsize: 141,
        replaceable: Some(true),
        outputs: vec![TxOutput { vout: 0, address: Some(address.to_string()), value }],
    }
}

/// Scriptable indexer. Holding `gate.write()` parks every unspent-output and
/// mempool fetch until it is released.
pub struct FakeIndexer {
    pub tip: AtomicU32,
    pub utxos: Mutex<HashMap<String, Vec<UtxoRecord>>>,
    /// One-shot answers, taken in call order before the gate
    pub queued_utxos: Mutex<VecDeque<Vec<UtxoRecord>>>,
    pub mempool: Mutex<HashMap<String, Vec<MempoolTx>>>,
    pub txs: Mutex<HashMap<Txid, TxRecord>>,
    pub failing: Mutex<HashSet<String>>,
    pub fail_all: AtomicBool,
    pub utxo_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub gate: tokio::sync::RwLock<()>,
}

impl FakeIndexer {
    pub fn new(tip: u32) -> Arc<Self> {
        Arc::new(Self {
            tip: AtomicU32::new(tip),
            utxos: Mutex::new(HashMap::new()),
            queued_utxos: Mutex::new(VecDeque::new()),
            mempool: Mutex::new(HashMap::new()),
            txs: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            utxo_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            gate: tokio::sync::RwLock::new(()),
        })
    }

    pub fn set_utxos(&self, address: &str, utxos: Vec<UtxoRecord>) {
        self.utxos.lock().unwrap().insert(address.to_string(), utxos);
    }

    pub fn queue_utxos(&self, utxos: Vec<UtxoRecord>) {
        self.queued_utxos.lock().unwrap().push_back(utxos);
    }

    pub fn set_mempool(&self, address: &str, txs: Vec<MempoolTx>) {
        self.mempool.lock().unwrap().insert(address.to_string(), txs);
    }

    pub fn fail(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    fn check(&self, address: &str) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(address) {
            return Err(Error::upstream(format!("503 for {}", address)));
        }
        Ok(())
    }

    async fn pass_gate(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.read().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Indexer for FakeIndexer {
    async fn tip_height(&self) -> Result<u32> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::upstream("503"));
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn address_utxos(&self, address: &str) -> Result<Vec<UtxoRecord>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.queued_utxos.lock().unwrap().pop_front();
        self.pass_gate().await;
        self.check(address)?;
        if let Some(utxos) = queued {
            return Ok(utxos);
        }
        Ok(self.utxos.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn address_mempool(&self, address: &str) -> Result<Vec<MempoolTx>> {
        self.pass_gate().await;
        self.check(address)?;
        Ok(self.mempool.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn transaction(&self, txid: &Txid) -> Result<TxRecord> {
        self.txs.lock().unwrap().get(txid).cloned().ok_or_else(|| Error::upstream(format!("404 {}", txid)))
    }

    async fn recommended_fees(&self) -> Result<RecommendedFees> {
        Ok(RecommendedFees { fastest_fee: 20.0, half_hour_fee: 15.0, hour_fee: 10.0, economy_fee: 5.0, minimum_fee: 1.0 })
    }
}

/// Refuses the first `failures` connects, then hands out channels kept open
/// until `drop_connections`
pub struct FakeFeed {
    failures: u32,
    pub attempts: AtomicU32,
    senders: Mutex<Vec<(String, mpsc::Sender<FeedEvent>)>>,
}

impl FakeFeed {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self { failures, attempts: AtomicU32::new(0), senders: Mutex::new(Vec::new()) })
    }

    pub async fn push(&self, address: &str, event: FeedEvent) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, s)| s.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub fn drop_connections(&self) {
        self.senders.lock().unwrap().clear();
    }
}

#[async_trait]
impl PushFeed for FakeFeed {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<FeedEvent>> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(Error::connection("connection refused"));
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push((address.to_string(), tx));
        Ok(rx)
    }
}

pub fn test_config() -> Config {
    Config::default().with_monitor(
        MonitorConfig::default()
            .with_cache_ttl(Duration::from_secs(30))
            .with_poll_interval(Duration::from_secs(3600))
            .with_reconnect_backoff(Duration::from_millis(20))
            .with_fetch_timeout(Duration::from_secs(2)),
    )
}

pub fn monitor_with(config: Config, indexer: Arc<FakeIndexer>, feed: Arc<FakeFeed>) -> Monitor {
    Monitor::new(config, indexer, feed)
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
