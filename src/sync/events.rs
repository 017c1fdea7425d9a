//! Typed sync messages and the recent-event log

use bitcoin::{Network, Txid};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshSource {
    Added,
    Poll,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    AddressAdded { address: String, network: Network },
    AddressRemoved { address: String },
    Subscribed { address: String },
    /// Any transaction event on the push feed
    TxDetected { address: String, txid: Txid },
    ConnectionLost { address: String, error: String },
    Reconnecting { address: String, attempt: u32, backoff_ms: u64 },
    Refreshed { address: String, source: RefreshSource, utxos: usize, mempool_txs: usize },
    FetchFailed { address: String, source: RefreshSource, error: String },
}

impl SyncEvent {
    pub fn address(&self) -> &str {
        match self {
            SyncEvent::AddressAdded { address, .. }
            | SyncEvent::AddressRemoved { address }
            | SyncEvent::Subscribed { address }
            | SyncEvent::TxDetected { address, .. }
            | SyncEvent::ConnectionLost { address, .. }
            | SyncEvent::Reconnecting { address, .. }
            | SyncEvent::Refreshed { address, .. }
            | SyncEvent::FetchFailed { address, .. } => address,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SyncEvent,
}

/// Where every component sends its events. Each event is kept in a bounded
/// log, fanned out to observers, and forwarded to the monitor's worker once
/// one is attached. Nothing queues for a worker that never started.
#[derive(Clone)]
pub struct EventSink {
    log: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
    observers: broadcast::Sender<SyncEvent>,
    worker: Arc<OnceLock<mpsc::UnboundedSender<SyncEvent>>>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity.max(16));
        Self {
            log: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            observers,
            worker: Arc::new(OnceLock::new()),
        }
    }

    /// Receiver for every event emitted from now on. `None` if a worker is
    /// already attached.
    pub fn attach_worker(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.worker.set(tx).ok()?;
        Some(rx)
    }

    pub fn emit(&self, event: SyncEvent) {
        {
            let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(EventRecord { at: Utc::now(), event: event.clone() });
        }
        let _ = self.observers.send(event.clone());
        if let Some(worker) = self.worker.get() {
            let _ = worker.send(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> { self.observers.subscribe() }

    /// Newest last
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let log = self.log.lock().unwrap_or_else(|p| p.into_inner());
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }
}
