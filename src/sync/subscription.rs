//! Address subscription manager - one reconnecting push connection per address
//!
//! ```text
//! DISCONNECTED ──► CONNECTING ──► SUBSCRIBED ──(event)──► TxDetected
//!      ▲                │              │
//!      └──(backoff)─────┴──(error/close)┘
//!
//! unsubscribe() from any state ──► REMOVED (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{EventSink, SyncEvent};
use crate::indexer::PushFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub address: String,
    pub state: SubscriptionState,
    /// Reconnects since the subscription was created
    pub retry_count: u32,
    pub last_event_time: Option<DateTime<Utc>>,
    pub connected_since: Option<DateTime<Utc>>,
}

struct Subscription {
    status: Arc<Mutex<SubscriptionStatus>>,
    task: JoinHandle<()>,
}

pub struct SubscriptionManager {
    feed: Arc<dyn PushFeed>,
    backoff: Duration,
    connect_timeout: Duration,
    events: EventSink,
    subs: Mutex<HashMap<String, Subscription>>,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn PushFeed>, backoff: Duration, connect_timeout: Duration, events: EventSink) -> Self {
        Self { feed, backoff, connect_timeout, events, subs: Mutex::new(HashMap::new()) }
    }

    /// Start the lifecycle task for `address`. Returns false when a live
    /// subscription already exists. Must be called inside a Tokio runtime.
    pub fn subscribe(&self, address: &str) -> bool {
        let mut subs = self.subs.lock().unwrap_or_else(|p| p.into_inner());
        if subs.contains_key(address) {
            return false;
        }

        let status = Arc::new(Mutex::new(SubscriptionStatus {
            address: address.to_string(),
            state: SubscriptionState::Disconnected,
            retry_count: 0,
            last_event_time: None,
            connected_since: None,
        }));
        let task = tokio::spawn(run_subscription(
            address.to_string(),
            self.feed.clone(),
            status.clone(),
            self.events.clone(),
            self.backoff,
            self.connect_timeout,
        ));
        subs.insert(address.to_string(), Subscription { status, task });
        true
    }

    /// Move to REMOVED and drop the connection. Takes effect before this
    /// returns; the task never runs again.
    pub fn unsubscribe(&self, address: &str) -> Option<SubscriptionStatus> {
        let sub = {
            let mut subs = self.subs.lock().unwrap_or_else(|p| p.into_inner());
            subs.remove(address)?
        };
        let final_status = {
            let mut status = sub.status.lock().unwrap_or_else(|p| p.into_inner());
            status.state = SubscriptionState::Removed;
            status.connected_since = None;
            status.clone()
        };
        sub.task.abort();
        debug!(address, "subscription_removed");
        Some(final_status)
    }

    pub fn status(&self, address: &str) -> Option<SubscriptionStatus> {
        let subs = self.subs.lock().unwrap_or_else(|p| p.into_inner());
        subs.get(address).map(|s| s.status.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    pub fn addresses(&self) -> Vec<String> {
        let subs = self.subs.lock().unwrap_or_else(|p| p.into_inner());
        subs.keys().cloned().collect()
    }

    pub fn shutdown(&self) {
        for address in self.addresses() {
            self.unsubscribe(&address);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let subs = self.subs.get_mut().unwrap_or_else(|p| p.into_inner());
        for (_, sub) in subs.drain() {
            sub.task.abort();
        }
    }
}

fn update(status: &Mutex<SubscriptionStatus>, f: impl FnOnce(&mut SubscriptionStatus)) -> Option<u32> {
    let mut s = status.lock().unwrap_or_else(|p| p.into_inner());
    if s.state == SubscriptionState::Removed {
        return None;
    }
    f(&mut s);
    Some(s.retry_count)
}

/// Connect, forward events until the feed closes, wait out the backoff,
/// repeat. Ends only by abort.
async fn run_subscription(
    address: String,
    feed: Arc<dyn PushFeed>,
    status: Arc<Mutex<SubscriptionStatus>>,
    events: EventSink,
    backoff: Duration,
    connect_timeout: Duration,
) {
    loop {
        if update(&status, |s| s.state = SubscriptionState::Connecting).is_none() {
            return;
        }

        let error = match tokio::time::timeout(connect_timeout, feed.subscribe(&address)).await {
            Ok(Ok(mut rx)) => {
                update(&status, |s| {
                    s.state = SubscriptionState::Subscribed;
                    s.connected_since = Some(Utc::now());
                });
                info!(address = %address, "subscribed");
                events.emit(SyncEvent::Subscribed { address: address.clone() });

                while let Some(event) = rx.recv().await {
                    update(&status, |s| s.last_event_time = Some(Utc::now()));
                    events.emit(SyncEvent::TxDetected { address: address.clone(), txid: event.txid() });
                }
                "feed closed".to_string()
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {}ms", connect_timeout.as_millis()),
        };

        warn!(address = %address, error = %error, "subscription_dropped");
        events.emit(SyncEvent::ConnectionLost { address: address.clone(), error });

        let Some(attempt) = update(&status, |s| {
            s.state = SubscriptionState::Disconnected;
            s.connected_since = None;
            s.retry_count += 1;
        }) else {
            return;
        };
        events.emit(SyncEvent::Reconnecting { address: address.clone(), attempt, backoff_ms: backoff.as_millis() as u64 });
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::indexer::FeedEvent;
    use async_trait::async_trait;
    use bitcoin::Txid;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Refuses the first `failures` connects, then hands out live channels
    struct ScriptedFeed {
        failures: u32,
        attempts: AtomicU32,
        senders: Mutex<Vec<mpsc::Sender<FeedEvent>>>,
    }

    #[async_trait]
    impl PushFeed for ScriptedFeed {
        async fn subscribe(&self, _address: &str) -> Result<mpsc::Receiver<FeedEvent>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::connection("refused"));
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn manager(failures: u32) -> (Arc<ScriptedFeed>, SubscriptionManager, mpsc::UnboundedReceiver<SyncEvent>) {
        let feed = Arc::new(ScriptedFeed { failures, attempts: AtomicU32::new(0), senders: Mutex::new(vec![]) });
        let sink = EventSink::new(64);
        let rx = sink.attach_worker().unwrap();
        let mgr = SubscriptionManager::new(feed.clone(), Duration::from_millis(20), Duration::from_secs(1), sink);
        (feed, mgr, rx)
    }

    async fn wait_for(mgr: &SubscriptionManager, address: &str, state: SubscriptionState) -> SubscriptionStatus {
        for _ in 0..200 {
            if let Some(s) = mgr.status(address) {
                if s.state == state {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never reached {:?}", address, state);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let (feed, mgr, _rx) = manager(0);
        assert!(mgr.subscribe("a"));
        assert!(!mgr.subscribe("a"));
        wait_for(&mgr, "a", SubscriptionState::Subscribed).await;
        assert_eq!(feed.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnects_after_failures_then_forwards_events() {
        let (feed, mgr, mut rx) = manager(2);
        mgr.subscribe("a");
        let status = wait_for(&mgr, "a", SubscriptionState::Subscribed).await;
        assert_eq!(status.retry_count, 2);
        assert!(status.connected_since.is_some());

        let txid = Txid::from_str("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap();
        let sender = feed.senders.lock().unwrap()[0].clone();
        sender.send(FeedEvent::TxDetected { txid }).await.unwrap();

        let mut detected = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            if let SyncEvent::TxDetected { txid, .. } = event {
                detected = Some(txid);
                break;
            }
        }
        assert_eq!(detected, Some(txid));
        assert!(mgr.status("a").unwrap().last_event_time.is_some());
    }

    #[tokio::test]
    async fn dropped_connection_counts_a_retry() {
        let (feed, mgr, _rx) = manager(0);
        mgr.subscribe("a");
        wait_for(&mgr, "a", SubscriptionState::Subscribed).await;
        feed.senders.lock().unwrap().clear();

        for _ in 0..200 {
            if feed.attempts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = wait_for(&mgr, "a", SubscriptionState::Subscribed).await;
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_immediate_and_final() {
        let (feed, mgr, _rx) = manager(u32::MAX);
        mgr.subscribe("a");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = mgr.unsubscribe("a").unwrap();
        assert_eq!(status.state, SubscriptionState::Removed);
        assert!(mgr.status("a").is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let attempts = feed.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(feed.attempts.load(Ordering::SeqCst), attempts);
        assert!(mgr.unsubscribe("a").is_none());
    }
}
