//! Indexer push feed - tokio-tungstenite WebSocket
//!
//! One connection per tracked address. The connection lives in a spawned
//! reader task; the receiver handed back to the caller closes when the
//! socket does, and dropping the receiver closes the socket.

use async_trait::async_trait;
use bitcoin::Txid;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::PushFeed;
use crate::core::paths::feed as keys;
use crate::error::Result;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Events delivered for a tracked address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// New unconfirmed transaction touching the address
    TxDetected { txid: Txid },
    /// Transaction touching the address was mined
    TxConfirmed { txid: Txid },
    /// Transaction dropped from the mempool (replaced or evicted)
    TxRemoved { txid: Txid },
}

impl FeedEvent {
    pub fn txid(&self) -> Txid {
        match self {
            FeedEvent::TxDetected { txid } | FeedEvent::TxConfirmed { txid } | FeedEvent::TxRemoved { txid } => *txid,
        }
    }
}

/// mempool.space style address-tracking WebSocket
pub struct WsFeed {
    url: String,
    connect_timeout: Duration,
}

impl WsFeed {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { url: url.into(), connect_timeout }
    }
}

#[async_trait]
impl PushFeed for WsFeed {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<FeedEvent>> {
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url)).await??;
        let (mut write, mut read) = ws.split();

        let track = json!({ keys::TRACK_ADDRESS: address }).to_string();
        write.send(Message::Text(track)).await?;

        let (tx, rx) = mpsc::channel::<FeedEvent>(64);
        let address = address.to_string();

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.tick().await;
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(txt))) => {
                            for event in parse_feed_message(&txt) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(address = %address, ?frame, "feed_closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(address = %address, error = %e, "feed_read_error");
                            break;
                        }
                        None => break,
                    },
                    _ = tx.closed() => break,
                    _ = ping.tick() => {
                        if write.send(Message::Text(json!({"action": "ping"}).to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        Ok(rx)
    }
}

/// Parse one feed frame into zero or more events. Unknown keys (stats,
/// fee updates, pongs) yield nothing.
pub fn parse_feed_message(msg: &str) -> Vec<FeedEvent> {
    let Ok(value) = serde_json::from_str::<Value>(msg) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    collect(&value, keys::ADDRESS_TRANSACTIONS, &mut events, |txid| FeedEvent::TxDetected { txid });
    collect(&value, keys::BLOCK_TRANSACTIONS, &mut events, |txid| FeedEvent::TxConfirmed { txid });
    collect(&value, keys::ADDRESS_REMOVED_TRANSACTIONS, &mut events, |txid| FeedEvent::TxRemoved { txid });
    events
}

fn collect(value: &Value, key: &str, out: &mut Vec<FeedEvent>, make: impl Fn(Txid) -> FeedEvent) {
    let Some(txs) = value.get(key).and_then(|v| v.as_array()) else {
        return;
    };
    out.extend(
        txs.iter()
            .filter_map(|tx| tx.get("txid").and_then(|t| t.as_str()))
            .filter_map(|t| t.parse::<Txid>().ok())
            .map(make),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID_A: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    const TXID_B: &str = "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098";

    #[test]
    fn parses_address_transactions() {
        let msg = format!(r#"{{"address-transactions": [{{"txid": "{}"}}, {{"txid": "{}"}}]}}"#, TXID_A, TXID_B);
        let events = parse_feed_message(&msg);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FeedEvent::TxDetected { .. }));
        assert_eq!(events[1].txid().to_string(), TXID_B);
    }

    #[test]
    fn parses_block_and_removed() {
        let msg = format!(
            r#"{{"block-transactions": [{{"txid": "{}"}}], "address-removed-transactions": [{{"txid": "{}"}}]}}"#,
            TXID_A, TXID_B
        );
        let events = parse_feed_message(&msg);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FeedEvent::TxConfirmed { .. }));
        assert!(matches!(events[1], FeedEvent::TxRemoved { .. }));
    }

    #[test]
    fn ignores_noise() {
        assert!(parse_feed_message(r#"{"pong": true}"#).is_empty());
        assert!(parse_feed_message("not json").is_empty());
        assert!(parse_feed_message(r#"{"address-transactions": [{"txid": "zz"}]}"#).is_empty());
    }
}
