//! rbfwatch: RBF double-spend simulator and indexer-backed wallet monitor.
//!
//! # Architecture
//!
//! ```text
//! Monitor (owned registry, passed by handle)
//!   │
//!   ├── UtxoCache ─────────┐
//!   ├── MempoolStore ──────┼── Indexer (EsploraClient, REST)
//!   ├── Poller ────────────┘        ▲
//!   ├── SubscriptionManager ── PushFeed (WsFeed, WebSocket)
//!   │        │ SyncEvent
//!   │        ▼
//!   ├── event worker ── refresh ── classify ── WalletBalance
//!   └── RateService (optional fiat annotation)
//!
//! build_conflict_set (stateless)
//!   OutpointDescriptor + key + specs ── ConflictSet ── Broadcaster (never called by the builder)
//! ```
//!
//! # Core surface
//!
//! | Operation | Method |
//! |-----------|--------|
//! | watch | `monitor.add_monitored_address(addr, network)` |
//! | unwatch | `monitor.remove_monitored_address(addr)` |
//! | balance | `monitor.get_balance(addr)` |
//! | status | `monitor.get_full_status()` |
//! | conflict | `monitor.build_conflict_set(outpoint, key, specs)` |
//!
//! # Features
//!
//! - `server` (default) - axum HTTP surface over the Monitor
//!
//! # Usage
//!
//! ```ignore
//! use rbfwatch::{Config, EsploraClient, Monitor, Network, WsFeed};
//! use std::sync::Arc;
//!
//! let config = Config::from_env();
//! let indexer = Arc::new(EsploraClient::new(&config.indexer, Network::Bitcoin)?);
//! let feed = Arc::new(WsFeed::new(&config.indexer.ws_url, config.monitor.fetch_timeout()));
//! let monitor = Monitor::new(config, indexer, feed);
//! monitor.start(&shutdown);
//! monitor.add_monitored_address("bc1q...", Network::Bitcoin).await?;
//! let balance = monitor.get_balance("bc1q...").await?;
//! ```

pub mod conflict;
pub mod core;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod monitor;
pub mod rates;
pub mod runtime;
pub mod sync;
pub mod wallet;

#[cfg(feature = "server")]
pub mod server;

pub use bitcoin::{Network, OutPoint, PrivateKey, Txid};

pub use conflict::{build_conflict_set, CandidateSpec, CandidateTransaction, ConflictSet, FeeSpec, OutpointDescriptor};
pub use error::{Error, Result};
pub use indexer::{Broadcaster, EsploraClient, Indexer, PushFeed, WsFeed};
pub use monitor::{AddressStatus, BalanceReport, Config, Monitor};
pub use rates::RateService;
pub use runtime::{install_signal_handlers, Shutdown};
pub use sync::{SubscriptionState, SyncEvent};
pub use wallet::{classify, Thresholds, WalletBalance};

#[cfg(feature = "server")]
pub use server::{create_router, create_router_with_name};
