//! Sync - keeps the wallet stores converging on the ledger
//!
//! Two independent paths feed the same refresh:
//!
//! - [`SubscriptionManager`]: one push subscription per address, reconnecting
//!   on a fixed backoff. Transaction events trigger a refresh.
//! - [`Poller`]: periodic sweep over every monitored address.
//!
//! Everything they observe is reported as a [`SyncEvent`] through an
//! [`EventSink`].

mod events;
mod poller;
mod subscription;

pub use events::{EventRecord, EventSink, RefreshSource, SyncEvent};
pub use poller::{Poller, Refresher, SweepReport};
pub use subscription::{SubscriptionManager, SubscriptionState, SubscriptionStatus};
