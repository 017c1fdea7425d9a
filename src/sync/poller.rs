//! Poller - periodic refresh of every monitored address
//!
//! Independent of the push feed: a dead WebSocket never stops balances from
//! converging. Each sweep fans out with bounded concurrency and one
//! address failing never aborts the others.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::RefreshSource;
use crate::error::Result;

/// What the poller drives. The monitor implements it.
#[async_trait]
pub trait Refresher: Send + Sync + 'static {
    fn targets(&self) -> Vec<String>;
    async fn refresh(&self, address: &str, source: RefreshSource) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    max_concurrent: usize,
}

impl Poller {
    pub fn new(interval: Duration, max_concurrent: usize) -> Self {
        Self { interval, max_concurrent: max_concurrent.max(1) }
    }

    /// One pass over the current target list
    pub async fn sweep(&self, refresher: &Arc<dyn Refresher>) -> SweepReport {
        let targets = refresher.targets();
        let refreshed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        stream::iter(targets)
            .for_each_concurrent(self.max_concurrent, |address| {
                let refreshed = &refreshed;
                let failed = &failed;
                async move {
                    match refresher.refresh(&address, RefreshSource::Poll).await {
                        Ok(()) => {
                            refreshed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(address = %address, error = %e, "poll_refresh_failed");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        SweepReport { refreshed: refreshed.into_inner(), failed: failed.into_inner() }
    }

    pub fn spawn(self, refresher: Arc<dyn Refresher>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, max_concurrent = self.max_concurrent, "poller_started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("poller_stopped");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        let report = self.sweep(&refresher).await;
                        debug!(refreshed = report.refreshed, failed = report.failed, "poll_sweep");
                    }
                }
            }
        })
    }
}
