//! Fiat rates - best-effort annotation of balances
//!
//! A failed fetch only drops the annotation; it never fails a balance query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::paths::prices;
use crate::error::{Error, Result};
use crate::monitor::RatesConfig;

const SATS_PER_BTC: f64 = 100_000_000.0;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price of one BTC in `currency`
    async fn btc_price(&self, currency: &str) -> Result<f64>;
}

/// `GET {base}/v1/prices` → `{"time": .., "USD": .., "EUR": ..}`
pub struct MempoolPrices {
    client: reqwest::Client,
    base_url: String,
}

impl MempoolPrices {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl PriceSource for MempoolPrices {
    async fn btc_price(&self, currency: &str) -> Result<f64> {
        let url = format!("{}{}", self.base_url, prices::PRICES);
        let body: Value = self.client.get(&url).send().await?.error_for_status()?.json().await?;
        body.get(currency)
            .and_then(Value::as_f64)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| Error::upstream(format!("no {} price in response", currency)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiatRate {
    pub currency: String,
    pub btc_price: f64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiatValue {
    pub currency: String,
    pub amount: f64,
    pub btc_price: f64,
    pub rate_time: DateTime<Utc>,
}

pub struct RateService {
    source: Arc<dyn PriceSource>,
    currency: String,
    refresh: Duration,
    latest: RwLock<Option<FiatRate>>,
}

impl RateService {
    pub fn new(source: Arc<dyn PriceSource>, currency: impl Into<String>, refresh: Duration) -> Self {
        Self { source, currency: currency.into(), refresh, latest: RwLock::new(None) }
    }

    pub fn from_config(config: &RatesConfig, timeout: Duration) -> Result<Self> {
        let source = MempoolPrices::new(&config.url, timeout)?;
        Ok(Self::new(Arc::new(source), &config.currency, Duration::from_secs(config.refresh_secs.max(1))))
    }

    pub fn currency(&self) -> &str { &self.currency }

    pub fn latest(&self) -> Option<FiatRate> {
        self.latest.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Fetch now. A failure keeps the previous rate.
    pub async fn refresh(&self) -> Result<FiatRate> {
        let btc_price = self.source.btc_price(&self.currency).await?;
        let rate = FiatRate { currency: self.currency.clone(), btc_price, fetched_at: Utc::now() };
        *self.latest.write().unwrap_or_else(|p| p.into_inner()) = Some(rate.clone());
        debug!(currency = %self.currency, btc_price, "fiat_rate_refreshed");
        Ok(rate)
    }

    pub fn annotate(&self, sats: u64) -> Option<FiatValue> {
        self.latest().map(|rate| FiatValue {
            currency: rate.currency,
            amount: sats as f64 / SATS_PER_BTC * rate.btc_price,
            btc_price: rate.btc_price,
            rate_time: rate.fetched_at,
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(currency = %self.currency, refresh_secs = self.refresh.as_secs(), "rate_service_started");
            loop {
                if let Err(e) = self.refresh().await {
                    warn!(currency = %self.currency, error = %e, "fiat_rate_fetch_failed");
                }
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.refresh) => {}
                }
            }
        })
    }
}
