//! Esplora REST client
//!
//! Every request is bounded by the configured timeout. Failures surface as
//! `Error::Upstream` so callers can fall back to cached data.

use async_trait::async_trait;
use bitcoin::{Network, Txid};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use tracing::{debug, warn};

use super::types::{MempoolTx, RecommendedFees, TxRecord, UtxoRecord};
use super::{Broadcaster, Indexer};
use crate::core::paths::rest as paths;
use crate::error::{Error, Result};
use crate::monitor::IndexerConfig;

pub struct EsploraClient {
    client: reqwest::Client,
    base_url: String,
    network: Network,
}

impl EsploraClient {
    pub fn new(config: &IndexerConfig, network: Network) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| Error::validation(format!("http client: {}", e)))?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string(), network })
    }

    pub fn base_url(&self) -> &str { &self.base_url }
    pub fn network(&self) -> Network { self.network }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "indexer_get");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::validation(format!("indexer rejected {}: {}", path, body.trim())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "indexer_error");
            return Err(Error::upstream(format!("{} {}: {}", status, path, body.trim())));
        }
        Ok(response.json::<T>().await?)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.url(path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("{} {}", status, path)));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Indexer for EsploraClient {
    async fn tip_height(&self) -> Result<u32> {
        let text = self.get_text(paths::TIP_HEIGHT).await?;
        text.trim().parse().map_err(|_| Error::upstream(format!("bad tip height: {}", text.trim())))
    }

    async fn address_utxos(&self, address: &str) -> Result<Vec<UtxoRecord>> {
        self.get_json(&paths::address_utxos(address)).await
    }

    async fn address_mempool(&self, address: &str) -> Result<Vec<MempoolTx>> {
        let txs: Vec<TxRecord> = self.get_json(&paths::address_mempool(address)).await?;
        Ok(txs.into_iter().map(MempoolTx::from).collect())
    }

    async fn transaction(&self, txid: &Txid) -> Result<TxRecord> {
        self.get_json(&paths::tx(&txid.to_string())).await
    }

    async fn recommended_fees(&self) -> Result<RecommendedFees> {
        self.get_json(paths::FEES_RECOMMENDED).await
    }
}

#[async_trait]
impl Broadcaster for EsploraClient {
    async fn broadcast(&self, raw_hex: &str, network: Network) -> Result<Txid> {
        if network != self.network {
            return Err(Error::validation(format!("broadcaster serves {}, got {}", self.network, network)));
        }
        let response = self.client.post(self.url(paths::TX)).body(raw_hex.trim().to_string()).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(Error::validation(format!("broadcast rejected: {}", body.trim())));
        }
        if !status.is_success() {
            return Err(Error::upstream(format!("broadcast {}: {}", status, body.trim())));
        }
        Txid::from_str(body.trim()).map_err(|e| Error::upstream(format!("broadcast returned bad txid: {}", e)))
    }
}
