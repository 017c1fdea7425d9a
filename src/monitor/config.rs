//! Monitor configuration - constructed by higher layers or read from env

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indexer: IndexerConfig,
    pub monitor: MonitorConfig,
    pub conflict: ConflictConfig,
    pub rates: RatesConfig,
}

impl Config {
    pub fn new() -> Self { Self::default() }
    pub fn with_indexer(mut self, c: IndexerConfig) -> Self { self.indexer = c; self }
    pub fn with_monitor(mut self, c: MonitorConfig) -> Self { self.monitor = c; self }
    pub fn with_conflict(mut self, c: ConflictConfig) -> Self { self.conflict = c; self }
    pub fn with_rates(mut self, c: RatesConfig) -> Self { self.rates = c; self }

    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::validation(format!("config {}: {}", path.display(), e)))?;
        serde_json::from_str(&data).map_err(|e| Error::validation(format!("config {}: {}", path.display(), e)))
    }

    /// Defaults overridden by `RBFWATCH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env_string("RBFWATCH_INDEXER_URL") { config.indexer.base_url = url; }
        if let Some(url) = env_string("RBFWATCH_FEED_URL") { config.indexer.ws_url = url; }
        if let Some(secs) = env_parse("RBFWATCH_REQUEST_TIMEOUT_SECS") { config.indexer.request_timeout_secs = secs; }
        if let Some(ms) = env_parse("RBFWATCH_CACHE_TTL_MS") { config.monitor.cache_ttl_ms = ms; }
        if let Some(ms) = env_parse("RBFWATCH_POLL_INTERVAL_MS") { config.monitor.poll_interval_ms = ms; }
        if let Some(ms) = env_parse("RBFWATCH_RECONNECT_BACKOFF_MS") { config.monitor.reconnect_backoff_ms = ms; }
        if let Some(n) = env_parse("RBFWATCH_MAX_CONCURRENT_FETCHES") { config.monitor.max_concurrent_fetches = n; }
        if let Some(n) = env_parse("RBFWATCH_MIN_CONF_SPENDABLE") { config.monitor.min_confirmations_spendable = n; }
        if let Some(n) = env_parse("RBFWATCH_MIN_CONF_SAFE") { config.monitor.min_confirmations_safe = n; }
        if let Some(n) = env_parse("RBFWATCH_SIZE_ESTIMATE_VB") { config.conflict.size_estimate_vbytes = n; }
        if let Some(n) = env_parse("RBFWATCH_MAX_FEE_SAT") { config.conflict.max_fee_sat = n; }
        if let Some(n) = env_parse("RBFWATCH_SMART_FEE_MULTIPLIER") { config.conflict.smart_fee_multiplier = n; }
        if let Some(n) = env_parse("RBFWATCH_MAX_FEE_RATE") { config.conflict.max_fee_rate_sat_vb = n; }
        if let Some(v) = env_string("RBFWATCH_RATES") { config.rates.enabled = v != "0" && v != "false"; }
        if let Some(c) = env_string("RBFWATCH_FIAT_CURRENCY") { config.rates.currency = c.to_ascii_uppercase(); }
        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

/// Ledger indexer endpoints (Esplora / mempool.space compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mempool.space/api".into(),
            ws_url: "wss://mempool.space/api/v1/ws".into(),
            request_timeout_secs: 10,
        }
    }
}

impl IndexerConfig {
    pub fn signet() -> Self {
        Self {
            base_url: "https://mempool.space/signet/api".into(),
            ws_url: "wss://mempool.space/signet/api/v1/ws".into(),
            ..Default::default()
        }
    }
    pub fn testnet() -> Self {
        Self {
            base_url: "https://mempool.space/testnet/api".into(),
            ws_url: "wss://mempool.space/testnet/api/v1/ws".into(),
            ..Default::default()
        }
    }
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

/// Reconciliation engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cache_ttl_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    /// Upper bound on a single indexer fetch or feed connect
    pub fetch_timeout_ms: u64,
    pub max_concurrent_fetches: usize,
    pub min_confirmations_spendable: u32,
    pub min_confirmations_safe: u32,
    /// Recent events kept for `Monitor::recent_events`
    pub event_log_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            poll_interval_ms: 30_000,
            reconnect_backoff_ms: 5_000,
            fetch_timeout_ms: 10_000,
            max_concurrent_fetches: 4,
            min_confirmations_spendable: 1,
            min_confirmations_safe: 6,
            event_log_capacity: 256,
        }
    }
}

impl MonitorConfig {
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self { self.cache_ttl_ms = ttl.as_millis() as u64; self }
    pub fn with_poll_interval(mut self, every: Duration) -> Self { self.poll_interval_ms = (every.as_millis() as u64).max(1); self }
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self { self.reconnect_backoff_ms = backoff.as_millis() as u64; self }
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self { self.fetch_timeout_ms = timeout.as_millis() as u64; self }
    pub fn with_thresholds(mut self, spendable: u32, safe: u32) -> Self {
        self.min_confirmations_spendable = spendable;
        self.min_confirmations_safe = safe;
        self
    }

    pub fn cache_ttl(&self) -> Duration { Duration::from_millis(self.cache_ttl_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms.max(1)) }
    pub fn reconnect_backoff(&self) -> Duration { Duration::from_millis(self.reconnect_backoff_ms) }
    pub fn fetch_timeout(&self) -> Duration { Duration::from_millis(self.fetch_timeout_ms) }
}

/// Conflict builder fee policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Virtual size assumed when converting a fee rate into a fee
    pub size_estimate_vbytes: u64,
    /// Sanity ceiling; fees at or above this are rejected
    pub max_fee_sat: u64,
    /// Observed network rate is multiplied by this for smart fees
    pub smart_fee_multiplier: f64,
    /// Smart fee rates are capped here
    pub max_fee_rate_sat_vb: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            size_estimate_vbytes: 150,
            max_fee_sat: 1_000_000,
            smart_fee_multiplier: 1.5,
            max_fee_rate_sat_vb: 500.0,
        }
    }
}

/// Fiat annotation source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    pub enabled: bool,
    pub url: String,
    pub currency: String,
    pub refresh_secs: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://mempool.space/api".into(),
            currency: "USD".into(),
            refresh_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.monitor.cache_ttl(), Duration::from_secs(30));
        assert_eq!(c.monitor.poll_interval(), Duration::from_secs(30));
        assert_eq!(c.monitor.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(c.monitor.min_confirmations_spendable, 1);
        assert_eq!(c.monitor.min_confirmations_safe, 6);
        assert_eq!(c.conflict.size_estimate_vbytes, 150);
    }

    #[test]
    fn env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        std::env::set_var("RBFWATCH_CACHE_TTL_MS", "5000");
        std::env::set_var("RBFWATCH_SMART_FEE_MULTIPLIER", "2.0");
        std::env::set_var("RBFWATCH_MAX_CONCURRENT_FETCHES", "not-a-number");
        let c = Config::from_env();
        std::env::remove_var("RBFWATCH_CACHE_TTL_MS");
        std::env::remove_var("RBFWATCH_SMART_FEE_MULTIPLIER");
        std::env::remove_var("RBFWATCH_MAX_CONCURRENT_FETCHES");

        assert_eq!(c.monitor.cache_ttl_ms, 5_000);
        assert_eq!(c.conflict.smart_fee_multiplier, 2.0);
        assert_eq!(c.monitor.max_concurrent_fetches, 4);
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("rbfwatch.json");
        std::fs::write(&path, r#"{"monitor": {"poll_interval_ms": 12000}, "conflict": {"max_fee_sat": 50000}}"#).unwrap();

        let c = Config::load(&path).expect("config");
        assert_eq!(c.monitor.poll_interval_ms, 12_000);
        assert_eq!(c.monitor.cache_ttl_ms, 30_000);
        assert_eq!(c.conflict.max_fee_sat, 50_000);
        assert_eq!(c.indexer.base_url, IndexerConfig::default().base_url);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Validation(_))));
    }
}
