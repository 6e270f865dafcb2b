//! Dashboard configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level dashboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Directory backing durable storage.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Optional storage quota in bytes (0 = unlimited).
    #[serde(default)]
    pub storage_quota_bytes: u64,

    /// Store cache/retry parameters.
    #[serde(default)]
    pub store: StoreConfig,

    /// Simulated remote source parameters.
    #[serde(default)]
    pub source: SourceConfig,

    /// Startup sequencing parameters.
    #[serde(default)]
    pub init: InitConfig,
}

/// Cache and retry parameters for the sales store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a loaded dataset stays valid.
    #[serde(default = "default_cache_expiry")]
    pub cache_expiry_secs: u64,

    /// Max load attempts per `load_sales_data` call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Failure injection bands for the simulated source (probabilities).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRates {
    #[serde(default = "default_network_rate")]
    pub network: f64,
    #[serde(default = "default_timeout_rate")]
    pub timeout: f64,
    #[serde(default = "default_server_rate")]
    pub server: f64,
    #[serde(default = "default_validation_rate")]
    pub validation: f64,
}

/// Simulated remote source parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_min_latency")]
    pub min_latency_ms: u64,

    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,

    /// TTL of the source's own response cache.
    #[serde(default = "default_source_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub failure_rates: FailureRates,

    /// Fixed RNG seed for reproducible latency/failure rolls.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Startup sequencing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Sweep expired typed-storage entries before loading.
    #[serde(default = "default_true")]
    pub cleanup_storage: bool,

    /// Run the initial data load.
    #[serde(default = "default_true")]
    pub preload_data: bool,

    /// Skip the load when the store already holds a valid dataset.
    #[serde(default = "default_true")]
    pub check_cache: bool,

    /// Upper bound for the initial load.
    #[serde(default = "default_init_timeout")]
    pub timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_storage_dir() -> String {
    ".sales-dashboard".into()
}
fn default_cache_expiry() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_network_rate() -> f64 {
    0.05
}
fn default_timeout_rate() -> f64 {
    0.03
}
fn default_server_rate() -> f64 {
    0.02
}
fn default_validation_rate() -> f64 {
    0.01
}
fn default_min_latency() -> u64 {
    800
}
fn default_max_latency() -> u64 {
    2500
}
fn default_source_cache_ttl() -> u64 {
    300
}
fn default_init_timeout() -> u64 {
    10
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            storage_quota_bytes: 0,
            store: StoreConfig::default(),
            source: SourceConfig::default(),
            init: InitConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_expiry_secs: default_cache_expiry(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl StoreConfig {
    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for FailureRates {
    fn default() -> Self {
        Self {
            network: default_network_rate(),
            timeout: default_timeout_rate(),
            server: default_server_rate(),
            validation: default_validation_rate(),
        }
    }
}

impl FailureRates {
    /// No injected failures.
    pub fn none() -> Self {
        Self {
            network: 0.0,
            timeout: 0.0,
            server: 0.0,
            validation: 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.network + self.timeout + self.server + self.validation
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: default_min_latency(),
            max_latency_ms: default_max_latency(),
            cache_ttl_secs: default_source_cache_ttl(),
            failure_rates: FailureRates::default(),
            seed: None,
        }
    }
}

impl SourceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            cleanup_storage: true,
            preload_data: true,
            check_cache: true,
            timeout_secs: default_init_timeout(),
        }
    }
}

impl InitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DashboardConfig::default();
        assert_eq!(cfg.store.cache_expiry(), Duration::from_secs(300));
        assert_eq!(cfg.store.max_retries, 3);
        assert_eq!(cfg.store.retry_delay(), Duration::from_millis(1000));
        assert_eq!(cfg.source.min_latency_ms, 800);
        assert_eq!(cfg.source.max_latency_ms, 2500);
        assert!((cfg.source.failure_rates.total() - 0.11).abs() < 1e-9);
        assert_eq!(cfg.init.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{"store": {"max_retries": 5}, "source": {"seed": 7}}"#;
        let cfg: DashboardConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.store.max_retries, 5);
        assert_eq!(cfg.store.retry_delay_ms, 1000);
        assert_eq!(cfg.source.seed, Some(7));
        assert!(cfg.init.preload_data);
    }
}
