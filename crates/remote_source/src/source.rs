//! Data source contract and the simulated backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::SourceConfig;
use common::{DataOrigin, Dataset, SourceError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::sample::sample_payload;
use crate::validate::parse_dataset;

/// Fixed key the sales dataset is cached under.
pub const SALES_CACHE_KEY: &str = "sales-data";

const HEALTHY_LATENCY: Duration = Duration::from_millis(1000);
const SIMULATED_TIMEOUT_MS: u64 = 5000;

/// Options for a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub use_cache: bool,
    pub force_refresh: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
        }
    }
}

impl LoadOptions {
    /// Bypass any source-side cache.
    pub fn bypass() -> Self {
        Self {
            use_cache: true,
            force_refresh: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadMetadata {
    pub timestamp: DateTime<Utc>,
    pub source: DataOrigin,
    pub cached: bool,
    pub load_time: Duration,
}

/// A successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResponse {
    pub data: Dataset,
    pub metadata: LoadMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceHealth {
    pub status: HealthStatus,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub has_cache: bool,
    pub age: Option<Duration>,
}

/// Anything the sales store can load a dataset from.
///
/// Implementations raise classified `SourceError`s; they never swallow a
/// failure.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self, options: LoadOptions) -> Result<LoadResponse, SourceError>;

    async fn health_check(&self) -> SourceHealth;
}

/// In-process stand-in for the sales backend.
pub struct SimulatedRemoteSource {
    config: SourceConfig,
    payload: Value,
    cache: CacheStore<Dataset>,
    rng: Mutex<StdRng>,
}

impl SimulatedRemoteSource {
    /// Serve the built-in sample dataset.
    pub fn new(config: SourceConfig) -> Self {
        Self::with_payload(config, sample_payload())
    }

    /// Serve an arbitrary raw payload (validated on every API load).
    pub fn with_payload(config: SourceConfig, payload: Value) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            payload,
            cache: CacheStore::new(),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Same as `load` with the cache bypassed.
    pub async fn refresh(&self) -> Result<LoadResponse, SourceError> {
        self.fetch(LoadOptions::bypass()).await
    }

    pub fn cache_status(&self, key: &str) -> CacheStatus {
        let age = self.cache.age(key);
        CacheStatus {
            has_cache: age.is_some(),
            age,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Source cache cleared");
    }

    async fn fetch(&self, options: LoadOptions) -> Result<LoadResponse, SourceError> {
        let started = Instant::now();

        if options.use_cache && !options.force_refresh {
            if let Some(data) = self.cache.get(SALES_CACHE_KEY) {
                debug!("Serving sales data from source cache");
                return Ok(LoadResponse {
                    data,
                    metadata: LoadMetadata {
                        timestamp: Utc::now(),
                        source: DataOrigin::Cache,
                        cached: true,
                        load_time: started.elapsed(),
                    },
                });
            }
        }

        let (latency, roll) = {
            let mut rng = self.rng.lock().await;
            let latency = roll_latency(
                &mut rng,
                self.config.min_latency_ms,
                self.config.max_latency_ms,
            );
            (latency, rng.gen::<f64>())
        };
        debug!("Simulated request latency: {:?}", latency);
        sleep(latency).await;

        if let Some(err) = self.injected_failure(roll) {
            warn!("Simulated load failed ({}): {}", err.code(), err);
            return Err(err);
        }

        let data = parse_dataset(&self.payload).map_err(|e| {
            warn!("Sales payload rejected: {}", e);
            e
        })?;
        self.cache
            .set(SALES_CACHE_KEY, data.clone(), self.config.cache_ttl());

        let load_time = started.elapsed();
        info!(
            "Loaded sales data: {} brands, {} series, {} periods in {:?}",
            data.brands.len(),
            data.series_count(),
            data.period_count(),
            load_time
        );

        Ok(LoadResponse {
            data,
            metadata: LoadMetadata {
                timestamp: Utc::now(),
                source: DataOrigin::Api,
                cached: false,
                load_time,
            },
        })
    }

    /// Map a uniform roll onto the cumulative failure bands.
    fn injected_failure(&self, roll: f64) -> Option<SourceError> {
        let rates = &self.config.failure_rates;
        let mut band = rates.network;
        if roll < band {
            return Some(SourceError::network("Failed to reach sales API"));
        }
        band += rates.timeout;
        if roll < band {
            return Some(SourceError::Timeout {
                message: "Sales API did not respond in time".into(),
                timeout_ms: SIMULATED_TIMEOUT_MS,
            });
        }
        band += rates.server;
        if roll < band {
            return Some(SourceError::Server {
                message: "Sales API returned an internal error".into(),
                status: 500,
            });
        }
        band += rates.validation;
        if roll < band {
            return Some(SourceError::validation(
                "Sales API returned a malformed payload",
                None,
            ));
        }
        None
    }
}

fn roll_latency(rng: &mut StdRng, min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

#[async_trait]
impl DataSource for SimulatedRemoteSource {
    async fn load(&self, options: LoadOptions) -> Result<LoadResponse, SourceError> {
        self.fetch(options).await
    }

    async fn health_check(&self) -> SourceHealth {
        let started = Instant::now();
        let latency = {
            let mut rng = self.rng.lock().await;
            roll_latency(&mut rng, 100, 300)
        };
        sleep(latency).await;

        let latency = started.elapsed();
        let status = if latency < HEALTHY_LATENCY {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        debug!("Source health check: {:?} in {:?}", status, latency);

        SourceHealth {
            status,
            latency,
            timestamp: Utc::now(),
        }
    }
}
