//! Simulated remote sales-data source.
//!
//! Models network latency and injected failures so the retry and cache
//! layers above it have something realistic to exercise.

pub mod cache;
pub mod sample;
pub mod source;
pub mod validate;

pub use cache::{CacheEntry, CacheStore};
pub use source::{
    CacheStatus, DataSource, HealthStatus, LoadMetadata, LoadOptions, LoadResponse,
    SimulatedRemoteSource, SourceHealth, SALES_CACHE_KEY,
};
pub use validate::{check_dataset, parse_dataset};
