//! sales-dashboard: headless driver for the sales data core.
//!
//! Wires storage, the simulated remote source, the sales store and the
//! startup coordinator, runs initialization, and prints a JSON summary.

mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use common::DashboardConfig;
use remote_source::{DataSource, SimulatedRemoteSource};
use sales_store::{
    FileStorage, HealthReport, InitCoordinator, InitOptions, InitReport, MemoryStorage,
    SalesStore, StateStorage, StoreSettings, TypedStorage,
};

/// Sales dashboard data core
#[derive(Parser)]
#[command(name = "sales-dashboard", about = "Load, cache and inspect sales data")]
struct Cli {
    /// Print a health report after initialization.
    #[arg(long)]
    health: bool,

    /// Force a fresh load after initialization, ignoring the cache.
    #[arg(long)]
    refresh: bool,

    /// Clear persisted data and caches, then exit.
    #[arg(long)]
    clear: bool,

    /// Print the persisted store state without loading, then exit.
    #[arg(long)]
    status: bool,
}

fn open_storage(cfg: &DashboardConfig) -> Arc<dyn StateStorage> {
    match FileStorage::open(&cfg.storage_dir) {
        Ok(files) => {
            info!("Storage: {}", files.dir().display());
            if cfg.storage_quota_bytes > 0 {
                Arc::new(files.with_quota(cfg.storage_quota_bytes))
            } else {
                Arc::new(files)
            }
        }
        Err(e) => {
            warn!(
                "Storage at {} unavailable ({}); using in-memory storage",
                cfg.storage_dir, e
            );
            Arc::new(MemoryStorage::new())
        }
    }
}

fn store_summary(store: &SalesStore) -> Value {
    let state = store.snapshot();
    let dataset = state.dataset.as_deref().map(|ds| {
        json!({
            "brands": ds.brand_names().collect::<Vec<_>>(),
            "periods": ds.period_count(),
            "series": ds.series_count(),
            "from": ds.date_range.first(),
            "to": ds.date_range.last(),
        })
    });
    let cache_age = state
        .last_updated
        .map(|_| state.cache_age_at(Utc::now()).as_secs());
    json!({
        "dataset": dataset,
        "lastUpdated": state.last_updated,
        "cacheAgeSecs": cache_age,
        "cacheValid": state.is_cache_valid_at(Utc::now()),
        "isLoading": state.is_loading,
        "retryCount": state.retry_count,
        "maxRetries": state.max_retries,
        "canRetry": state.can_retry(),
        "error": state.error.as_ref().map(|e| json!({
            "code": e.code.as_str(),
            "message": e.message,
            "attempt": e.details.attempt,
            "retryable": e.details.retryable,
        })),
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn init_summary(report: &InitReport) -> Value {
    json!({
        "success": report.success,
        "fromCache": report.from_cache,
        "loadTimeMs": millis(report.load_time),
        "error": report.error,
        "storage": report.storage_info,
    })
}

fn health_summary(health: &HealthReport) -> Value {
    json!({
        "healthy": health.is_healthy(),
        "source": {
            "status": format!("{:?}", health.source.status).to_lowercase(),
            "latencyMs": millis(health.source.latency),
            "timestamp": health.source.timestamp,
        },
        "storage": health.storage,
        "store": health.store,
        "initialized": health.initialized,
        "timestamp": health.timestamp,
    })
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{}", out),
        Err(e) => error!("Failed to render output: {}", e),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sales_dashboard=info,sales_store=info,remote_source=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Sales dashboard starting up...");

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Store: cache_expiry={}s, max_retries={}, retry_delay={}ms",
        cfg.store.cache_expiry_secs, cfg.store.max_retries, cfg.store.retry_delay_ms
    );
    info!(
        "Source: latency {}..{}ms, failure rate {:.0}%, seed {:?}",
        cfg.source.min_latency_ms,
        cfg.source.max_latency_ms,
        cfg.source.failure_rates.total() * 100.0,
        cfg.source.seed
    );

    let storage = open_storage(&cfg);
    let source = Arc::new(SimulatedRemoteSource::new(cfg.source.clone()));
    let store = Arc::new(SalesStore::new(
        source.clone(),
        storage.clone(),
        StoreSettings::from(&cfg.store),
    ));
    let typed = TypedStorage::new(storage);
    let coordinator = InitCoordinator::new(
        store.clone(),
        source.clone() as Arc<dyn DataSource>,
        typed.clone(),
    );

    if cli.clear {
        store.clear_data();
        source.clear_cache();
        match typed.clear() {
            Ok(n) => info!("Cleared sales data and {} stored entries", n),
            Err(e) => warn!("Cleared sales data; stored entries left in place: {}", e),
        }
        return;
    }

    if cli.status {
        print_json(&store_summary(&store));
        return;
    }

    let report = coordinator
        .initialize(InitOptions::from(&cfg.init))
        .await;
    if report.success {
        info!(
            "Initialized in {:?} (from cache: {})",
            report.load_time, report.from_cache
        );
    } else if store.can_retry() {
        warn!(
            "Initialization failed: {}; retrying",
            report.error.as_deref().unwrap_or("unknown error")
        );
        store.retry_load().await;
    }

    if cli.refresh {
        store.refresh_data().await;
    }

    let mut output = json!({
        "init": init_summary(&report),
        "store": store_summary(&store),
    });
    if cli.health {
        output["health"] = health_summary(&coordinator.health_check().await);
    }
    print_json(&output);

    if store.dataset().is_none() {
        error!("No sales data available");
        std::process::exit(1);
    }
}
