//! Startup sequencing for the sales store.
//!
//! `initialize` is single-flight: concurrent callers await the same shared
//! future, and a completed successful run short-circuits later calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::InitConfig;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use remote_source::{DataSource, HealthStatus, SourceHealth};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::storage::{StorageInfo, TypedStorage};
use crate::store::{SalesStore, StoreInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub cleanup_storage: bool,
    pub preload_data: bool,
    pub check_cache: bool,
    pub timeout: Duration,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self::from(&InitConfig::default())
    }
}

impl From<&InitConfig> for InitOptions {
    fn from(cfg: &InitConfig) -> Self {
        Self {
            cleanup_storage: cfg.cleanup_storage,
            preload_data: cfg.preload_data,
            check_cache: cfg.check_cache,
            timeout: cfg.timeout(),
        }
    }
}

/// Outcome of an initialization run.
#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    pub success: bool,
    pub load_time: Duration,
    pub from_cache: bool,
    pub error: Option<String>,
    pub storage_info: StorageInfo,
}

impl InitReport {
    fn ok(load_time: Duration, from_cache: bool, storage_info: StorageInfo) -> Self {
        Self {
            success: true,
            load_time,
            from_cache,
            error: None,
            storage_info,
        }
    }

    fn failed(load_time: Duration, error: String, storage_info: StorageInfo) -> Self {
        Self {
            success: false,
            load_time,
            from_cache: false,
            error: Some(error),
            storage_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub source: SourceHealth,
    pub storage: StorageInfo,
    pub store: StoreInfo,
    pub initialized: bool,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.source.status == HealthStatus::Healthy
            && self.storage.available
            && !self.store.has_error
    }
}

type SharedInit = Shared<BoxFuture<'static, InitReport>>;

#[derive(Default)]
struct InitState {
    in_flight: Option<SharedInit>,
    initialized: bool,
}

pub struct InitCoordinator {
    store: Arc<SalesStore>,
    source: Arc<dyn DataSource>,
    storage: TypedStorage,
    state: Mutex<InitState>,
}

impl InitCoordinator {
    pub fn new(store: Arc<SalesStore>, source: Arc<dyn DataSource>, storage: TypedStorage) -> Self {
        Self {
            store,
            source,
            storage,
            state: Mutex::new(InitState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &Arc<SalesStore> {
        &self.store
    }

    /// Run startup once. Concurrent callers share the in-flight run.
    pub async fn initialize(&self, options: InitOptions) -> InitReport {
        let run = {
            let mut state = self.state();
            if state.initialized {
                debug!("Already initialized");
                return InitReport::ok(Duration::ZERO, true, self.storage.info());
            }
            match &state.in_flight {
                Some(run) => {
                    debug!("Joining in-flight initialization");
                    run.clone()
                }
                None => {
                    let run = Self::run(self.store.clone(), self.storage.clone(), options)
                        .boxed()
                        .shared();
                    state.in_flight = Some(run.clone());
                    run
                }
            }
        };

        let report = run.clone().await;

        // A `reset` during the run detaches it; its outcome no longer counts.
        let mut state = self.state();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&run))
        {
            state.in_flight = None;
            if report.success {
                state.initialized = true;
            }
        }
        report
    }

    async fn run(store: Arc<SalesStore>, storage: TypedStorage, options: InitOptions) -> InitReport {
        let started = Instant::now();
        info!("Initializing sales data (timeout {:?})", options.timeout);

        if options.cleanup_storage {
            let removed = storage.cleanup_expired();
            if removed > 0 {
                info!("Removed {} expired storage entries", removed);
            }
        }

        let storage_info = storage.info();
        if !storage_info.available {
            warn!("Durable storage unavailable; state will not survive restarts");
        }

        if options.check_cache && store.is_cache_valid() {
            info!("Using cached sales data (age {:?})", store.cache_age());
            return InitReport::ok(started.elapsed(), true, storage_info);
        }

        if !options.preload_data {
            return InitReport::ok(started.elapsed(), false, storage_info);
        }

        // Spawned so a timeout does not cancel the load; it keeps running and
        // still updates the store when it finishes.
        let load = tokio::spawn({
            let store = store.clone();
            async move { store.load_sales_data().await }
        });

        match timeout(options.timeout, load).await {
            Ok(Ok(())) => {
                let state = store.snapshot();
                let load_time = started.elapsed();
                match (&state.dataset, &state.error) {
                    (_, Some(err)) => {
                        error!("Initial load failed: {}", err.message);
                        InitReport::failed(load_time, err.message.clone(), storage_info)
                    }
                    (Some(_), None) => {
                        info!("Initialization complete in {:?}", load_time);
                        InitReport::ok(load_time, false, storage_info)
                    }
                    (None, None) => {
                        InitReport::failed(load_time, "No sales data loaded".into(), storage_info)
                    }
                }
            }
            Ok(Err(join_err)) => {
                error!("Initial load task failed: {}", join_err);
                InitReport::failed(
                    started.elapsed(),
                    format!("Load task failed: {}", join_err),
                    storage_info,
                )
            }
            Err(_) => {
                warn!(
                    "Initial load exceeded {:?}; continuing in background",
                    options.timeout
                );
                InitReport::failed(
                    started.elapsed(),
                    format!("Initialization timed out after {:?}", options.timeout),
                    storage_info,
                )
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn reset(&self) {
        let mut state = self.state();
        state.initialized = false;
        state.in_flight = None;
    }

    pub async fn health_check(&self) -> HealthReport {
        let source = self.source.health_check().await;
        HealthReport {
            source,
            storage: self.storage.info(),
            store: self.store.store_info(),
            initialized: self.is_initialized(),
            timestamp: Utc::now(),
        }
    }
}
