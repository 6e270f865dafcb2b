//! The sales store: single source of truth for the dataset and its
//! loading/error/retry state.
//!
//! State lives in a `watch` channel. Every mutation goes through
//! `SalesStore::update`, which modifies the state under the channel's lock,
//! notifies subscribers, then writes the persisted subset to storage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::StoreConfig;
use common::{Dataset, ErrorRecord};
use remote_source::{DataSource, LoadOptions};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::persist::{self, PersistedState};
use crate::retry::{backoff_delay, DEFAULT_BACKOFF_MULTIPLIER};
use crate::storage::StateStorage;

/// Cache and retry settings used when nothing has been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub cache_expiry: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreSettings {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            cache_expiry: cfg.cache_expiry(),
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay(),
        }
    }
}

/// Snapshot of the store, as observed by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    pub dataset: Option<Arc<Dataset>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub cache_expiry: Duration,
    pub is_loading: bool,
    pub error: Option<ErrorRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub is_initial_load: bool,
    pub is_refreshing: bool,
}

impl StoreState {
    pub fn initial(settings: StoreSettings) -> Self {
        Self {
            dataset: None,
            last_updated: None,
            cache_expiry: settings.cache_expiry,
            is_loading: false,
            error: None,
            retry_count: 0,
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay,
            is_initial_load: true,
            is_refreshing: false,
        }
    }

    /// Persisted settings take precedence over configured defaults.
    fn hydrated(persisted: PersistedState) -> Self {
        let mut state = Self::initial(StoreSettings {
            cache_expiry: Duration::from_millis(persisted.cache_expiry),
            max_retries: persisted.max_retries,
            retry_delay: Duration::from_millis(persisted.retry_delay),
        });
        state.dataset = persisted.dataset.map(Arc::new);
        state.last_updated = persisted.last_updated;
        state
    }

    /// Time since the last successful load; `Duration::MAX` if never loaded.
    pub fn cache_age_at(&self, now: DateTime<Utc>) -> Duration {
        match self.last_updated {
            Some(at) => (now - at).to_std().unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    pub fn is_cache_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.last_updated.is_some()
            && self.dataset.is_some()
            && self.cache_age_at(now) < self.cache_expiry
    }

    pub fn can_retry(&self) -> bool {
        match &self.error {
            Some(err) => err.is_retryable() && self.retry_count < self.max_retries,
            None => false,
        }
    }

    fn persisted(&self) -> PersistedState {
        PersistedState {
            dataset: self.dataset.as_deref().cloned(),
            last_updated: self.last_updated,
            cache_expiry: millis(self.cache_expiry),
            max_retries: self.max_retries,
            retry_delay: millis(self.retry_delay),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Coarse view of the store for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub has_data: bool,
    pub is_loading: bool,
    pub has_error: bool,
}

pub struct SalesStore {
    state: watch::Sender<StoreState>,
    source: Arc<dyn DataSource>,
    storage: Arc<dyn StateStorage>,
    /// Serializes `load_sales_data` so concurrent callers share one load.
    load_gate: Mutex<()>,
}

/// Clears the loading flags if a load is dropped before finishing.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<StoreState>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|s| {
            let was_loading = s.is_loading;
            s.is_loading = false;
            s.is_refreshing = false;
            was_loading
        });
    }
}

impl SalesStore {
    /// Build the store, hydrating persisted fields from `storage`.
    pub fn new(
        source: Arc<dyn DataSource>,
        storage: Arc<dyn StateStorage>,
        settings: StoreSettings,
    ) -> Self {
        let initial = match persist::hydrate(storage.as_ref()) {
            Some(persisted) => StoreState::hydrated(persisted),
            None => StoreState::initial(settings),
        };
        let (state, _) = watch::channel(initial);
        Self {
            state,
            source,
            storage,
            load_gate: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.state.borrow().dataset.clone()
    }

    pub fn store_info(&self) -> StoreInfo {
        let s = self.state.borrow();
        StoreInfo {
            has_data: s.dataset.is_some(),
            is_loading: s.is_loading,
            has_error: s.error.is_some(),
        }
    }

    pub fn cache_age(&self) -> Duration {
        self.state.borrow().cache_age_at(Utc::now())
    }

    pub fn is_cache_valid(&self) -> bool {
        self.state.borrow().is_cache_valid_at(Utc::now())
    }

    pub fn can_retry(&self) -> bool {
        self.state.borrow().can_retry()
    }

    fn update(&self, f: impl FnOnce(&mut StoreState)) {
        self.state.send_modify(f);
        self.persist();
    }

    fn persist(&self) {
        let persisted = self.state.borrow().persisted();
        if let Err(e) = persist::persist(self.storage.as_ref(), &persisted) {
            warn!("Store state kept in memory only: {}", e);
        }
    }

    /// Load the dataset unless the held one is still within its expiry.
    ///
    /// Never fails: the outcome is visible in the state (`dataset` or
    /// `error`). An existing dataset survives a failed load.
    pub async fn load_sales_data(&self) {
        let _gate = self.load_gate.lock().await;
        self.load_locked(false).await;
    }

    /// Attempt loop. Callers hold `load_gate`; `force` skips the freshness
    /// check.
    async fn load_locked(&self, force: bool) {
        if !force && self.is_cache_valid() {
            debug!(
                "Sales data still fresh (age {:?}), skipping load",
                self.cache_age()
            );
            return;
        }

        let (max_attempts, retry_delay) = {
            let s = self.state.borrow();
            (s.max_retries.max(1), s.retry_delay)
        };

        self.update(|s| {
            s.is_loading = true;
            s.is_refreshing = s.dataset.is_some();
            s.error = None;
        });
        let _loading = LoadingGuard { state: &self.state };

        for attempt in 1..=max_attempts {
            let options = if attempt == 1 {
                LoadOptions::default()
            } else {
                LoadOptions::bypass()
            };

            match self.source.load(options).await {
                Ok(response) => {
                    info!(
                        "Sales data loaded from {} on attempt {} ({:?})",
                        response.metadata.source, attempt, response.metadata.load_time
                    );
                    self.update(|s| {
                        s.dataset = Some(Arc::new(response.data));
                        s.last_updated = Some(Utc::now());
                        s.error = None;
                        s.retry_count = 0;
                        s.is_loading = false;
                        s.is_initial_load = false;
                        s.is_refreshing = false;
                    });
                    return;
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(retry_delay, DEFAULT_BACKOFF_MULTIPLIER, attempt);
                    warn!(
                        "Load attempt {}/{} failed ({}): {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        err.code(),
                        err,
                        delay
                    );
                    self.update(|s| s.retry_count = attempt);
                    sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        "Sales data load failed on attempt {} ({}): {}",
                        attempt,
                        err.code(),
                        err
                    );
                    let record = ErrorRecord::from_source(&err, attempt);
                    self.update(|s| {
                        s.error = Some(record);
                        s.is_loading = false;
                        s.is_refreshing = false;
                    });
                    return;
                }
            }
        }
    }

    /// Drop the held dataset and load again, ignoring cache validity.
    ///
    /// Waits for any in-flight load, then always performs its own.
    pub async fn refresh_data(&self) {
        let _gate = self.load_gate.lock().await;
        info!("Refreshing sales data");
        self.update(|s| {
            s.dataset = None;
            s.last_updated = None;
            s.retry_count = 0;
            s.error = None;
        });
        self.load_locked(true).await;
    }

    /// Retry after a failed load. Returns `false` when retrying is not
    /// allowed (no error, non-retryable error, or retries used up).
    pub async fn retry_load(&self) -> bool {
        let _gate = self.load_gate.lock().await;
        if !self.can_retry() {
            debug!("Retry requested but not allowed");
            return false;
        }
        self.update(|s| {
            s.error = None;
            s.retry_count = 0;
        });
        self.load_locked(true).await;
        true
    }

    /// Reset to the initial state, keeping cache/retry settings.
    pub fn clear_data(&self) {
        info!("Clearing sales data");
        self.update(|s| {
            s.dataset = None;
            s.last_updated = None;
            s.error = None;
            s.retry_count = 0;
            s.is_loading = false;
            s.is_initial_load = true;
            s.is_refreshing = false;
        });
    }

    pub fn dismiss_error(&self) {
        self.update(|s| s.error = None);
    }

    pub fn set_cache_expiry(&self, cache_expiry: Duration) {
        self.update(|s| s.cache_expiry = cache_expiry);
    }

    pub fn set_retry_config(&self, max_retries: u32, retry_delay: Duration) {
        self.update(|s| {
            s.max_retries = max_retries;
            s.retry_delay = retry_delay;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::STORE_KEY;
    use crate::storage::MemoryStorage;
    use crate::test_support::{dataset, ScriptedSource};
    use common::{ErrorCode, SourceError};
    use serde_json::json;

    fn store_with(source: Arc<ScriptedSource>, storage: Arc<MemoryStorage>) -> SalesStore {
        SalesStore::new(source, storage, StoreSettings::default())
    }

    fn seed_storage(storage: &MemoryStorage, last_updated: DateTime<Utc>) {
        let persisted = PersistedState {
            dataset: Some(dataset(7.0)),
            last_updated: Some(last_updated),
            cache_expiry: 300_000,
            max_retries: 3,
            retry_delay: 1000,
        };
        persist::persist(storage, &persisted).unwrap();
    }

    fn server_error() -> SourceError {
        SourceError::Server {
            message: "unavailable".into(),
            status: 503,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_load_reaches_loaded_state() {
        let source = Arc::new(ScriptedSource::ok());
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(source.clone(), storage.clone());

        let initial = store.snapshot();
        assert!(initial.dataset.is_none());
        assert!(initial.is_initial_load);

        store.load_sales_data().await;

        let s = store.snapshot();
        assert_eq!(s.dataset.as_deref(), Some(&dataset(1.0)));
        assert!(s.last_updated.is_some());
        assert!(s.error.is_none());
        assert_eq!(s.retry_count, 0);
        assert!(!s.is_loading);
        assert!(!s.is_initial_load);
        assert!(!s.is_refreshing);
        assert_eq!(source.calls(), 1);
        assert_eq!(source.seen_options(), vec![LoadOptions::default()]);

        let saved = persist::hydrate(storage.as_ref()).unwrap();
        assert_eq!(saved.dataset, Some(dataset(1.0)));
        assert_eq!(saved.last_updated, s.last_updated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_skips_remote_source() {
        let source = Arc::new(ScriptedSource::ok());
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now() - chrono::Duration::minutes(1));
        let store = store_with(source.clone(), storage);

        assert!(store.is_cache_valid());
        store.load_sales_data().await;

        assert_eq!(source.calls(), 0);
        assert_eq!(store.dataset().as_deref(), Some(&dataset(7.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_triggers_background_refresh() {
        let source = Arc::new(ScriptedSource::ok().with_latency(Duration::from_millis(500)));
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now() - chrono::Duration::minutes(10));
        let store = Arc::new(store_with(source.clone(), storage));
        assert!(!store.is_cache_valid());

        let task = tokio::spawn({
            let store = store.clone();
            async move { store.load_sales_data().await }
        });
        tokio::task::yield_now().await;

        let mid = store.snapshot();
        assert!(mid.is_loading);
        assert!(mid.is_refreshing);
        assert_eq!(mid.dataset.as_deref(), Some(&dataset(7.0)));

        task.await.unwrap();
        let done = store.snapshot();
        assert!(!done.is_loading);
        assert!(!done.is_refreshing);
        assert_eq!(done.dataset.as_deref(), Some(&dataset(1.0)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_keeps_existing_dataset() {
        let source = Arc::new(ScriptedSource::always(Err(server_error())));
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now() - chrono::Duration::hours(1));
        let store = store_with(source.clone(), storage);

        store.load_sales_data().await;

        let s = store.snapshot();
        assert_eq!(s.dataset.as_deref(), Some(&dataset(7.0)));
        let err = s.error.as_ref().unwrap();
        assert_eq!(err.code, ErrorCode::ServerError);
        assert_eq!(err.details.attempt, 3);
        assert_eq!(err.details.status_code, Some(503));
        assert!(!s.is_loading);
        assert!(!s.is_refreshing);
        assert_eq!(source.calls(), 3);
        assert_eq!(s.retry_count, 2);
        assert!(store.can_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_bypass_source_cache_with_backoff() {
        let source = Arc::new(
            ScriptedSource::ok()
                .then(Err(SourceError::network("offline")))
                .then(Err(server_error())),
        );
        let store = store_with(source.clone(), Arc::new(MemoryStorage::new()));
        let started = tokio::time::Instant::now();

        store.load_sales_data().await;

        assert_eq!(
            source.seen_options(),
            vec![LoadOptions::default(), LoadOptions::bypass(), LoadOptions::bypass()]
        );
        let elapsed = started.elapsed();
        // 1s after attempt 1, 2s after attempt 2.
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
        assert!(store.snapshot().error.is_none());
        assert!(store.dataset().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_fast() {
        let source = Arc::new(ScriptedSource::always(Err(SourceError::validation(
            "bad payload",
            None,
        ))));
        let store = store_with(source.clone(), Arc::new(MemoryStorage::new()));

        store.load_sales_data().await;

        assert_eq!(source.calls(), 1);
        let s = store.snapshot();
        assert_eq!(s.error.as_ref().unwrap().code, ErrorCode::ValidationError);
        assert!(!s.error.as_ref().unwrap().details.retryable);
        assert!(s.dataset.is_none());
        assert!(s.is_initial_load);
        assert!(!store.can_retry());
        assert!(!store.retry_load().await);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_load_clears_error_and_reloads() {
        let source = Arc::new(
            ScriptedSource::ok()
                .then(Err(server_error()))
                .then(Err(server_error()))
                .then(Err(server_error())),
        );
        let store = store_with(source.clone(), Arc::new(MemoryStorage::new()));

        assert!(!store.retry_load().await);
        store.load_sales_data().await;
        assert!(store.can_retry());

        assert!(store.retry_load().await);
        let s = store.snapshot();
        assert!(s.error.is_none());
        assert_eq!(s.retry_count, 0);
        assert!(s.dataset.is_some());
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ignores_fresh_cache() {
        let source = Arc::new(ScriptedSource::ok());
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now());
        let store = store_with(source.clone(), storage);

        store.refresh_data().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(store.dataset().as_deref(), Some(&dataset(1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_in_flight_load_then_reloads() {
        let source = Arc::new(ScriptedSource::ok().with_latency(Duration::from_secs(5)));
        let store = Arc::new(store_with(source.clone(), Arc::new(MemoryStorage::new())));

        let in_flight = tokio::spawn({
            let store = store.clone();
            async move { store.load_sales_data().await }
        });
        tokio::task::yield_now().await;
        assert!(store.store_info().is_loading);

        store.refresh_data().await;
        in_flight.await.unwrap();

        assert_eq!(source.calls(), 2);
        let s = store.snapshot();
        assert!(s.dataset.is_some());
        assert!(!s.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_load_reloads_even_if_cache_became_valid() {
        let source = Arc::new(ScriptedSource::ok().then(Err(server_error())));
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now() - chrono::Duration::minutes(10));
        let store = store_with(source.clone(), storage);
        store.set_retry_config(1, Duration::from_millis(10));

        store.load_sales_data().await;
        assert!(store.snapshot().error.is_some());
        assert_eq!(store.dataset().as_deref(), Some(&dataset(7.0)));

        store.set_cache_expiry(Duration::from_secs(3600));
        assert!(store.is_cache_valid());
        assert!(store.retry_load().await);

        assert_eq!(source.calls(), 2);
        assert!(store.snapshot().error.is_none());
        assert_eq!(store.dataset().as_deref(), Some(&dataset(1.0)));
    }

    #[test]
    fn test_persisted_durations_saturate() {
        let state = StoreState::initial(StoreSettings {
            cache_expiry: Duration::MAX,
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
        });
        let persisted = state.persisted();
        assert_eq!(persisted.cache_expiry, u64::MAX);
        assert_eq!(persisted.retry_delay, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_everything_but_settings() {
        let source = Arc::new(ScriptedSource::always(Err(server_error())));
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(&storage, Utc::now() - chrono::Duration::hours(1));
        let store = store_with(source, storage.clone());
        store.set_retry_config(5, Duration::from_millis(10));
        store.load_sales_data().await;
        assert!(store.snapshot().error.is_some());

        store.clear_data();

        let s = store.snapshot();
        assert!(s.dataset.is_none());
        assert!(s.last_updated.is_none());
        assert!(s.error.is_none());
        assert_eq!(s.retry_count, 0);
        assert!(s.is_initial_load);
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.retry_delay, Duration::from_millis(10));
        assert_eq!(store.cache_age(), Duration::MAX);

        let saved = persist::hydrate(storage.as_ref()).unwrap();
        assert!(saved.dataset.is_none());
        assert_eq!(saved.max_retries, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rehydrates_string_timestamp() {
        let storage = Arc::new(MemoryStorage::new());
        let raw = json!({
            "dataset": serde_json::to_value(dataset(3.0)).unwrap(),
            "lastUpdated": "2024-01-01T00:00:00.000Z",
            "cacheExpiry": 300000,
            "maxRetries": 3,
            "retryDelay": 1000
        });
        storage.set_item(STORE_KEY, &raw.to_string()).unwrap();

        let store = store_with(Arc::new(ScriptedSource::ok()), storage);
        let s = store.snapshot();

        let expected = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(s.last_updated, Some(expected));
        assert_eq!(s.cache_expiry, Duration::from_secs(300));
        assert!(!store.is_cache_valid());
        assert!(s.is_cache_valid_at(expected + chrono::Duration::minutes(4)));
        assert!(!s.is_cache_valid_at(expected + chrono::Duration::minutes(5)));
        assert_eq!(
            s.cache_age_at(expected + chrono::Duration::seconds(90)),
            Duration::from_secs(90)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_degrades_to_memory() {
        let source = Arc::new(ScriptedSource::ok());
        let storage = Arc::new(MemoryStorage::with_quota(16));
        let store = store_with(source, storage.clone());

        store.load_sales_data().await;

        assert!(store.dataset().is_some());
        assert!(store.is_cache_valid());
        assert_eq!(storage.get_item(STORE_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_share_one_fetch() {
        let source = Arc::new(ScriptedSource::ok().with_latency(Duration::from_millis(800)));
        let store = store_with(source.clone(), Arc::new(MemoryStorage::new()));

        tokio::join!(store.load_sales_data(), store.load_sales_data());

        assert_eq!(source.calls(), 1);
        assert!(store.dataset().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_observe_transitions() {
        let source = Arc::new(ScriptedSource::ok());
        let store = store_with(source, Arc::new(MemoryStorage::new()));
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.load_sales_data().await;

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert!(seen.dataset.is_some());
        assert_eq!(
            store.store_info(),
            StoreInfo {
                has_data: true,
                is_loading: false,
                has_error: false,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_error() {
        let source = Arc::new(ScriptedSource::always(Err(server_error())));
        let store = store_with(source, Arc::new(MemoryStorage::new()));
        store.load_sales_data().await;
        assert!(store.store_info().has_error);

        store.dismiss_error();
        assert!(store.snapshot().error.is_none());
        assert!(!store.can_retry());
    }
}
