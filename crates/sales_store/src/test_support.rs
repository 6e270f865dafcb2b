//! Scripted data source for store and coordinator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{DataOrigin, Dataset, SourceError};
use remote_source::{
    DataSource, HealthStatus, LoadMetadata, LoadOptions, LoadResponse, SourceHealth,
};

pub fn dataset(tag: f64) -> Dataset {
    let mut ds = Dataset::new(vec!["2024-01".into(), "2024-02".into(), "2024-03".into()]);
    ds.insert_series("Natura", "Perfumaria", vec![Some(tag), None, Some(tag * 2.0)]);
    ds.insert_series("Avon", "Maquiagem", vec![Some(1.0), Some(2.0), Some(3.0)]);
    ds
}

/// Replays queued outcomes, then repeats `fallback` forever.
pub struct ScriptedSource {
    queue: Mutex<VecDeque<Result<Dataset, SourceError>>>,
    fallback: Result<Dataset, SourceError>,
    latency: Duration,
    calls: AtomicU32,
    seen: Mutex<Vec<LoadOptions>>,
}

impl ScriptedSource {
    pub fn ok() -> Self {
        Self::always(Ok(dataset(1.0)))
    }

    pub fn always(outcome: Result<Dataset, SourceError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: outcome,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, outcome: Result<Dataset, SourceError>) -> Self {
        self.queue.lock().unwrap().push_back(outcome);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_options(&self) -> Vec<LoadOptions> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn load(&self, options: LoadOptions) -> Result<LoadResponse, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(options);
        let outcome = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        outcome.map(|data| LoadResponse {
            data,
            metadata: LoadMetadata {
                timestamp: Utc::now(),
                source: DataOrigin::Api,
                cached: false,
                load_time: self.latency,
            },
        })
    }

    async fn health_check(&self) -> SourceHealth {
        SourceHealth {
            status: HealthStatus::Healthy,
            latency: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }
}
