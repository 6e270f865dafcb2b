//! Serialize-on-mutate / hydrate-on-construct for the sales store.
//!
//! Only a whitelisted subset of the store state is written, under
//! `sales-store`, as `{"state": {...}, "version": 0}`.

use chrono::{DateTime, Utc};
use common::Dataset;
use remote_source::check_dataset;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{StateStorage, StorageError};

pub const STORE_KEY: &str = "sales-store";
pub const PERSIST_VERSION: u32 = 0;

/// The durable part of the store state. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub dataset: Option<Dataset>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    pub cache_expiry: u64,
    pub max_retries: u32,
    pub retry_delay: u64,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    state: &'a PersistedState,
    version: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Envelope {
        state: PersistedState,
        #[serde(default)]
        version: u32,
    },
    Bare(PersistedState),
}

/// Accept `lastUpdated` as an RFC 3339 string or epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Millis(i64),
    }

    match Option::<RawTimestamp>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawTimestamp::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(de::Error::custom),
        Some(RawTimestamp::Millis(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("timestamp {} out of range", ms))),
    }
}

/// Parse a stored value (envelope or bare state).
pub fn decode(raw: &str) -> Result<PersistedState, serde_json::Error> {
    let stored: Stored = serde_json::from_str(raw)?;
    Ok(match stored {
        Stored::Envelope { state, version } => {
            if version != PERSIST_VERSION {
                debug!("Persisted store version {} (current {})", version, PERSIST_VERSION);
            }
            state
        }
        Stored::Bare(state) => state,
    })
}

pub fn encode(state: &PersistedState) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeRef {
        state,
        version: PERSIST_VERSION,
    })
}

/// Read the persisted state. Missing, unreadable or corrupt entries yield
/// `None`; a structurally invalid dataset is dropped.
pub fn hydrate(storage: &dyn StateStorage) -> Option<PersistedState> {
    let raw = match storage.get_item(STORE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Could not read persisted store state: {}", e);
            return None;
        }
    };

    let mut state = match decode(&raw) {
        Ok(state) => state,
        Err(e) => {
            warn!("Ignoring corrupt persisted store state: {}", e);
            return None;
        }
    };

    if let Some(dataset) = &state.dataset {
        if let Err(e) = check_dataset(dataset) {
            warn!("Dropping invalid persisted dataset: {}", e);
            state.dataset = None;
            state.last_updated = None;
        }
    }

    debug!(
        "Hydrated store state (dataset={}, last_updated={:?})",
        state.dataset.is_some(),
        state.last_updated
    );
    Some(state)
}

pub fn persist(storage: &dyn StateStorage, state: &PersistedState) -> Result<(), StorageError> {
    let raw = encode(state)?;
    storage.set_item(STORE_KEY, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;
    use serde_json::json;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new(vec!["2024-01".into(), "2024-02".into()]);
        ds.insert_series("Natura", "Perfumaria", vec![Some(1.0), None]);
        ds
    }

    #[test]
    fn test_persist_then_hydrate() {
        let storage = MemoryStorage::new();
        let state = PersistedState {
            dataset: Some(dataset()),
            last_updated: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            cache_expiry: 300_000,
            max_retries: 3,
            retry_delay: 1000,
        };
        persist(&storage, &state).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&storage.get_item(STORE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw["version"], 0);
        assert_eq!(raw["state"]["cacheExpiry"], 300_000);
        assert!(raw["state"]["lastUpdated"].is_string());

        assert_eq!(hydrate(&storage), Some(state));
    }

    #[test]
    fn test_last_updated_accepts_string_and_millis() {
        let from_string = decode(
            &json!({"lastUpdated": "2024-01-01T00:00:00.000Z", "cacheExpiry": 1, "maxRetries": 1, "retryDelay": 1})
                .to_string(),
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(from_string.last_updated, Some(expected));

        let from_millis = decode(
            &json!({"state": {"lastUpdated": 1704067200000i64, "cacheExpiry": 1, "maxRetries": 1, "retryDelay": 1}, "version": 0})
                .to_string(),
        )
        .unwrap();
        assert_eq!(from_millis.last_updated, Some(expected));

        let absent = decode(
            &json!({"lastUpdated": null, "cacheExpiry": 1, "maxRetries": 1, "retryDelay": 1})
                .to_string(),
        )
        .unwrap();
        assert_eq!(absent.last_updated, None);
    }

    #[test]
    fn test_corrupt_or_missing_state_hydrates_to_none() {
        let storage = MemoryStorage::new();
        assert_eq!(hydrate(&storage), None);

        storage.set_item(STORE_KEY, "{not json").unwrap();
        assert_eq!(hydrate(&storage), None);

        storage
            .set_item(STORE_KEY, &json!({"lastUpdated": "yesterday"}).to_string())
            .unwrap();
        assert_eq!(hydrate(&storage), None);
    }

    #[test]
    fn test_invalid_persisted_dataset_is_dropped() {
        let storage = MemoryStorage::new();
        let raw = json!({
            "state": {
                "dataset": {"dateRange": ["a", "b"], "brands": {"X": {"y": [1.0]}}},
                "lastUpdated": "2024-01-01T00:00:00Z",
                "cacheExpiry": 300000,
                "maxRetries": 3,
                "retryDelay": 1000
            },
            "version": 0
        });
        storage.set_item(STORE_KEY, &raw.to_string()).unwrap();

        let state = hydrate(&storage).unwrap();
        assert!(state.dataset.is_none());
        assert!(state.last_updated.is_none());
        assert_eq!(state.max_retries, 3);
    }
}
