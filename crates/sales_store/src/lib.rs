//! Sales data store: retry policy, durable persistence, the reactive store,
//! and startup coordination.

pub mod init;
pub mod persist;
pub mod retry;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

pub use init::{HealthReport, InitCoordinator, InitOptions, InitReport};
pub use retry::{backoff_delay, with_retry, RetryPolicy, Retryable};
pub use storage::{
    FileStorage, MemoryStorage, StateStorage, StorageError, StorageInfo, TypedStorage,
};
pub use store::{SalesStore, StoreInfo, StoreSettings, StoreState};
