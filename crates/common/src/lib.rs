//! Shared types, config, and error definitions for the sales dashboard core.

pub mod config;
pub mod error;
pub mod types;

pub use config::DashboardConfig;
pub use error::{Error, ErrorCode, ErrorDetails, ErrorRecord, SourceError};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
