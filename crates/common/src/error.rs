//! Error types for the dashboard core.
//!
//! `SourceError` is the classified failure raised by a data source; the
//! store turns it into an `ErrorRecord`, which is plain data the UI renders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level error (config loading).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Classified source errors ──────────────────────────────────────────

/// Classification code attached to every load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    TimeoutError,
    ServerError,
    ValidationError,
    CacheError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::CacheError => "CACHE_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by a data source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    #[error("Request timed out after {timeout_ms}ms: {message}")]
    Timeout { message: String, timeout_ms: u64 },

    #[error("Server error (status={status}): {message}")]
    Server { message: String, status: u16 },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("{message}")]
    Unknown { message: String },
}

impl SourceError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::Timeout { .. } => ErrorCode::TimeoutError,
            Self::Server { .. } => ErrorCode::ServerError,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Cache { .. } => ErrorCode::CacheError,
            Self::Unknown { .. } => ErrorCode::UnknownError,
        }
    }

    /// Whether re-attempting the same operation may succeed.
    ///
    /// Validation failures mean the payload itself is malformed; cache
    /// failures are local. Everything else, including unclassified
    /// errors, is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Cache { .. })
    }

    /// Upstream HTTP-like status code, when the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            Self::Server { status, .. } => Some(*status),
            Self::Timeout { .. } => Some(408),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Timeout { message, .. }
            | Self::Server { message, .. }
            | Self::Validation { message, .. }
            | Self::Cache { message }
            | Self::Unknown { message } => message,
        }
    }
}

// ── Error record (store state) ────────────────────────────────────────

/// Extra context stored alongside an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub retryable: bool,
    pub attempt: u32,
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Display form of the original error.
    #[serde(default)]
    pub original: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A normalized load failure, observed by the UI as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    pub code: ErrorCode,
    pub details: ErrorDetails,
}

impl ErrorRecord {
    /// Normalize a source error raised on the given attempt.
    pub fn from_source(err: &SourceError, attempt: u32) -> Self {
        Self {
            message: err.message().to_string(),
            code: err.code(),
            details: ErrorDetails {
                retryable: err.is_retryable(),
                attempt,
                status_code: err.status_code(),
                original: Some(err.to_string()),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.details.retryable
    }
}
