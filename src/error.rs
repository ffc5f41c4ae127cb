//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds named in the system's error handling design:
//! validation, not-found, conflict, degraded-dependency, circuit-open,
//! transient, and fatal. Component-local error enums convert into
//! [`AppError`] at their module boundary rather than leaking their own
//! representation across the whole crate.

use thiserror::Error;

/// Top-level error type returned by public operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input supplied by the caller (e.g. malformed custom alias).
    #[error("validation error: {0}")]
    Validation(String),

    /// Lookup miss, expired, or tombstoned mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// Alias already taken, or hash collision exhausted retries.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A non-critical dependency (cache, bus, GeoIP) is unhealthy; the
    /// caller already received a degraded-but-valid result.
    #[error("degraded dependency: {0}")]
    DegradedDependency(String),

    /// ID service is in `hash` or `unavailable` state and minting failed.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Retryable failure that exhausted its retry budget.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable configuration or schema error; caller should exit.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Store-level failure surfaced verbatim.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Distributed cache failure surfaced verbatim (only ever returned
    /// from paths that explicitly choose not to swallow it).
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Malformed JSON encountered where a typed error is expected.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate's public API.
pub type AppResult<T> = Result<T, AppError>;

impl From<crate::id::IdError> for AppError {
    fn from(err: crate::id::IdError) -> Self {
        use crate::id::IdError;
        let unavailable_msg = err.to_string();
        match err {
            IdError::Store(msg) => AppError::Transient(msg),
            IdError::HashExhausted(attempts) => AppError::Conflict(format!("hash fallback exhausted after {attempts} attempts")),
            IdError::Unavailable => AppError::CircuitOpen(unavailable_msg),
            IdError::AliasReserved(alias) => AppError::Validation(format!("alias {alias:?} is reserved")),
            IdError::AliasInvalid(alias) => AppError::Validation(format!("alias {alias:?} does not match the allowed pattern")),
            IdError::AliasTaken(alias) => AppError::Conflict(format!("alias {alias:?} is already taken")),
        }
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::Pool(msg) => AppError::Transient(msg),
            StoreError::Query(e) => AppError::Store(e),
            StoreError::NotFound => AppError::NotFound("mapping not found".to_string()),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Serialization(e) => AppError::Serialization(e),
        }
    }
}

impl AppError {
    /// True for error kinds that a request-path caller should treat as a
    /// normal outcome rather than an incident (validation, not-found,
    /// conflict).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::NotFound(_) | AppError::Conflict(_)
        )
    }
}
