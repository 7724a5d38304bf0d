//! Error types for cbro-resolve
//!
//! [`ResolveError`] is the per-reference failure taxonomy. A failure is scoped
//! to the reference that hit it; the orchestrator records it and moves on.

use crate::services::catalog_client::CatalogError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable failure category written to output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientNetwork,
    RateLimitExceeded,
    MalformedResponse,
    CatalogRejected,
    CacheIo,
    Cancelled,
}

/// Resolution error
///
/// `Clone` so one in-flight lookup can hand its outcome to every waiter on
/// the same key.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// Network failure that survived the bounded retry
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Catalog kept refusing with rate-limit responses after retries
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Catalog response could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Catalog refused the request (4xx or catalog-reported error)
    #[error("Catalog rejected request: {0}")]
    CatalogRejected(String),

    /// Cache store read or write failed
    #[error("Cache IO error: {0}")]
    CacheIo(String),

    /// Cancellation signal was raised
    #[error("Cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResolveError::TransientNetwork(_) => FailureKind::TransientNetwork,
            ResolveError::RateLimitExceeded(_) => FailureKind::RateLimitExceeded,
            ResolveError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ResolveError::CatalogRejected(_) => FailureKind::CatalogRejected,
            ResolveError::CacheIo(_) => FailureKind::CacheIo,
            ResolveError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<CatalogError> for ResolveError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Transient(msg) => ResolveError::TransientNetwork(msg),
            CatalogError::RateLimitExceeded(msg) => ResolveError::RateLimitExceeded(msg),
            CatalogError::Malformed(msg) => ResolveError::MalformedResponse(msg),
            CatalogError::Rejected(status, msg) => {
                ResolveError::CatalogRejected(format!("{}: {}", status, msg))
            }
            CatalogError::Cancelled => ResolveError::Cancelled,
        }
    }
}

impl From<cbro_common::Error> for ResolveError {
    fn from(err: cbro_common::Error) -> Self {
        ResolveError::CacheIo(err.to_string())
    }
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_mapping() {
        assert_eq!(
            ResolveError::from(CatalogError::Transient("timeout".into())).kind(),
            FailureKind::TransientNetwork
        );
        assert_eq!(
            ResolveError::from(CatalogError::Rejected(401, "Invalid API Key".into())),
            ResolveError::CatalogRejected("401: Invalid API Key".into())
        );
        assert_eq!(
            ResolveError::from(CatalogError::Cancelled),
            ResolveError::Cancelled
        );
    }

    #[test]
    fn test_common_error_is_cache_io() {
        let err = ResolveError::from(cbro_common::Error::Internal("disk full".into()));
        assert_eq!(err.kind(), FailureKind::CacheIo);
    }
}
