//! Error types for wozmap-harvest
//!
//! Three tiers:
//! - [`LookupError`]: per-address upstream failures, transient or permanent. These never
//!   leave the per-item loop; they end up as retry decisions or failure counters.
//! - [`DatasetError`]: columnar encoding/decoding failures.
//! - [`HarvestError`]: fatal errors that abort the run. Each variant names the durable
//!   resource that failed so the operator knows what to fix.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Upstream lookup error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// Upstream has no record for the requested key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream throttled the request (HTTP 429)
    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream temporarily unreachable (5xx, timeout, connection failure)
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream answered with something we cannot use
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl LookupError {
    /// Transient errors are worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LookupError::RateLimited { .. } | LookupError::UpstreamUnavailable(_)
        )
    }

    /// Delay requested by the upstream, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LookupError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Columnar dataset encoding error
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Column missing or of an unexpected type
    #[error("Schema error: {0}")]
    Schema(String),
}

/// Fatal harvest error
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Checkpoint {} could not be written: {source}", .path.display())]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {} could not be read: {reason}", .path.display())]
    CheckpointRead { path: PathBuf, reason: String },

    #[error("Checkpoint regression: index {attempted} is below saved index {saved}")]
    CheckpointRegression { saved: u64, attempted: u64 },

    #[error("Dataset {} could not be written: {source}", .path.display())]
    DatasetWrite {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },

    #[error("Dataset {} could not be read: {source}", .path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },

    #[error("Input {} could not be loaded: {reason}", .path.display())]
    Input { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] wozmap_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for fatal-error paths
pub type HarvestResult<T> = Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LookupError::RateLimited { retry_after: None }.is_transient());
        assert!(LookupError::UpstreamUnavailable("503".into()).is_transient());
        assert!(!LookupError::NotFound("x".into()).is_transient());
        assert!(!LookupError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let err = LookupError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(
            LookupError::UpstreamUnavailable("x".into()).retry_after(),
            None
        );
    }

    #[test]
    fn test_fatal_message_names_resource() {
        let err = HarvestError::CheckpointWrite {
            path: PathBuf::from("/data/harvest-checkpoint.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("harvest-checkpoint.json"));
    }
}
