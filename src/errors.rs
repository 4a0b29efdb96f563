//! Typed error hierarchy for the cirun engine.
//!
//! Two top-level enums cover the two subsystems that report structured
//! failures:
//! - `EngineError` — orchestrator handler failures
//! - `StoreError` — durable state store failures
//!
//! Stale signals (run identity mismatch, not running) are not errors;
//! handlers drop them silently.

use thiserror::Error;

/// Errors from the orchestrator's message and timer handlers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No configuration item found in input")]
    NoItems,

    #[error("Engine is stopped")]
    Stopped,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the durable state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read state file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file at {path} is corrupt: {source}")]
    Corrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_stopped_is_matchable() {
        let err = EngineError::Stopped;
        assert!(matches!(err, EngineError::Stopped));
        assert_eq!(err.to_string(), "Engine is stopped");
    }

    #[test]
    fn store_error_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StoreError::WriteFailed {
            path: "/tmp/state.json".into(),
            source: io_err,
        };
        assert!(err.to_string().contains("/tmp/state.json"));
    }

    #[test]
    fn engine_error_converts_from_store_error() {
        let inner = StoreError::Other(anyhow::anyhow!("boom"));
        let err: EngineError = inner.into();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&EngineError::NoItems);
        assert_std_error(&StoreError::Other(anyhow::anyhow!("x")));
    }
}
