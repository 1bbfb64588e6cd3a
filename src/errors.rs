//! Centralized error handling for the local data layer.
//!
//! Every public operation across schema, migration, data-access, LWW,
//! dependency-tracking, reactive and sync components returns `AppResult`.
//! The error kinds below follow spec.md §7 exactly: usage/validation/state
//! errors are caller mistakes and propagate synchronously; engine errors
//! wrap the underlying SQLite failures; the sync-* variants are produced
//! only by the sync manager's classification of upload-callback failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Caller violated a contract: unknown table/column, missing required
    /// column, non-LWW column passed to an LWW API, empty update map,
    /// composite-key arity mismatch, missing LWW timestamps in bulk-load.
    #[error("usage error: {message}")]
    Usage { message: String },

    /// Schema construction conflict: duplicate names, view shadowing a
    /// table, relationship referencing a missing table.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Invalid state transition: concurrent `sync_now`, empty SELECT in a
    /// query builder, refresh on a closed stream.
    #[error("state error: {message}")]
    State { message: String },

    /// The underlying database returned a failure that must propagate
    /// (as opposed to the swallowed engine errors inside LWW base-table
    /// writes, which never reach the caller as an `Err`).
    #[error("engine error: {message}")]
    Engine { message: String },

    /// A soft/retryable failure reported by the sync upload callback.
    #[error("sync transient error: {message}")]
    SyncTransient { message: String },

    /// A hard failure reported by the sync upload callback — classified
    /// by a permanent-failure marker in the error message (see
    /// `sync::is_permanent_failure`) and not retried within this sync.
    #[error("sync permanent error: {message}")]
    SyncPermanent { message: String },
}

impl AppError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn sync_transient(message: impl Into<String>) -> Self {
        Self::SyncTransient {
            message: message.into(),
        }
    }

    pub fn sync_permanent(message: impl Into<String>) -> Self {
        Self::SyncPermanent {
            message: message.into(),
        }
    }

    /// Category used for logging/metrics grouping.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Usage { .. } => "usage",
            Self::Validation { .. } => "validation",
            Self::State { .. } => "state",
            Self::Engine { .. } => "engine",
            Self::SyncTransient { .. } => "sync_transient",
            Self::SyncPermanent { .. } => "sync_permanent",
        }
    }

    /// The sync manager retries everything by default — a plain
    /// `AppError::Engine` from a flaky upload callback is as retryable as
    /// an explicit `SyncTransient` — except `SyncPermanent` and anything
    /// whose message carries a permanent-failure marker (see
    /// `sync::is_permanent_failure`), which are never retried. Usage and
    /// validation errors are caller mistakes, not upload outcomes, and
    /// never reach the sync manager's retry loop in the first place, but
    /// are classified not-retryable here for consistency.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SyncPermanent { .. } => false,
            Self::Usage { .. } | Self::Validation { .. } => false,
            Self::SyncTransient { message } | Self::State { message } | Self::Engine { message } => {
                !crate::sync::is_permanent_failure(message)
            }
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Engine {
            message: format!("sqlite error: {}", err),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Usage {
            message: format!("invalid json: {}", err),
        }
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Usage {
            message: format!("invalid datetime: {}", err),
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_kind() {
        assert_eq!(AppError::usage("x").category(), "usage");
        assert_eq!(AppError::validation("x").category(), "validation");
        assert_eq!(AppError::state("x").category(), "state");
        assert_eq!(AppError::engine("x").category(), "engine");
    }

    #[test]
    fn retryability_defaults_to_true_unless_permanently_marked() {
        assert!(AppError::sync_transient("timeout").is_retryable());
        assert!(AppError::engine("connection reset").is_retryable());
        assert!(!AppError::sync_permanent("unauthorized").is_retryable());
        assert!(!AppError::engine("403 forbidden").is_retryable());
        assert!(!AppError::usage("bad arg").is_retryable());
    }
}
