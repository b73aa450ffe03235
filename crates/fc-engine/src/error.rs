use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use fc_core::{EntryId, RegionId, UserId, ValidationError};
use fc_db::DbError;

use crate::monitor::MonitorError;
use crate::store::StoreError;

/// Errors surfaced at the engine's public boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The location provider reported that permission was revoked.
    #[error("location permission denied")]
    PermissionDenied,
    /// The provider had no fix for this update.
    #[error("location sample unavailable")]
    SampleUnavailable,
    /// A store call failed or timed out. A timed-out write may still land;
    /// it is settled before the next read of the open entry.
    #[error("persistence failure during {operation}: {reason}")]
    PersistenceFailure {
        operation: &'static str,
        reason: String,
    },
    /// The user already has an open time entry.
    #[error("user {user_id} already has an open time entry")]
    ConflictDetected {
        user_id: UserId,
        existing: Option<EntryId>,
    },
    #[error("user {user_id} has no open time entry")]
    NoOpenEntry { user_id: UserId },
    #[error("region not found: {0}")]
    RegionNotFound(RegionId),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl EngineError {
    /// Maps a store failure. Validation errors raised by the store stay
    /// validation errors; everything else is a persistence failure.
    pub(crate) fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Database(DbError::Validation(err)) => Self::Validation(err),
            other => Self::PersistenceFailure {
                operation,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn timed_out(operation: &'static str, limit: Duration) -> Self {
        Self::PersistenceFailure {
            operation,
            reason: format!("timed out after {} ms", limit.as_millis()),
        }
    }

    pub(crate) fn outcome_unknown(operation: &'static str, limit: Duration) -> Self {
        Self::PersistenceFailure {
            operation,
            reason: format!(
                "timed out after {} ms; outcome unknown until the write settles",
                limit.as_millis()
            ),
        }
    }

    pub(crate) fn write_aborted(operation: &'static str) -> Self {
        Self::PersistenceFailure {
            operation,
            reason: "write task ended abnormally".to_string(),
        }
    }

    pub(crate) fn write_pending() -> Self {
        Self::PersistenceFailure {
            operation: "settle earlier write",
            reason: "an earlier write is still in progress".to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure { .. })
    }
}

/// Runs a store call under the persistence timeout.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(EngineError::from_store(operation, err)),
        Err(_) => Err(EngineError::timed_out(operation, limit)),
    }
}
