//! Error taxonomy for plan operations.
//!
//! Every variant implies that nothing was committed: operations either
//! commit their whole transaction or roll it back.

use thiserror::Error;

use crate::draft::ValidationError;

/// SQLSTATE codes that mean "another transaction got in the way":
/// serialization failure, deadlock, lock not available, unique violation.
const CONFLICT_CODES: &[&str] = &["40001", "40P01", "55P03", "23505"];

/// Failure of a plan operation.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Malformed or missing attributes. Not retryable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The referenced plan, template, or user does not exist or is not
    /// visible to the caller.
    #[error("{what} not found or not owned by caller")]
    NotFoundOrUnauthorized { what: String },

    /// Aborted because of a concurrent conflicting transaction. Safe to
    /// retry: the final state does not depend on how often it ran.
    #[error("concurrent update conflict: {0:#}")]
    Conflict(anyhow::Error),

    /// Commit or connectivity failure.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl PlanError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFoundOrUnauthorized { what: what.into() }
    }

    /// Classify a database-layer error as [`PlanError::Conflict`] or
    /// [`PlanError::Storage`] by the SQLSTATE anywhere in its chain.
    pub fn from_storage(err: anyhow::Error) -> Self {
        if is_conflict(&err) {
            Self::Conflict(err)
        } else {
            Self::Storage(err)
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .and_then(|db| db.code())
            .is_some_and(|code| CONFLICT_CODES.contains(&code.as_ref()))
    })
}
