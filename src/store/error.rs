// ABOUTME: Error types for persistence backends.
// ABOUTME: Missing rows, refused status transitions, and backend failures.

use super::records::DeploymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("deployment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    InvalidTransition,
    Conflict,
    Backend,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::InvalidTransition { .. } => StoreErrorKind::InvalidTransition,
            StoreError::Conflict(_) => StoreErrorKind::Conflict,
            StoreError::Backend(_) => StoreErrorKind::Backend,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
