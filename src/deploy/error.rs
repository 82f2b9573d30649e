// ABOUTME: Error types for submitting, running, and killing deployments.
// ABOUTME: Each error maps to a DeployErrorKind for programmatic handling.

use std::time::Duration;

use super::locks::LockHolder;
use crate::build::BuildError;
use crate::logs::LogError;
use crate::orchestrator::FactoryError;
use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::types::{DeploymentId, JobId, PreviewId};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("preview deployment {0} no longer exists")]
    PreviewRemoved(PreviewId),

    #[error("deployment {0} is not running")]
    NotRunning(DeploymentId),

    #[error("deployment {0} has no recorded process")]
    NoProcessId(DeploymentId),

    #[error("a deployment of {target} is already in progress{}", holder_suffix(.holder))]
    AlreadyInProgress {
        target: String,
        holder: Option<LockHolder>,
    },

    #[error("{0}")]
    Validation(String),

    #[error("job {0} was cancelled before it started")]
    Cancelled(JobId),

    #[error("job was rejected: {0}")]
    Rejected(String),

    #[error("the deployment queue is shut down")]
    QueueClosed,

    #[error("deployment timed out after {}", humantime_serde::re::humantime::format_duration(*.0))]
    TimedOut(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn holder_suffix(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(h) => format!(" (held by {} since {})", h.worker, h.since.format("%H:%M:%S")),
        None => String::new(),
    }
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    NotFound,
    NotRunning,
    NoProcessId,
    /// Another job holds the target.
    AlreadyInProgress,
    Validation,
    /// The job never ran.
    Cancelled,
    Timeout,
    Store,
    Orchestrator,
    Build,
    Io,
}

impl DeployError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DeployError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::NotFound { .. } | DeployError::PreviewRemoved(_) => {
                DeployErrorKind::NotFound
            }
            DeployError::NotRunning(_) => DeployErrorKind::NotRunning,
            DeployError::NoProcessId(_) => DeployErrorKind::NoProcessId,
            DeployError::AlreadyInProgress { .. } => DeployErrorKind::AlreadyInProgress,
            DeployError::Validation(_) => DeployErrorKind::Validation,
            DeployError::Cancelled(_) | DeployError::Rejected(_) | DeployError::QueueClosed => {
                DeployErrorKind::Cancelled
            }
            DeployError::TimedOut(_) => DeployErrorKind::Timeout,
            DeployError::Store(_) => DeployErrorKind::Store,
            DeployError::Factory(_) => DeployErrorKind::Orchestrator,
            DeployError::Build(BuildError::Orchestrator(_)) => DeployErrorKind::Orchestrator,
            DeployError::Build(_) => DeployErrorKind::Build,
            DeployError::Log(_) | DeployError::Remote(_) => DeployErrorKind::Io,
        }
    }
}
