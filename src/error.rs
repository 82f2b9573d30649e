// ABOUTME: Error taxonomy of the control plane surface.
// ABOUTME: Module errors are folded into the variants callers branch on; the rest stay wrapped.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::orchestrator::{Capability, FactoryError, OrchestratorError};
use crate::store::StoreError;
use crate::types::DeploymentId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Orchestrator(OrchestratorError),

    #[error("{0}")]
    AlreadyInProgress(String),

    #[error("the cluster does not support {0}")]
    UnsupportedCapability(Capability),

    #[error("deployment {0} is not running")]
    NotRunning(DeploymentId),

    #[error("deployment {0} has no recorded process")]
    NoProcessId(DeploymentId),

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Factory(FactoryError),

    #[error(transparent)]
    Deploy(DeployError),

    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<OrchestratorError> for Error {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::UnsupportedCapability(capability) => {
                Error::UnsupportedCapability(capability)
            }
            e => Error::Orchestrator(e),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Error::NotFound { entity, id },
            e => Error::Store(e),
        }
    }
}

impl From<FactoryError> for Error {
    fn from(e: FactoryError) -> Self {
        match e {
            FactoryError::UnknownServer { server } => Error::NotFound {
                entity: "server",
                id: server.to_string(),
            },
            FactoryError::UnknownApplication { application } => Error::NotFound {
                entity: "application",
                id: application.to_string(),
            },
            FactoryError::Lookup { source } => source.into(),
            FactoryError::Orchestrator { source } => source.into(),
            e => Error::Factory(e),
        }
    }
}

impl From<DeployError> for Error {
    fn from(e: DeployError) -> Self {
        match e {
            DeployError::NotFound { entity, id } => Error::NotFound { entity, id },
            DeployError::NotRunning(id) => Error::NotRunning(id),
            DeployError::NoProcessId(id) => Error::NoProcessId(id),
            DeployError::Validation(message) => Error::Validation(message),
            e @ DeployError::AlreadyInProgress { .. } => Error::AlreadyInProgress(e.to_string()),
            DeployError::Store(source) => source.into(),
            DeployError::Factory(source) => source.into(),
            e => Error::Deploy(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeployErrorKind;
    use crate::types::ServerId;

    #[test]
    fn unsupported_capability_is_surfaced_directly() {
        let err: Error = OrchestratorError::UnsupportedCapability(Capability::Autoscaling).into();
        assert!(matches!(
            err,
            Error::UnsupportedCapability(Capability::Autoscaling)
        ));
    }

    #[test]
    fn nested_not_found_is_flattened() {
        let err: Error = DeployError::Factory(FactoryError::UnknownServer {
            server: ServerId::new("srv-1"),
        })
        .into();
        match err {
            Error::NotFound { entity, id } => {
                assert_eq!(entity, "server");
                assert_eq!(id, "srv-1");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn queue_errors_stay_wrapped() {
        let err: Error = DeployError::QueueClosed.into();
        match err {
            Error::Deploy(inner) => assert_eq!(inner.kind(), DeployErrorKind::Cancelled),
            other => panic!("expected Deploy, got {other:?}"),
        }
    }
}
