// ABOUTME: Error types for orchestrator adapter operations.
// ABOUTME: Normalizes Docker Engine and Kubernetes API failures into one taxonomy.

use super::capabilities::Capability;

/// Failure of a cluster call.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cluster unreachable: {0}")]
    Connection(String),

    #[error("cluster API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0} is not supported by this orchestrator")]
    UnsupportedCapability(Capability),

    #[error("invalid orchestrator configuration: {0}")]
    InvalidConfig(String),

    #[error("unexpected cluster response: {0}")]
    Decode(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorErrorKind {
    NotFound,
    Conflict,
    Unauthorized,
    Connection,
    Api,
    UnsupportedCapability,
    InvalidConfig,
    Decode,
}

impl OrchestratorError {
    pub fn kind(&self) -> OrchestratorErrorKind {
        match self {
            OrchestratorError::NotFound(_) => OrchestratorErrorKind::NotFound,
            OrchestratorError::Conflict(_) => OrchestratorErrorKind::Conflict,
            OrchestratorError::Unauthorized(_) => OrchestratorErrorKind::Unauthorized,
            OrchestratorError::Connection(_) => OrchestratorErrorKind::Connection,
            OrchestratorError::Api { .. } => OrchestratorErrorKind::Api,
            OrchestratorError::UnsupportedCapability(_) => {
                OrchestratorErrorKind::UnsupportedCapability
            }
            OrchestratorError::InvalidConfig(_) => OrchestratorErrorKind::InvalidConfig,
            OrchestratorError::Decode(_) => OrchestratorErrorKind::Decode,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == OrchestratorErrorKind::NotFound
    }

    /// Map an HTTP status from either control plane API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => OrchestratorError::NotFound(message),
            409 => OrchestratorError::Conflict(message),
            401 | 403 => OrchestratorError::Unauthorized(message),
            _ => OrchestratorError::Api { status, message },
        }
    }
}

/// Swallow NotFound for idempotent deletes.
pub fn ignore_not_found(result: Result<(), OrchestratorError>) -> Result<(), OrchestratorError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl From<bollard::errors::Error> for OrchestratorError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => OrchestratorError::from_status(status_code, message),
            other => OrchestratorError::Connection(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            OrchestratorError::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            OrchestratorError::Decode(e.to_string())
        } else {
            OrchestratorError::Connection(e.to_string())
        }
    }
}
