// ABOUTME: Optional namespace management capability.

use super::sealed::Sealed;
use crate::orchestrator::error::OrchestratorError;
use async_trait::async_trait;

#[async_trait]
pub trait NamespaceOps: Sealed + Send + Sync {
    /// Create the namespace unless it already exists.
    async fn ensure_namespace(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, OrchestratorError>;
}
