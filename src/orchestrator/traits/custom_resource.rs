// ABOUTME: Optional custom resource capability.
// ABOUTME: Creates and removes instances of cluster-defined resource kinds.

use super::sealed::Sealed;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::types::CustomResource;
use async_trait::async_trait;

#[async_trait]
pub trait CustomResourceOps: Sealed + Send + Sync {
    async fn create_custom_resource(
        &self,
        resource: &CustomResource,
    ) -> Result<serde_json::Value, OrchestratorError>;

    async fn delete_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;
}
