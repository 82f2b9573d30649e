// ABOUTME: Optional horizontal autoscaling capability.
// ABOUTME: Only adapters whose cluster has a native autoscaler implement this.

use super::sealed::Sealed;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::types::{HpaSpec, HpaStatus};
use async_trait::async_trait;

#[async_trait]
pub trait AutoscalingOps: Sealed + Send + Sync {
    /// Create or replace the autoscaler for `spec.target`.
    async fn configure_hpa(&self, spec: &HpaSpec) -> Result<(), OrchestratorError>;

    async fn delete_hpa(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;

    async fn hpa_status(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<Option<HpaStatus>, OrchestratorError>;
}
