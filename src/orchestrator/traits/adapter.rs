// ABOUTME: Base operations every orchestrator adapter implements.
// ABOUTME: Workload rollout, scaling, restart, rollback, and observation over one cluster.

use super::sealed::Sealed;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::types::{
    ClusterCapabilities, ClusterType, DeploymentInfo, DeploymentSpec, EventStream, HealthStatus,
    ResourceMetrics,
};
use async_trait::async_trait;

/// Capability-neutral interface over a cluster control plane.
///
/// `namespace` is ignored by adapters without namespaces (Swarm).
#[async_trait]
pub trait OrchestratorAdapter: Sealed + Send + Sync {
    /// Report which control plane answers on this connection.
    async fn detect(&self) -> Result<ClusterType, OrchestratorError>;

    /// Probe the control plane. Unreachable clusters yield `Err`, not an unhealthy status.
    async fn health_check(&self) -> Result<HealthStatus, OrchestratorError>;

    /// Control plane version string.
    async fn version(&self) -> Result<String, OrchestratorError>;

    /// Probe optional cluster features such as autoscaling and metrics.
    async fn cluster_capabilities(&self) -> Result<ClusterCapabilities, OrchestratorError>;

    /// Create the workload, or update it in place if it exists.
    async fn deploy_application(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentInfo, OrchestratorError>;

    async fn get_deployment(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DeploymentInfo>, OrchestratorError>;

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError>;

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;

    async fn restart_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;

    /// Revert to the previous spec, or to `revision` where the cluster keeps revisions.
    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<u64>,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;

    /// Remove the workload and everything attached to it. Absent workloads are not an error.
    async fn delete_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;

    async fn get_events(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<EventStream, OrchestratorError>;

    async fn get_metrics(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>, OrchestratorError>;

    /// Last `tail` log lines across the workload's tasks or pods.
    async fn get_logs(
        &self,
        name: &str,
        namespace: Option<&str>,
        tail: u32,
    ) -> Result<Vec<String>, OrchestratorError>;
}
