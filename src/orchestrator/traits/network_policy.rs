// ABOUTME: Optional network policy capability.
// ABOUTME: Pod-level traffic rules for clusters that enforce them.

use super::sealed::Sealed;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::types::NetworkPolicySpec;
use async_trait::async_trait;

#[async_trait]
pub trait NetworkPolicyOps: Sealed + Send + Sync {
    /// Create or replace a policy.
    async fn create_network_policy(
        &self,
        spec: &NetworkPolicySpec,
    ) -> Result<(), OrchestratorError>;

    async fn delete_network_policy(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError>;
}
