// ABOUTME: Capability descriptor returned alongside every adapter.
// ABOUTME: Callers ask the handle for an optional capability instead of branching on cluster type.

use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::error::OrchestratorError;
use super::traits::{
    AutoscalingOps, CustomResourceOps, NamespaceOps, NetworkPolicyOps, OrchestratorAdapter,
};
use super::types::ClusterType;

/// Optional operation groups an adapter may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Autoscaling,
    NetworkPolicy,
    CustomResource,
    Namespaces,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Autoscaling,
        Capability::NetworkPolicy,
        Capability::CustomResource,
        Capability::Namespaces,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Autoscaling => write!(f, "horizontal autoscaling"),
            Capability::NetworkPolicy => write!(f, "network policies"),
            Capability::CustomResource => write!(f, "custom resources"),
            Capability::Namespaces => write!(f, "namespaces"),
        }
    }
}

/// Handles to the optional operation groups of one adapter.
#[derive(Clone, Default)]
pub struct Capabilities {
    autoscaling: Option<Arc<dyn AutoscalingOps>>,
    network_policy: Option<Arc<dyn NetworkPolicyOps>>,
    custom_resource: Option<Arc<dyn CustomResourceOps>>,
    namespaces: Option<Arc<dyn NamespaceOps>>,
}

impl Capabilities {
    /// No optional capabilities.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_autoscaling(mut self, ops: Arc<dyn AutoscalingOps>) -> Self {
        self.autoscaling = Some(ops);
        self
    }

    pub fn with_network_policy(mut self, ops: Arc<dyn NetworkPolicyOps>) -> Self {
        self.network_policy = Some(ops);
        self
    }

    pub fn with_custom_resource(mut self, ops: Arc<dyn CustomResourceOps>) -> Self {
        self.custom_resource = Some(ops);
        self
    }

    pub fn with_namespaces(mut self, ops: Arc<dyn NamespaceOps>) -> Self {
        self.namespaces = Some(ops);
        self
    }

    /// The one capability query.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Autoscaling => self.autoscaling.is_some(),
            Capability::NetworkPolicy => self.network_policy.is_some(),
            Capability::CustomResource => self.custom_resource.is_some(),
            Capability::Namespaces => self.namespaces.is_some(),
        }
    }

    pub fn supported(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.supported()).finish()
    }
}

/// An adapter plus its capability descriptor.
///
/// Cloning is cheap and shares the underlying connection. Derefs to the base
/// adapter so base operations need no unwrapping.
#[derive(Clone)]
pub struct Orchestrator {
    cluster: ClusterType,
    adapter: Arc<dyn OrchestratorAdapter>,
    capabilities: Capabilities,
}

impl Orchestrator {
    pub fn new(
        cluster: ClusterType,
        adapter: Arc<dyn OrchestratorAdapter>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            cluster,
            adapter,
            capabilities,
        }
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster
    }

    pub fn adapter(&self) -> &dyn OrchestratorAdapter {
        self.adapter.as_ref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }

    pub fn autoscaling(&self) -> Result<&dyn AutoscalingOps, OrchestratorError> {
        self.capabilities
            .autoscaling
            .as_deref()
            .ok_or(OrchestratorError::UnsupportedCapability(Capability::Autoscaling))
    }

    pub fn network_policies(&self) -> Result<&dyn NetworkPolicyOps, OrchestratorError> {
        self.capabilities
            .network_policy
            .as_deref()
            .ok_or(OrchestratorError::UnsupportedCapability(
                Capability::NetworkPolicy,
            ))
    }

    pub fn custom_resources(&self) -> Result<&dyn CustomResourceOps, OrchestratorError> {
        self.capabilities
            .custom_resource
            .as_deref()
            .ok_or(OrchestratorError::UnsupportedCapability(
                Capability::CustomResource,
            ))
    }

    pub fn namespaces(&self) -> Result<&dyn NamespaceOps, OrchestratorError> {
        self.capabilities
            .namespaces
            .as_deref()
            .ok_or(OrchestratorError::UnsupportedCapability(Capability::Namespaces))
    }

    /// Whether two handles share one adapter instance.
    pub fn same_instance(&self, other: &Orchestrator) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.adapter), Arc::as_ptr(&other.adapter))
    }
}

impl Deref for Orchestrator {
    type Target = dyn OrchestratorAdapter;

    fn deref(&self) -> &Self::Target {
        self.adapter.as_ref()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cluster", &self.cluster)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
