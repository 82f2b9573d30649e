// ABOUTME: Cluster-agnostic workload operations over Docker Swarm and Kubernetes.
// ABOUTME: Adapters, their capability descriptors, auto-detection, and the per-server factory.

mod capabilities;
mod config;
mod detection;
mod error;
mod factory;
pub mod kubernetes;
mod memory;
mod swarm;
mod traits;
mod types;

pub use capabilities::{Capabilities, Capability, Orchestrator};
pub use config::{
    ClusterSelection, DEFAULT_NAMESPACE, DOCKER_SOCKET, KubernetesConnection, OrchestratorConfig,
    SwarmConnection,
};
pub use detection::{ClusterConnector, ConnectError, Connector, detect};
pub use error::{OrchestratorError, OrchestratorErrorKind, ignore_not_found};
pub use factory::{FactoryError, FactoryErrorKind, OrchestratorFactory};
pub use kubernetes::KubernetesAdapter;
pub use memory::MemoryCluster;
pub use swarm::SwarmAdapter;
pub use traits::{
    AutoscalingOps, CustomResourceOps, NamespaceOps, NetworkPolicyOps, OrchestratorAdapter,
};
pub use types::{
    APP_LABEL, ClusterCapabilities, ClusterEvent, ClusterType, CustomResource, DeploymentInfo,
    DeploymentSpec, EventKind, EventStream, HealthDetails, HealthStatus, HpaBehavior, HpaSpec,
    HpaStatus, NetworkPolicySpec, PolicyPeer, PolicyRule, PolicyType, Replicas, ResourceMetrics,
    SWARM_NETWORK, ScalingRules, WorkloadState,
};
