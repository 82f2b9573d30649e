// ABOUTME: Composable traits for orchestrator adapters.
// ABOUTME: One base trait plus optional AutoscalingOps, NetworkPolicyOps, CustomResourceOps, NamespaceOps.

mod adapter;
mod autoscaling;
mod custom_resource;
mod namespace;
mod network_policy;
pub(crate) mod sealed;

pub use adapter::OrchestratorAdapter;
pub use autoscaling::AutoscalingOps;
pub use custom_resource::CustomResourceOps;
pub use namespace::NamespaceOps;
pub use network_policy::NetworkPolicyOps;
