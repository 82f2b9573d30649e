// ABOUTME: Data types shared by all orchestrator adapters.
// ABOUTME: Cluster-neutral shapes for health, workloads, events, metrics, and capability specs.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

use crate::types::{AppName, ImageRef};

/// Network every Swarm service managed by flotilla is attached to.
pub const SWARM_NETWORK: &str = "flotilla-network";

/// Label carrying the app name on managed workloads.
pub const APP_LABEL: &str = "flotilla.app";

/// The cluster control plane behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Swarm,
    Kubernetes,
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterType::Swarm => write!(f, "swarm"),
            ClusterType::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Result of an adapter health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub details: HealthDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthDetails {
    pub version: Option<String>,
    pub nodes: Option<u32>,
    pub api_endpoint: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>, details: HealthDetails) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            details,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: HealthDetails {
                last_check: Some(Utc::now()),
                ..Default::default()
            },
        }
    }
}

/// Desired state of a workload handed to `deploy_application`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    pub name: AppName,
    pub image: ImageRef,
    pub replicas: u32,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub port: Option<u16>,
    pub namespace: Option<String>,
}

impl DeploymentSpec {
    pub fn new(name: AppName, image: ImageRef) -> Self {
        Self {
            name,
            image,
            replicas: 1,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            port: None,
            namespace: None,
        }
    }
}

/// Lifecycle state of a workload as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Updating,
    Scaling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replicas {
    pub desired: u32,
    pub ready: u32,
    pub available: u32,
}

/// Observed state of a workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub state: WorkloadState,
    pub replicas: Replicas,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A cluster event concerning a workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    pub count: u32,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Bounded, single-pass sequence of events.
pub type EventStream = Pin<Box<dyn Stream<Item = ClusterEvent> + Send>>;

/// Point-in-time resource usage of a workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// CPU usage in percent of one core.
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: Option<u64>,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Horizontal autoscaler definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpaSpec {
    pub target: AppName,
    pub namespace: Option<String>,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_percent: Option<u32>,
    pub target_memory_percent: Option<u32>,
    #[serde(default)]
    pub behavior: Option<HpaBehavior>,
}

impl HpaSpec {
    /// Name of the autoscaler object for a workload.
    pub fn object_name(target: &str) -> String {
        format!("{}-hpa", target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpaBehavior {
    pub scale_down: ScalingRules,
    pub scale_up: ScalingRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRules {
    pub stabilization_window_seconds: u32,
    pub percent: u32,
    pub period_seconds: u32,
}

impl Default for HpaBehavior {
    /// Scale down slowly and scale up immediately.
    fn default() -> Self {
        Self {
            scale_down: ScalingRules {
                stabilization_window_seconds: 300,
                percent: 50,
                period_seconds: 60,
            },
            scale_up: ScalingRules {
                stabilization_window_seconds: 0,
                percent: 100,
                period_seconds: 15,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HpaStatus {
    pub current_replicas: u32,
    pub desired_replicas: u32,
    pub current_cpu_percent: Option<u32>,
    pub current_memory_percent: Option<u32>,
    pub last_scale_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

/// Peer selector in a network policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolicyPeer {
    Pods(BTreeMap<String, String>),
    Namespace(BTreeMap<String, String>),
    Cidr { cidr: String, except: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub peers: Vec<PolicyPeer>,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicySpec {
    pub name: String,
    pub namespace: Option<String>,
    pub pod_selector: BTreeMap<String, String>,
    pub policy_types: Vec<PolicyType>,
    #[serde(default)]
    pub ingress: Vec<PolicyRule>,
    #[serde(default)]
    pub egress: Vec<PolicyRule>,
}

/// Arbitrary custom resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: serde_json::Value,
}

impl CustomResource {
    /// REST plural of a kind: lowercase kind plus "s".
    pub fn plural(kind: &str) -> String {
        format!("{}s", kind.to_lowercase())
    }
}

/// Capabilities probed on a live cluster, persisted on the server row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCapabilities {
    pub supports_hpa: bool,
    pub supports_network_policies: bool,
    pub metrics_server: bool,
    pub ingress_controller: Option<String>,
    pub storage_classes: Vec<String>,
    pub pod_disruption_budgets: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_behavior_scales_down_conservatively() {
        let behavior = HpaBehavior::default();
        assert_eq!(behavior.scale_down.stabilization_window_seconds, 300);
        assert_eq!(behavior.scale_down.percent, 50);
        assert_eq!(behavior.scale_up.period_seconds, 15);
    }

    #[test]
    fn custom_resource_plural_is_lowercase() {
        assert_eq!(CustomResource::plural("Certificate"), "certificates");
    }
}
