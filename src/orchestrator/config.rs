// ABOUTME: Per-server orchestrator connection settings.
// ABOUTME: Selects Swarm, Kubernetes, or auto-detection and carries connection parameters.

use serde::{Deserialize, Serialize};

use super::types::ClusterType;

/// Default namespace for workloads on Kubernetes.
pub const DEFAULT_NAMESPACE: &str = "flotilla";

/// Docker Engine socket on a Swarm manager.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Which control plane a server is driven through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterSelection {
    /// Probe the server and remember the result.
    #[default]
    Auto,
    Swarm,
    Kubernetes,
}

impl From<ClusterType> for ClusterSelection {
    fn from(value: ClusterType) -> Self {
        match value {
            ClusterType::Swarm => ClusterSelection::Swarm,
            ClusterType::Kubernetes => ClusterSelection::Kubernetes,
        }
    }
}

/// Orchestrator settings embedded in a server row.
///
/// Any change to this value must be followed by clearing the factory cache
/// entry for the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub cluster: ClusterSelection,
    #[serde(default)]
    pub swarm: SwarmConnection,
    #[serde(default)]
    pub kubernetes: Option<KubernetesConnection>,
}

impl OrchestratorConfig {
    pub fn swarm() -> Self {
        Self {
            cluster: ClusterSelection::Swarm,
            ..Default::default()
        }
    }

    pub fn kubernetes(connection: KubernetesConnection) -> Self {
        Self {
            cluster: ClusterSelection::Kubernetes,
            kubernetes: Some(connection),
            ..Default::default()
        }
    }

    pub fn with_cluster(mut self, cluster: ClusterSelection) -> Self {
        self.cluster = cluster;
        self
    }

    /// Whether enough is configured to attempt a Kubernetes connection.
    pub fn has_kubernetes_connection(&self) -> bool {
        self.kubernetes.as_ref().is_some_and(|k| {
            k.in_cluster || k.kubeconfig.is_some() || k.api_endpoint.is_some()
        })
    }

    /// Namespace used when callers pass none.
    pub fn namespace(&self) -> &str {
        self.kubernetes
            .as_ref()
            .map(|k| k.namespace.as_str())
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwarmConnection {
    /// Docker socket path on the manager node.
    #[serde(default)]
    pub socket: Option<String>,
}

impl SwarmConnection {
    pub fn socket_path(&self) -> &str {
        self.socket.as_deref().unwrap_or(DOCKER_SOCKET)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KubernetesConnection {
    /// Use the pod's service account.
    #[serde(default)]
    pub in_cluster: bool,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// Kubeconfig as a file path, raw YAML, or base64-encoded YAML.
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub insecure: bool,
}

impl Default for KubernetesConnection {
    fn default() -> Self {
        Self {
            in_cluster: false,
            api_endpoint: None,
            kubeconfig: None,
            context: None,
            token: None,
            namespace: default_namespace(),
            insecure: false,
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
