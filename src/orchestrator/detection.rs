// ABOUTME: Builds adapters for a server and auto-detects which control plane it runs.
// ABOUTME: Kubernetes is preferred when configured and healthy, Swarm otherwise.

use async_trait::async_trait;
use std::sync::Arc;

use super::capabilities::{Capabilities, Orchestrator};
use super::config::OrchestratorConfig;
use super::error::OrchestratorError;
use super::kubernetes::KubernetesAdapter;
use super::swarm::SwarmAdapter;
use super::types::ClusterType;
use crate::ssh::{SessionPool, SshError};
use crate::store::Server;

/// Error while opening an adapter.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Opens an adapter of a known cluster type.
///
/// `server` is `None` for the control node itself.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server: Option<&Server>,
        cluster: ClusterType,
        config: &OrchestratorConfig,
    ) -> Result<Orchestrator, ConnectError>;
}

/// Connects to real clusters.
///
/// Remote Swarm managers are reached by forwarding their Docker socket over
/// the pooled SSH session. Kubernetes is reached directly over HTTPS.
#[derive(Debug)]
pub struct ClusterConnector {
    ssh: Arc<SessionPool>,
}

impl ClusterConnector {
    pub fn new(ssh: Arc<SessionPool>) -> Self {
        Self { ssh }
    }
}

#[async_trait]
impl Connector for ClusterConnector {
    async fn connect(
        &self,
        server: Option<&Server>,
        cluster: ClusterType,
        config: &OrchestratorConfig,
    ) -> Result<Orchestrator, ConnectError> {
        match cluster {
            ClusterType::Swarm => {
                let socket = config.swarm.socket_path();
                let adapter = match server {
                    Some(server) => {
                        let local = self.ssh.forward(&server.id, socket).await?;
                        SwarmAdapter::connect_socket(&local.to_string_lossy())?
                    }
                    None => SwarmAdapter::connect_socket(socket)?,
                };
                Ok(Orchestrator::new(
                    ClusterType::Swarm,
                    Arc::new(adapter),
                    Capabilities::none(),
                ))
            }
            ClusterType::Kubernetes => {
                let connection = config.kubernetes.clone().unwrap_or_default();
                let adapter = Arc::new(KubernetesAdapter::connect(&connection)?);
                let capabilities = Capabilities::none()
                    .with_autoscaling(adapter.clone())
                    .with_network_policy(adapter.clone())
                    .with_custom_resource(adapter.clone())
                    .with_namespaces(adapter.clone());
                Ok(Orchestrator::new(
                    ClusterType::Kubernetes,
                    adapter,
                    capabilities,
                ))
            }
        }
    }
}

/// Probe which control plane a server runs and return an adapter for it.
///
/// Detection order:
/// 1. Kubernetes, when a connection is configured and the API reports healthy
/// 2. Swarm, when the Docker Engine reports an active Swarm
/// 3. Swarm regardless, so standalone Docker hosts still get an adapter
pub async fn detect(
    connector: &dyn Connector,
    server: Option<&Server>,
    config: &OrchestratorConfig,
) -> Result<Orchestrator, ConnectError> {
    let label = server.map(|s| s.id.as_str()).unwrap_or("local");

    if config.has_kubernetes_connection() {
        match connector
            .connect(server, ClusterType::Kubernetes, config)
            .await
        {
            Ok(orchestrator) => match orchestrator.health_check().await {
                Ok(health) if health.healthy => {
                    tracing::info!(server = label, "detected Kubernetes");
                    return Ok(orchestrator);
                }
                Ok(health) => {
                    tracing::debug!(server = label, "Kubernetes unhealthy: {}", health.message)
                }
                Err(e) => tracing::debug!(server = label, "Kubernetes health check failed: {}", e),
            },
            Err(e) => tracing::debug!(server = label, "cannot connect to Kubernetes: {}", e),
        }
    }

    let swarm = connector.connect(server, ClusterType::Swarm, config).await?;
    match swarm.health_check().await {
        Ok(health) if health.healthy => tracing::info!(server = label, "detected Docker Swarm"),
        Ok(health) => tracing::warn!(
            server = label,
            "no healthy orchestrator found, defaulting to Swarm: {}",
            health.message
        ),
        Err(e) => tracing::warn!(
            server = label,
            "no healthy orchestrator found, defaulting to Swarm: {}",
            e
        ),
    }
    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::config::{ClusterSelection, KubernetesConnection};
    use crate::orchestrator::memory::MemoryCluster;

    struct Fixed {
        swarm: Arc<MemoryCluster>,
        kubernetes: Arc<MemoryCluster>,
    }

    #[async_trait]
    impl Connector for Fixed {
        async fn connect(
            &self,
            _server: Option<&Server>,
            cluster: ClusterType,
            _config: &OrchestratorConfig,
        ) -> Result<Orchestrator, ConnectError> {
            Ok(match cluster {
                ClusterType::Swarm => self.swarm.clone().into_orchestrator(),
                ClusterType::Kubernetes => self.kubernetes.clone().into_orchestrator(),
            })
        }
    }

    fn auto_with_kubernetes() -> OrchestratorConfig {
        OrchestratorConfig {
            cluster: ClusterSelection::Auto,
            kubernetes: Some(KubernetesConnection {
                api_endpoint: Some("https://k8s.internal:6443".into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prefers_healthy_kubernetes() {
        let connector = Fixed {
            swarm: Arc::new(MemoryCluster::swarm()),
            kubernetes: Arc::new(MemoryCluster::kubernetes()),
        };
        let found = detect(&connector, None, &auto_with_kubernetes())
            .await
            .unwrap();
        assert_eq!(found.cluster_type(), ClusterType::Kubernetes);
    }

    #[tokio::test]
    async fn falls_back_to_swarm_when_kubernetes_is_down() {
        let kubernetes = Arc::new(MemoryCluster::kubernetes());
        kubernetes.fail_with("connection refused");
        let connector = Fixed {
            swarm: Arc::new(MemoryCluster::swarm()),
            kubernetes,
        };
        let found = detect(&connector, None, &auto_with_kubernetes())
            .await
            .unwrap();
        assert_eq!(found.cluster_type(), ClusterType::Swarm);
    }

    #[tokio::test]
    async fn skips_kubernetes_without_connection_settings() {
        let kubernetes = Arc::new(MemoryCluster::kubernetes());
        let connector = Fixed {
            swarm: Arc::new(MemoryCluster::swarm()),
            kubernetes: kubernetes.clone(),
        };
        let found = detect(&connector, None, &OrchestratorConfig::default())
            .await
            .unwrap();
        assert_eq!(found.cluster_type(), ClusterType::Swarm);
        assert_eq!(kubernetes.health_checks(), 0);
    }

    #[tokio::test]
    async fn unhealthy_swarm_is_still_the_default() {
        let swarm = Arc::new(MemoryCluster::swarm());
        swarm.fail_with("swarm not initialized");
        let connector = Fixed {
            swarm,
            kubernetes: Arc::new(MemoryCluster::kubernetes()),
        };
        let found = detect(&connector, None, &OrchestratorConfig::default())
            .await
            .unwrap();
        assert_eq!(found.cluster_type(), ClusterType::Swarm);
    }
}
