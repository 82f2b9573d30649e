// ABOUTME: Docker Swarm adapter built on bollard.
// ABOUTME: Maps workloads to replicated Swarm services; offers no optional capabilities.

use crate::orchestrator::error::{OrchestratorError, ignore_not_found};
use crate::orchestrator::traits::OrchestratorAdapter;
use crate::orchestrator::traits::sealed::Sealed;
use crate::orchestrator::types::{
    APP_LABEL, ClusterCapabilities, ClusterEvent, ClusterType, DeploymentInfo, DeploymentSpec,
    EventKind, EventStream, HealthDetails, HealthStatus, Replicas, ResourceMetrics, SWARM_NETWORK,
    WorkloadState,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    LocalNodeState, NetworkAttachmentConfig, NetworkCreateRequest, Service, ServiceSpec,
    ServiceSpecMode, ServiceSpecModeReplicated, ServiceSpecUpdateConfig,
    ServiceSpecUpdateConfigFailureActionEnum, ServiceSpecUpdateConfigOrderEnum, TaskSpec,
    TaskSpecContainerSpec, TaskState,
};
use bollard::query_parameters::{
    InspectNetworkOptions, InspectServiceOptions, ListServicesOptions, ListTasksOptions,
    LogsOptions, StatsOptions, UpdateServiceOptions,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;

/// Delay between task updates during a rolling update, in nanoseconds.
const UPDATE_DELAY_NS: i64 = 10_000_000_000;

/// Swarm adapter talking to one manager node's Docker Engine API.
pub struct SwarmAdapter {
    client: Docker,
    endpoint: String,
}

impl SwarmAdapter {
    pub fn new(client: Docker, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Connect to a Docker socket, local or forwarded from a remote manager.
    pub fn connect_socket(socket_path: &str) -> Result<Self, OrchestratorError> {
        let client = Docker::connect_with_unix(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| OrchestratorError::Connection(e.to_string()))?;
        Ok(Self::new(client, format!("unix://{}", socket_path)))
    }

    async fn inspect(&self, name: &str) -> Result<Service, OrchestratorError> {
        Ok(self
            .client
            .inspect_service(name, None::<InspectServiceOptions>)
            .await?)
    }

    /// Push a modified spec for an inspected service.
    async fn push_update(
        &self,
        name: &str,
        service: &Service,
        spec: ServiceSpec,
    ) -> Result<(), OrchestratorError> {
        let version = service
            .version
            .as_ref()
            .and_then(|v| v.index)
            .ok_or_else(|| OrchestratorError::Decode(format!("service {} has no version", name)))?;

        let opts = UpdateServiceOptions {
            version: version
                .try_into()
                .map_err(|_| OrchestratorError::Decode(format!("version {} out of range", version)))?,
            ..Default::default()
        };

        self.client.update_service(name, spec, opts, None).await?;
        Ok(())
    }

    async fn ensure_network(&self) -> Result<(), OrchestratorError> {
        match self
            .client
            .inspect_network(SWARM_NETWORK, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::info!(network = SWARM_NETWORK, "creating overlay network");
                let request = NetworkCreateRequest {
                    name: SWARM_NETWORK.to_string(),
                    driver: Some("overlay".to_string()),
                    attachable: Some(true),
                    ..Default::default()
                };
                match self.client.create_network(request).await {
                    Ok(_) => Ok(()),
                    // Lost a race with a concurrent deploy.
                    Err(bollard::errors::Error::DockerResponseServerError {
                        status_code: 409,
                        ..
                    }) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn tasks(
        &self,
        name: &str,
        running_only: bool,
    ) -> Result<Vec<bollard::models::Task>, OrchestratorError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("service".to_string(), vec![name.to_string()]);
        if running_only {
            filters.insert("desired-state".to_string(), vec!["running".to_string()]);
        }

        let opts = ListTasksOptions {
            filters: Some(filters),
            ..Default::default()
        };
        Ok(self.client.list_tasks(Some(opts)).await?)
    }

    /// Container ids of the running tasks of a service.
    async fn running_containers(&self, name: &str) -> Result<Vec<String>, OrchestratorError> {
        let tasks = self.tasks(name, true).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| task_state(t) == Some(TaskState::RUNNING))
            .filter_map(|t| {
                t.status
                    .and_then(|s| s.container_status)
                    .and_then(|c| c.container_id)
            })
            .collect())
    }

    async fn describe(&self, service: Service) -> Result<DeploymentInfo, OrchestratorError> {
        let spec = service.spec.clone().unwrap_or_default();
        let name = spec.name.clone().unwrap_or_default();

        let desired = spec
            .mode
            .as_ref()
            .and_then(|m| m.replicated.as_ref())
            .and_then(|r| r.replicas)
            .unwrap_or(0);
        let desired = u32::try_from(desired).unwrap_or(0);

        let tasks = self.tasks(&name, true).await?;
        let running = tasks
            .iter()
            .filter(|t| task_state(t) == Some(TaskState::RUNNING))
            .count() as u32;

        let updating = service
            .update_status
            .as_ref()
            .and_then(|u| u.state.as_ref())
            .map(|s| format!("{:?}", s).to_lowercase())
            .is_some_and(|s| s == "updating" || s == "rollback_started");

        let state = if updating {
            WorkloadState::Updating
        } else if desired == 0 {
            WorkloadState::Succeeded
        } else if running == desired {
            WorkloadState::Running
        } else if running > 0 {
            WorkloadState::Scaling
        } else {
            WorkloadState::Pending
        };

        Ok(DeploymentInfo {
            name,
            namespace: None,
            image: spec
                .task_template
                .and_then(|t| t.container_spec)
                .and_then(|c| c.image),
            state,
            replicas: Replicas {
                desired,
                ready: running,
                available: running,
            },
            created_at: service.created_at.map(|d| d.to_string()),
            updated_at: service.updated_at.map(|d| d.to_string()),
        })
    }
}

fn task_state(task: &bollard::models::Task) -> Option<TaskState> {
    task.status.as_ref().and_then(|s| s.state)
}

fn parse_timestamp(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build the Swarm service spec for a workload.
///
/// `current` is the spec of the existing service, if any. Its force-update
/// counter is bumped so the update always rolls tasks.
fn service_spec(spec: &DeploymentSpec, current: Option<&ServiceSpec>) -> ServiceSpec {
    let mut labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(APP_LABEL.to_string(), spec.name.to_string());

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let force_update = current
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.force_update)
        .map(|n| n + 1)
        .unwrap_or(0);

    ServiceSpec {
        name: Some(spec.name.to_string()),
        labels: Some(labels),
        task_template: Some(TaskSpec {
            container_spec: Some(TaskSpecContainerSpec {
                image: Some(spec.image.to_string()),
                env: if env.is_empty() { None } else { Some(env) },
                ..Default::default()
            }),
            networks: Some(vec![NetworkAttachmentConfig {
                target: Some(SWARM_NETWORK.to_string()),
                ..Default::default()
            }]),
            force_update: Some(force_update),
            ..Default::default()
        }),
        mode: Some(ServiceSpecMode {
            replicated: Some(ServiceSpecModeReplicated {
                replicas: Some(spec.replicas.into()),
            }),
            ..Default::default()
        }),
        update_config: Some(ServiceSpecUpdateConfig {
            parallelism: Some(1),
            delay: Some(UPDATE_DELAY_NS),
            failure_action: Some(ServiceSpecUpdateConfigFailureActionEnum::ROLLBACK),
            order: Some(ServiceSpecUpdateConfigOrderEnum::START_FIRST),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl Sealed for SwarmAdapter {}

#[async_trait]
impl OrchestratorAdapter for SwarmAdapter {
    async fn detect(&self) -> Result<ClusterType, OrchestratorError> {
        let info = self.client.info().await?;
        let state = info.swarm.and_then(|s| s.local_node_state);
        match state {
            Some(LocalNodeState::ACTIVE) => Ok(ClusterType::Swarm),
            other => Err(OrchestratorError::InvalidConfig(format!(
                "docker engine at {} is not an active swarm member (state: {:?})",
                self.endpoint, other
            ))),
        }
    }

    async fn health_check(&self) -> Result<HealthStatus, OrchestratorError> {
        let info = self.client.info().await?;
        let swarm = info.swarm.unwrap_or_default();
        let active = swarm.local_node_state == Some(LocalNodeState::ACTIVE);

        let details = HealthDetails {
            version: info.server_version,
            nodes: swarm.nodes.and_then(|n| u32::try_from(n).ok()),
            api_endpoint: Some(self.endpoint.clone()),
            last_check: Some(Utc::now()),
        };

        if active {
            Ok(HealthStatus::healthy("Docker Swarm is active", details))
        } else {
            Ok(HealthStatus {
                healthy: false,
                message: "Docker Swarm is not active on this node".to_string(),
                details,
            })
        }
    }

    async fn version(&self) -> Result<String, OrchestratorError> {
        let version = self.client.version().await?;
        Ok(version.version.unwrap_or_default())
    }

    async fn cluster_capabilities(&self) -> Result<ClusterCapabilities, OrchestratorError> {
        self.client.ping().await?;
        Ok(ClusterCapabilities::default())
    }

    async fn deploy_application(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentInfo, OrchestratorError> {
        self.ensure_network().await?;
        let name = spec.name.as_str();

        match self.inspect(name).await {
            Ok(existing) => {
                tracing::info!(service = name, image = %spec.image, "updating swarm service");
                let new_spec = service_spec(spec, existing.spec.as_ref());
                self.push_update(name, &existing, new_spec).await?;
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(service = name, image = %spec.image, "creating swarm service");
                self.client
                    .create_service(service_spec(spec, None), None)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let service = self.inspect(name).await?;
        self.describe(service).await
    }

    async fn get_deployment(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Option<DeploymentInfo>, OrchestratorError> {
        match self.inspect(name).await {
            Ok(service) => Ok(Some(self.describe(service).await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_deployments(
        &self,
        _namespace: Option<&str>,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("label".to_string(), vec![APP_LABEL.to_string()]);
        let opts = ListServicesOptions {
            filters: Some(filters),
            ..Default::default()
        };

        let services = self.client.list_services(Some(opts)).await?;
        let mut out = Vec::with_capacity(services.len());
        for service in services {
            out.push(self.describe(service).await?);
        }
        Ok(out)
    }

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        _namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let service = self.inspect(name).await?;
        let mut spec = service.spec.clone().unwrap_or_default();
        spec.mode = Some(ServiceSpecMode {
            replicated: Some(ServiceSpecModeReplicated {
                replicas: Some(replicas.into()),
            }),
            ..Default::default()
        });
        tracing::info!(service = name, replicas, "scaling swarm service");
        self.push_update(name, &service, spec).await
    }

    async fn restart_application(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let service = self.inspect(name).await?;
        let mut spec = service.spec.clone().unwrap_or_default();
        let mut template = spec.task_template.take().unwrap_or_default();
        template.force_update = Some(template.force_update.unwrap_or(0) + 1);
        spec.task_template = Some(template);
        tracing::info!(service = name, "restarting swarm service");
        self.push_update(name, &service, spec).await
    }

    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<u64>,
        _namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        if let Some(revision) = revision {
            tracing::debug!(
                service = name,
                revision,
                "swarm keeps only the previous spec, ignoring revision"
            );
        }
        let service = self.inspect(name).await?;
        let previous = service.previous_spec.clone().ok_or_else(|| {
            OrchestratorError::NotFound(format!("service {} has no previous spec", name))
        })?;
        tracing::info!(service = name, "rolling back swarm service");
        self.push_update(name, &service, previous).await
    }

    async fn delete_application(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        tracing::info!(service = name, "removing swarm service");
        ignore_not_found(
            self.client
                .delete_service(name)
                .await
                .map_err(OrchestratorError::from),
        )
    }

    async fn get_events(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<EventStream, OrchestratorError> {
        let tasks = self.tasks(name, false).await?;
        let events: Vec<ClusterEvent> = tasks
            .into_iter()
            .filter_map(|task| {
                let status = task.status?;
                let state = status.state?;
                let kind = match state {
                    TaskState::FAILED | TaskState::REJECTED => EventKind::Warning,
                    _ => EventKind::Normal,
                };
                let mut message = status.message.unwrap_or_default();
                if let Some(err) = status.err {
                    message = format!("{}: {}", message, err);
                }
                let seen = status.timestamp.map(|t| t.to_string()).and_then(parse_timestamp);
                Some(ClusterEvent {
                    kind,
                    reason: format!("{:?}", state).to_lowercase(),
                    message,
                    count: 1,
                    first_seen: seen,
                    last_seen: seen,
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn get_metrics(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>, OrchestratorError> {
        let Some(container) = self.running_containers(name).await?.into_iter().next() else {
            return Ok(None);
        };

        let opts = StatsOptions {
            stream: false,
            one_shot: true,
            ..Default::default()
        };
        let mut stream = self.client.stats(&container, Some(opts));
        let Some(stats) = stream.next().await else {
            return Ok(None);
        };
        let stats = stats?;

        let cpu = stats.cpu_stats.as_ref();
        let precpu = stats.precpu_stats.as_ref();
        let total = |s: Option<&bollard::models::ContainerCpuStats>| {
            s.and_then(|c| c.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0) as f64
        };
        let system = |s: Option<&bollard::models::ContainerCpuStats>| {
            s.and_then(|c| c.system_cpu_usage).unwrap_or(0) as f64
        };
        let cpu_delta = total(cpu) - total(precpu);
        let system_delta = system(cpu) - system(precpu);
        let online = cpu.and_then(|c| c.online_cpus).unwrap_or(1) as f64;
        let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
            cpu_delta / system_delta * online * 100.0
        } else {
            0.0
        };

        let memory = stats.memory_stats.as_ref();
        Ok(Some(ResourceMetrics {
            cpu_percent,
            memory_bytes: memory.and_then(|m| m.usage).unwrap_or(0),
            memory_limit_bytes: memory.and_then(|m| m.limit),
            sampled_at: Some(Utc::now()),
        }))
    }

    async fn get_logs(
        &self,
        name: &str,
        _namespace: Option<&str>,
        tail: u32,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut lines = Vec::new();
        for container in self.running_containers(name).await? {
            let opts = LogsOptions {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            };
            let mut stream = self.client.logs(&container, Some(opts));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(output) => {
                        let text = output.to_string();
                        lines.extend(text.lines().map(str::to_string));
                    }
                    Err(e) => {
                        // Tasks on other nodes are not reachable through this engine.
                        tracing::debug!(container = %container, "skipping task logs: {}", e);
                        break;
                    }
                }
            }
        }
        Ok(lines)
    }
}
