// ABOUTME: In-memory orchestrator adapter.
// ABOUTME: Simulates a Swarm-like or Kubernetes-like cluster for tests and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::capabilities::{Capabilities, Orchestrator};
use super::config::DEFAULT_NAMESPACE;
use super::error::OrchestratorError;
use super::traits::sealed::Sealed;
use super::traits::{
    AutoscalingOps, CustomResourceOps, NamespaceOps, NetworkPolicyOps, OrchestratorAdapter,
};
use super::types::{
    ClusterCapabilities, ClusterEvent, ClusterType, CustomResource, DeploymentInfo,
    DeploymentSpec, EventKind, EventStream, HealthDetails, HealthStatus, HpaSpec, HpaStatus,
    NetworkPolicySpec, Replicas, ResourceMetrics, WorkloadState,
};

type Key = (String, String);

#[derive(Debug, Clone)]
struct Workload {
    spec: DeploymentSpec,
    history: Vec<DeploymentSpec>,
    replicas: u32,
    restarts: u32,
    events: Vec<ClusterEvent>,
}

#[derive(Debug, Default)]
struct ClusterState {
    workloads: BTreeMap<Key, Workload>,
    hpas: BTreeMap<Key, HpaSpec>,
    policies: BTreeMap<Key, NetworkPolicySpec>,
    custom: BTreeMap<(String, String, String), Value>,
    namespaces: BTreeSet<String>,
    failure: Option<String>,
}

/// Cluster simulated in process memory.
///
/// A Swarm-like instance has no namespaces and no optional capabilities; a
/// Kubernetes-like one offers all of them.
#[derive(Debug)]
pub struct MemoryCluster {
    cluster: ClusterType,
    state: Mutex<ClusterState>,
    health_delay: Option<Duration>,
    health_checks: AtomicUsize,
}

impl MemoryCluster {
    pub fn new(cluster: ClusterType) -> Self {
        let mut state = ClusterState::default();
        if cluster == ClusterType::Kubernetes {
            state.namespaces.insert("default".to_string());
            state.namespaces.insert(DEFAULT_NAMESPACE.to_string());
        }
        Self {
            cluster,
            state: Mutex::new(state),
            health_delay: None,
            health_checks: AtomicUsize::new(0),
        }
    }

    pub fn swarm() -> Self {
        Self::new(ClusterType::Swarm)
    }

    pub fn kubernetes() -> Self {
        Self::new(ClusterType::Kubernetes)
    }

    /// Make each health check take `delay`.
    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = Some(delay);
        self
    }

    /// Fail every following call with a connection error.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Wrap into an orchestrator handle with the capabilities this cluster type offers.
    pub fn into_orchestrator(self: Arc<Self>) -> Orchestrator {
        let capabilities = match self.cluster {
            ClusterType::Swarm => Capabilities::none(),
            ClusterType::Kubernetes => Capabilities::none()
                .with_autoscaling(self.clone())
                .with_network_policy(self.clone())
                .with_custom_resource(self.clone())
                .with_namespaces(self.clone()),
        };
        Orchestrator::new(self.cluster, self, capabilities)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// Current spec of a workload.
    pub fn workload(&self, name: &str) -> Option<DeploymentSpec> {
        let state = self.state.lock();
        state
            .workloads
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, w)| w.spec.clone())
    }

    pub fn replicas(&self, name: &str) -> Option<u32> {
        let state = self.state.lock();
        state
            .workloads
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, w)| w.replicas)
    }

    pub fn restarts(&self, name: &str) -> u32 {
        let state = self.state.lock();
        state
            .workloads
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, w)| w.restarts)
            .unwrap_or(0)
    }

    pub fn hpa(&self, target: &str) -> Option<HpaSpec> {
        let state = self.state.lock();
        state
            .hpas
            .iter()
            .find(|((_, n), _)| n == target)
            .map(|(_, h)| h.clone())
    }

    pub fn workload_count(&self) -> usize {
        self.state.lock().workloads.len()
    }

    fn key(&self, name: &str, namespace: Option<&str>) -> Key {
        let ns = match self.cluster {
            ClusterType::Swarm => String::new(),
            ClusterType::Kubernetes => namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
        };
        (ns, name.to_string())
    }

    fn check(&self) -> Result<(), OrchestratorError> {
        match &self.state.lock().failure {
            Some(message) => Err(OrchestratorError::Connection(message.clone())),
            None => Ok(()),
        }
    }

    fn not_found(name: &str) -> OrchestratorError {
        OrchestratorError::NotFound(format!("workload {}", name))
    }

    fn describe(&self, key: &Key, workload: &Workload) -> DeploymentInfo {
        DeploymentInfo {
            name: key.1.clone(),
            namespace: (!key.0.is_empty()).then(|| key.0.clone()),
            image: Some(workload.spec.image.to_string()),
            state: if workload.replicas == 0 {
                WorkloadState::Succeeded
            } else {
                WorkloadState::Running
            },
            replicas: Replicas {
                desired: workload.replicas,
                ready: workload.replicas,
                available: workload.replicas,
            },
            created_at: None,
            updated_at: Some(Utc::now().to_rfc3339()),
        }
    }

    fn event(reason: &str, message: String) -> ClusterEvent {
        let now = Utc::now();
        ClusterEvent {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            message,
            count: 1,
            first_seen: Some(now),
            last_seen: Some(now),
        }
    }
}

impl Sealed for MemoryCluster {}

#[async_trait]
impl OrchestratorAdapter for MemoryCluster {
    async fn detect(&self) -> Result<ClusterType, OrchestratorError> {
        self.check()?;
        Ok(self.cluster)
    }

    async fn health_check(&self) -> Result<HealthStatus, OrchestratorError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        let details = HealthDetails {
            version: Some("memory".to_string()),
            nodes: Some(1),
            api_endpoint: Some(format!("memory://{}", self.cluster)),
            last_check: Some(Utc::now()),
        };
        Ok(HealthStatus::healthy(
            format!("in-memory {} cluster", self.cluster),
            details,
        ))
    }

    async fn version(&self) -> Result<String, OrchestratorError> {
        self.check()?;
        Ok("memory".to_string())
    }

    async fn cluster_capabilities(&self) -> Result<ClusterCapabilities, OrchestratorError> {
        self.check()?;
        Ok(match self.cluster {
            ClusterType::Swarm => ClusterCapabilities::default(),
            ClusterType::Kubernetes => ClusterCapabilities {
                supports_hpa: true,
                supports_network_policies: true,
                metrics_server: true,
                ingress_controller: Some("memory".to_string()),
                storage_classes: vec!["standard".to_string()],
                pod_disruption_budgets: true,
            },
        })
    }

    async fn deploy_application(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentInfo, OrchestratorError> {
        self.check()?;
        let key = self.key(spec.name.as_str(), spec.namespace.as_deref());
        let mut state = self.state.lock();
        if self.cluster == ClusterType::Kubernetes {
            state.namespaces.insert(key.0.clone());
        }
        let message = format!("deployed {}", spec.image);
        let workload = state
            .workloads
            .entry(key.clone())
            .and_modify(|w| {
                let previous = std::mem::replace(&mut w.spec, spec.clone());
                w.history.push(previous);
                w.replicas = spec.replicas;
            })
            .or_insert_with(|| Workload {
                spec: spec.clone(),
                history: Vec::new(),
                replicas: spec.replicas,
                restarts: 0,
                events: Vec::new(),
            });
        workload.events.push(Self::event("Deployed", message));
        let workload = workload.clone();
        Ok(self.describe(&key, &workload))
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DeploymentInfo>, OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let state = self.state.lock();
        Ok(state.workloads.get(&key).map(|w| self.describe(&key, w)))
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
        self.check()?;
        let ns = self.key("", namespace).0;
        let state = self.state.lock();
        Ok(state
            .workloads
            .iter()
            .filter(|(k, _)| k.0 == ns)
            .map(|(k, w)| self.describe(k, w))
            .collect())
    }

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let mut state = self.state.lock();
        let workload = state
            .workloads
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(name))?;
        workload.replicas = replicas;
        workload
            .events
            .push(Self::event("Scaled", format!("scaled to {}", replicas)));
        Ok(())
    }

    async fn restart_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let mut state = self.state.lock();
        let workload = state
            .workloads
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(name))?;
        workload.restarts += 1;
        workload
            .events
            .push(Self::event("Restarted", "restart requested".to_string()));
        Ok(())
    }

    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<u64>,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let mut state = self.state.lock();
        let workload = state
            .workloads
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(name))?;

        // Revision n indexes the spec history from 1.
        let index = match revision {
            Some(r) => usize::try_from(r)
                .ok()
                .and_then(|r| r.checked_sub(1))
                .filter(|i| *i < workload.history.len()),
            None => workload.history.len().checked_sub(1),
        }
        .ok_or_else(|| OrchestratorError::NotFound(format!("no earlier revision of {}", name)))?;

        let target = workload.history[index].clone();
        let previous = std::mem::replace(&mut workload.spec, target);
        workload.history.push(previous);
        workload
            .events
            .push(Self::event("RolledBack", format!("rolled back to {}", workload.spec.image)));
        Ok(())
    }

    async fn delete_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let mut state = self.state.lock();
        state.workloads.remove(&key);
        state.hpas.remove(&key);
        state.policies.remove(&key);
        Ok(())
    }

    async fn get_events(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<EventStream, OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let events = self
            .state
            .lock()
            .workloads
            .get(&key)
            .map(|w| w.events.clone())
            .unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn get_metrics(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>, OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let state = self.state.lock();
        Ok(state.workloads.get(&key).map(|w| ResourceMetrics {
            cpu_percent: 0.0,
            memory_bytes: u64::from(w.replicas) * 64 * 1024 * 1024,
            memory_limit_bytes: None,
            sampled_at: Some(Utc::now()),
        }))
    }

    async fn get_logs(
        &self,
        name: &str,
        namespace: Option<&str>,
        tail: u32,
    ) -> Result<Vec<String>, OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        let state = self.state.lock();
        let Some(workload) = state.workloads.get(&key) else {
            return Ok(Vec::new());
        };
        let lines: Vec<String> = workload.events.iter().map(|e| e.message.clone()).collect();
        let skip = lines.len().saturating_sub(tail as usize);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl AutoscalingOps for MemoryCluster {
    async fn configure_hpa(&self, spec: &HpaSpec) -> Result<(), OrchestratorError> {
        self.check()?;
        if spec.min_replicas == 0 || spec.min_replicas > spec.max_replicas {
            return Err(OrchestratorError::InvalidConfig(format!(
                "autoscaler bounds {}..{} are invalid",
                spec.min_replicas, spec.max_replicas
            )));
        }
        let key = self.key(spec.target.as_str(), spec.namespace.as_deref());
        self.state.lock().hpas.insert(key, spec.clone());
        Ok(())
    }

    async fn delete_hpa(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(target, namespace);
        self.state.lock().hpas.remove(&key);
        Ok(())
    }

    async fn hpa_status(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<Option<HpaStatus>, OrchestratorError> {
        self.check()?;
        let key = self.key(target, namespace);
        let state = self.state.lock();
        let Some(hpa) = state.hpas.get(&key) else {
            return Ok(None);
        };
        let current = state
            .workloads
            .get(&key)
            .map(|w| w.replicas)
            .unwrap_or(hpa.min_replicas);
        let desired = current.clamp(hpa.min_replicas, hpa.max_replicas);
        Ok(Some(HpaStatus {
            current_replicas: current,
            desired_replicas: desired,
            ..Default::default()
        }))
    }
}

#[async_trait]
impl NetworkPolicyOps for MemoryCluster {
    async fn create_network_policy(
        &self,
        spec: &NetworkPolicySpec,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(&spec.name, spec.namespace.as_deref());
        self.state.lock().policies.insert(key, spec.clone());
        Ok(())
    }

    async fn delete_network_policy(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let key = self.key(name, namespace);
        self.state.lock().policies.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl CustomResourceOps for MemoryCluster {
    async fn create_custom_resource(
        &self,
        resource: &CustomResource,
    ) -> Result<Value, OrchestratorError> {
        self.check()?;
        let (ns, name) = self.key(&resource.name, resource.namespace.as_deref());
        let body = serde_json::json!({
            "apiVersion": resource.api_version,
            "kind": resource.kind,
            "metadata": { "name": name, "namespace": ns, "labels": resource.labels },
            "spec": resource.spec,
        });
        self.state
            .lock()
            .custom
            .insert((resource.kind.clone(), ns, name), body.clone());
        Ok(body)
    }

    async fn delete_custom_resource(
        &self,
        _api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.check()?;
        let (ns, name) = self.key(name, namespace);
        self.state.lock().custom.remove(&(kind.to_string(), ns, name));
        Ok(())
    }
}

#[async_trait]
impl NamespaceOps for MemoryCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<(), OrchestratorError> {
        self.check()?;
        self.state.lock().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, OrchestratorError> {
        self.check()?;
        Ok(self.state.lock().namespaces.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppName, ImageRef};

    fn spec(image: &str) -> DeploymentSpec {
        DeploymentSpec::new(AppName::new("api").unwrap(), ImageRef::parse(image).unwrap())
    }

    #[tokio::test]
    async fn redeploy_keeps_history_for_rollback() {
        let cluster = MemoryCluster::swarm();
        cluster.deploy_application(&spec("api:v1")).await.unwrap();
        cluster.deploy_application(&spec("api:v2")).await.unwrap();

        cluster.rollback_application("api", None, None).await.unwrap();
        assert_eq!(cluster.workload("api").unwrap().image.to_string(), "api:v1");
    }

    #[tokio::test]
    async fn failure_injection_surfaces_connection_errors() {
        let cluster = MemoryCluster::kubernetes();
        cluster.fail_with("network down");
        let err = cluster.health_check().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Connection(_)));
        cluster.recover();
        assert!(cluster.health_check().await.unwrap().healthy);
        assert_eq!(cluster.health_checks(), 2);
    }

    #[test]
    fn swarm_like_cluster_has_no_capabilities() {
        let orchestrator = Arc::new(MemoryCluster::swarm()).into_orchestrator();
        assert!(orchestrator.capabilities().supported().is_empty());
        let k8s = Arc::new(MemoryCluster::kubernetes()).into_orchestrator();
        assert_eq!(k8s.capabilities().supported().len(), 4);
    }
}
