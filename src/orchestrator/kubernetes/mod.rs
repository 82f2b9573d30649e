// ABOUTME: Kubernetes adapter over the REST API.
// ABOUTME: Deployments and Services for workloads, plus HPA, NetworkPolicy, custom resources, namespaces.

mod client;
mod kubeconfig;
mod manifests;

pub use client::KubeClient;
pub use kubeconfig::{ResolvedCluster, resolve};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::orchestrator::config::KubernetesConnection;
use crate::orchestrator::error::{OrchestratorError, ignore_not_found};
use crate::orchestrator::traits::sealed::Sealed;
use crate::orchestrator::traits::{
    AutoscalingOps, CustomResourceOps, NamespaceOps, NetworkPolicyOps, OrchestratorAdapter,
};
use crate::orchestrator::types::{
    ClusterCapabilities, ClusterType, CustomResource, DeploymentInfo, DeploymentSpec, EventStream,
    HealthDetails, HealthStatus, HpaSpec, HpaStatus, NetworkPolicySpec, ResourceMetrics,
};
use client::{api_prefix, namespaced};

const APPS: &str = "/apis/apps/v1";
const CORE: &str = "/api/v1";
const AUTOSCALING: &str = "/apis/autoscaling/v2";
const NETWORKING: &str = "/apis/networking.k8s.io/v1";
const METRICS: &str = "/apis/metrics.k8s.io/v1beta1";
const STORAGE: &str = "/apis/storage.k8s.io/v1";
const POLICY: &str = "/apis/policy/v1";

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Adapter for one Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubernetesAdapter {
    client: KubeClient,
    namespace: String,
}

impl KubernetesAdapter {
    pub fn new(client: KubeClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Resolve credentials and open a client.
    pub fn connect(connection: &KubernetesConnection) -> Result<Self, OrchestratorError> {
        let resolved = resolve(connection)?;
        let client = KubeClient::new(&resolved)?;
        Ok(Self::new(client, connection.namespace.clone()))
    }

    pub fn default_namespace(&self) -> &str {
        &self.namespace
    }

    fn ns<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.namespace)
    }

    fn deployments(&self, ns: &str) -> String {
        namespaced(APPS, ns, "deployments")
    }

    fn selector(name: &str) -> String {
        urlencoding::encode(&format!("{}={}", manifests::SELECTOR_LABEL, name)).into_owned()
    }

    async fn pods(&self, name: &str, ns: &str) -> Result<Vec<String>, OrchestratorError> {
        let path = format!(
            "{}?labelSelector={}",
            namespaced(CORE, ns, "pods"),
            Self::selector(name)
        );
        let list = self.client.get(&path).await?;
        Ok(items(&list)
            .iter()
            .filter_map(|p| p.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

fn items(list: &Value) -> Vec<Value> {
    list.get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn revision_of(object: &Value) -> Option<u64> {
    object
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(Value::as_str)
        .and_then(|r| r.parse().ok())
}

impl Sealed for KubernetesAdapter {}

#[async_trait]
impl OrchestratorAdapter for KubernetesAdapter {
    async fn detect(&self) -> Result<ClusterType, OrchestratorError> {
        self.client.get("/version").await?;
        Ok(ClusterType::Kubernetes)
    }

    async fn health_check(&self) -> Result<HealthStatus, OrchestratorError> {
        let version = self.version().await?;
        let nodes = match self.client.get(&format!("{}/nodes", CORE)).await {
            Ok(list) => u32::try_from(items(&list).len()).ok(),
            Err(e) => {
                tracing::debug!("cannot list nodes: {}", e);
                None
            }
        };
        let details = HealthDetails {
            version: Some(version),
            nodes,
            api_endpoint: Some(self.client.endpoint().to_string()),
            last_check: Some(Utc::now()),
        };
        Ok(HealthStatus::healthy("Kubernetes API is reachable", details))
    }

    async fn version(&self) -> Result<String, OrchestratorError> {
        let version = self.client.get("/version").await?;
        Ok(version
            .get("gitVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn cluster_capabilities(&self) -> Result<ClusterCapabilities, OrchestratorError> {
        let supports_hpa = self.client.has_api(AUTOSCALING).await?;
        let supports_network_policies = self.client.has_api(NETWORKING).await?;
        let metrics_server = self.client.has_api(METRICS).await?;
        let pod_disruption_budgets = self.client.has_api(POLICY).await?;

        let ingress_controller = match self
            .client
            .get_opt(&format!("{}/ingressclasses", NETWORKING))
            .await?
        {
            Some(list) => items(&list)
                .iter()
                .find_map(|c| c.pointer("/metadata/name").and_then(Value::as_str))
                .map(str::to_string),
            None => None,
        };

        let storage_classes = match self
            .client
            .get_opt(&format!("{}/storageclasses", STORAGE))
            .await?
        {
            Some(list) => items(&list)
                .iter()
                .filter_map(|c| c.pointer("/metadata/name").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        Ok(ClusterCapabilities {
            supports_hpa,
            supports_network_policies,
            metrics_server,
            ingress_controller,
            storage_classes,
            pod_disruption_budgets,
        })
    }

    async fn deploy_application(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentInfo, OrchestratorError> {
        let ns = self.ns(spec.namespace.as_deref()).to_string();
        let name = spec.name.as_str();
        self.ensure_namespace(&ns).await?;

        tracing::info!(deployment = name, namespace = %ns, image = %spec.image, "applying deployment");
        let applied = self
            .client
            .apply(&self.deployments(&ns), name, manifests::deployment(spec, &ns))
            .await?;

        if let Some(port) = spec.port {
            self.client
                .apply(
                    &namespaced(CORE, &ns, "services"),
                    name,
                    manifests::service(name, &ns, port),
                )
                .await?;
        }

        Ok(manifests::parse_deployment(&applied))
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DeploymentInfo>, OrchestratorError> {
        let path = format!("{}/{}", self.deployments(self.ns(namespace)), name);
        Ok(self
            .client
            .get_opt(&path)
            .await?
            .map(|d| manifests::parse_deployment(&d)))
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
        let list = self.client.get(&self.deployments(self.ns(namespace))).await?;
        Ok(items(&list).iter().map(manifests::parse_deployment).collect())
    }

    async fn scale_application(
        &self,
        name: &str,
        replicas: u32,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let path = format!("{}/{}", self.deployments(self.ns(namespace)), name);
        tracing::info!(deployment = name, replicas, "scaling deployment");
        self.client
            .merge_patch(&path, &json!({ "spec": { "replicas": replicas } }))
            .await?;
        Ok(())
    }

    async fn restart_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let path = format!("{}/{}", self.deployments(self.ns(namespace)), name);
        let patch = json!({
            "spec": { "template": { "metadata": { "annotations": {
                RESTARTED_AT_ANNOTATION: Utc::now().to_rfc3339()
            } } } }
        });
        tracing::info!(deployment = name, "restarting deployment");
        self.client.merge_patch(&path, &patch).await?;
        Ok(())
    }

    async fn rollback_application(
        &self,
        name: &str,
        revision: Option<u64>,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let ns = self.ns(namespace);
        let path = format!("{}/{}", self.deployments(ns), name);
        let deployment = self.client.get(&path).await?;
        let current = revision_of(&deployment).unwrap_or(0);

        let sets = self
            .client
            .get(&format!(
                "{}?labelSelector={}",
                namespaced(APPS, ns, "replicasets"),
                Self::selector(name)
            ))
            .await?;
        let sets = items(&sets);

        let target = match revision {
            Some(wanted) => sets.iter().find(|rs| revision_of(rs) == Some(wanted)),
            None => sets
                .iter()
                .filter(|rs| revision_of(rs).is_some_and(|r| r < current))
                .max_by_key(|rs| revision_of(rs)),
        }
        .ok_or_else(|| {
            OrchestratorError::NotFound(format!("no earlier revision of deployment {}", name))
        })?;

        let mut template = target
            .pointer("/spec/template")
            .cloned()
            .ok_or_else(|| OrchestratorError::Decode("replica set has no template".to_string()))?;
        if let Some(labels) = template
            .pointer_mut("/metadata/labels")
            .and_then(Value::as_object_mut)
        {
            labels.remove("pod-template-hash");
        }

        tracing::info!(
            deployment = name,
            revision = revision_of(target),
            "rolling back deployment"
        );
        self.client
            .merge_patch(&path, &json!({ "spec": { "template": template } }))
            .await?;
        Ok(())
    }

    async fn delete_application(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let ns = self.ns(namespace);
        tracing::info!(deployment = name, namespace = ns, "deleting workload");

        let hpa = HpaSpec::object_name(name);
        let attached = [
            format!("{}/{}", namespaced(AUTOSCALING, ns, "horizontalpodautoscalers"), hpa),
            format!("{}/{}", namespaced(CORE, ns, "services"), name),
            format!("{}/{}", namespaced(NETWORKING, ns, "ingresses"), name),
            format!("{}/{}", namespaced(NETWORKING, ns, "networkpolicies"), name),
            format!("{}/{}", self.deployments(ns), name),
        ];
        for path in attached {
            ignore_not_found(self.client.delete(&path).await)?;
        }
        Ok(())
    }

    async fn get_events(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<EventStream, OrchestratorError> {
        let list = self
            .client
            .get(&namespaced(CORE, self.ns(namespace), "events"))
            .await?;
        let events: Vec<_> = items(&list)
            .iter()
            .filter(|e| {
                e.pointer("/involvedObject/name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n == name || n.starts_with(&format!("{}-", name)))
            })
            .map(manifests::parse_event)
            .collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn get_metrics(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ResourceMetrics>, OrchestratorError> {
        let path = format!(
            "{}?labelSelector={}",
            namespaced(METRICS, self.ns(namespace), "pods"),
            Self::selector(name)
        );
        let Some(list) = self.client.get_opt(&path).await? else {
            return Ok(None);
        };
        let pods = items(&list);
        if pods.is_empty() {
            return Ok(None);
        }

        let mut cores = 0.0;
        let mut memory = 0;
        for pod in &pods {
            let containers = pod
                .get("containers")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for container in containers {
                if let Some(cpu) = container.pointer("/usage/cpu").and_then(Value::as_str) {
                    cores += manifests::parse_cpu(cpu);
                }
                if let Some(mem) = container.pointer("/usage/memory").and_then(Value::as_str) {
                    memory += manifests::parse_memory(mem);
                }
            }
        }

        Ok(Some(ResourceMetrics {
            cpu_percent: cores * 100.0,
            memory_bytes: memory,
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
        let ns = self.ns(namespace);
        let mut lines = Vec::new();
        for pod in self.pods(name, ns).await? {
            let path = format!(
                "{}/{}/log?tailLines={}",
                namespaced(CORE, ns, "pods"),
                pod,
                tail
            );
            match self.client.get_text(&path).await {
                Ok(text) => lines.extend(text.lines().map(str::to_string)),
                Err(e) => tracing::debug!(pod = %pod, "skipping pod logs: {}", e),
            }
        }
        Ok(lines)
    }
}

#[async_trait]
impl AutoscalingOps for KubernetesAdapter {
    async fn configure_hpa(&self, spec: &HpaSpec) -> Result<(), OrchestratorError> {
        if spec.min_replicas == 0 || spec.min_replicas > spec.max_replicas {
            return Err(OrchestratorError::InvalidConfig(format!(
                "autoscaler bounds {}..{} are invalid",
                spec.min_replicas, spec.max_replicas
            )));
        }
        let ns = self.ns(spec.namespace.as_deref());
        let name = HpaSpec::object_name(spec.target.as_str());
        tracing::info!(hpa = %name, namespace = ns, "configuring autoscaler");
        self.client
            .apply(
                &namespaced(AUTOSCALING, ns, "horizontalpodautoscalers"),
                &name,
                manifests::hpa(spec, ns),
            )
            .await?;
        Ok(())
    }

    async fn delete_hpa(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let path = format!(
            "{}/{}",
            namespaced(AUTOSCALING, self.ns(namespace), "horizontalpodautoscalers"),
            HpaSpec::object_name(target)
        );
        ignore_not_found(self.client.delete(&path).await)
    }

    async fn hpa_status(
        &self,
        target: &str,
        namespace: Option<&str>,
    ) -> Result<Option<HpaStatus>, OrchestratorError> {
        let path = format!(
            "{}/{}",
            namespaced(AUTOSCALING, self.ns(namespace), "horizontalpodautoscalers"),
            HpaSpec::object_name(target)
        );
        Ok(self
            .client
            .get_opt(&path)
            .await?
            .map(|h| manifests::parse_hpa_status(&h)))
    }
}

#[async_trait]
impl NetworkPolicyOps for KubernetesAdapter {
    async fn create_network_policy(
        &self,
        spec: &NetworkPolicySpec,
    ) -> Result<(), OrchestratorError> {
        let ns = self.ns(spec.namespace.as_deref());
        tracing::info!(policy = %spec.name, namespace = ns, "applying network policy");
        self.client
            .apply(
                &namespaced(NETWORKING, ns, "networkpolicies"),
                &spec.name,
                manifests::network_policy(spec, ns),
            )
            .await?;
        Ok(())
    }

    async fn delete_network_policy(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let path = format!(
            "{}/{}",
            namespaced(NETWORKING, self.ns(namespace), "networkpolicies"),
            name
        );
        ignore_not_found(self.client.delete(&path).await)
    }
}

#[async_trait]
impl CustomResourceOps for KubernetesAdapter {
    async fn create_custom_resource(
        &self,
        resource: &CustomResource,
    ) -> Result<Value, OrchestratorError> {
        let ns = self.ns(resource.namespace.as_deref());
        let collection = namespaced(
            &api_prefix(&resource.api_version),
            ns,
            &CustomResource::plural(&resource.kind),
        );
        tracing::info!(kind = %resource.kind, name = %resource.name, "creating custom resource");
        self.client
            .apply(&collection, &resource.name, manifests::custom_resource(resource, ns))
            .await
    }

    async fn delete_custom_resource(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let path = format!(
            "{}/{}",
            namespaced(
                &api_prefix(api_version),
                self.ns(namespace),
                &CustomResource::plural(kind)
            ),
            name
        );
        ignore_not_found(self.client.delete(&path).await)
    }
}

#[async_trait]
impl NamespaceOps for KubernetesAdapter {
    async fn ensure_namespace(&self, name: &str) -> Result<(), OrchestratorError> {
        let path = format!("{}/namespaces/{}", CORE, urlencoding::encode(name));
        if self.client.get_opt(&path).await?.is_some() {
            return Ok(());
        }
        match self
            .client
            .post(&format!("{}/namespaces", CORE), &manifests::namespace(name))
            .await
        {
            Ok(_) => Ok(()),
            Err(OrchestratorError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, OrchestratorError> {
        let list = self.client.get(&format!("{}/namespaces", CORE)).await?;
        Ok(items(&list)
            .iter()
            .filter_map(|n| n.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
