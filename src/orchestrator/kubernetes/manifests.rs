// ABOUTME: Kubernetes object manifests and response parsing.
// ABOUTME: Builds Deployment, Service, HPA, and NetworkPolicy bodies and reads them back.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::orchestrator::types::{
    APP_LABEL, ClusterEvent, CustomResource, DeploymentInfo, DeploymentSpec, EventKind, HpaBehavior,
    HpaSpec, HpaStatus, NetworkPolicySpec, PolicyPeer, PolicyRule, PolicyType, Replicas,
    ScalingRules, WorkloadState,
};

/// Label used to select a workload's pods.
pub const SELECTOR_LABEL: &str = "app";

pub fn deployment(spec: &DeploymentSpec, namespace: &str) -> Value {
    let name = spec.name.as_str();
    let mut labels = serde_json::Map::new();
    for (k, v) in &spec.labels {
        labels.insert(k.clone(), json!(v));
    }
    labels.insert(SELECTOR_LABEL.to_string(), json!(name));
    labels.insert(APP_LABEL.to_string(), json!(name));

    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(k, v)| json!({ "name": k, "value": v }))
        .collect();

    let mut container = json!({
        "name": name,
        "image": spec.image.to_string(),
        "env": env,
    });
    if let Some(port) = spec.port {
        container["ports"] = json!([{ "containerPort": port }]);
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace, "labels": labels },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { SELECTOR_LABEL: name } },
            "strategy": {
                "type": "RollingUpdate",
                "rollingUpdate": { "maxSurge": 1, "maxUnavailable": 0 }
            },
            "template": {
                "metadata": { "labels": labels },
                "spec": { "containers": [container] }
            }
        }
    })
}

pub fn service(name: &str, namespace: &str, port: u16) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace, "labels": { APP_LABEL: name } },
        "spec": {
            "selector": { SELECTOR_LABEL: name },
            "ports": [{ "port": port, "targetPort": port, "protocol": "TCP" }]
        }
    })
}

fn scaling_rules(rules: &ScalingRules) -> Value {
    json!({
        "stabilizationWindowSeconds": rules.stabilization_window_seconds,
        "policies": [{
            "type": "Percent",
            "value": rules.percent,
            "periodSeconds": rules.period_seconds
        }]
    })
}

pub fn hpa(spec: &HpaSpec, namespace: &str) -> Value {
    let target = spec.target.as_str();
    let mut metrics = Vec::new();
    if let Some(cpu) = spec.target_cpu_percent {
        metrics.push(json!({
            "type": "Resource",
            "resource": { "name": "cpu", "target": { "type": "Utilization", "averageUtilization": cpu } }
        }));
    }
    if let Some(memory) = spec.target_memory_percent {
        metrics.push(json!({
            "type": "Resource",
            "resource": { "name": "memory", "target": { "type": "Utilization", "averageUtilization": memory } }
        }));
    }
    let behavior = spec.behavior.clone().unwrap_or_default();

    json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": { "name": HpaSpec::object_name(target), "namespace": namespace },
        "spec": {
            "scaleTargetRef": { "apiVersion": "apps/v1", "kind": "Deployment", "name": target },
            "minReplicas": spec.min_replicas,
            "maxReplicas": spec.max_replicas,
            "metrics": metrics,
            "behavior": behavior_json(&behavior)
        }
    })
}

fn behavior_json(behavior: &HpaBehavior) -> Value {
    json!({
        "scaleDown": scaling_rules(&behavior.scale_down),
        "scaleUp": scaling_rules(&behavior.scale_up)
    })
}

fn peer(peer: &PolicyPeer) -> Value {
    match peer {
        PolicyPeer::Pods(labels) => json!({ "podSelector": { "matchLabels": labels } }),
        PolicyPeer::Namespace(labels) => {
            json!({ "namespaceSelector": { "matchLabels": labels } })
        }
        PolicyPeer::Cidr { cidr, except } => {
            json!({ "ipBlock": { "cidr": cidr, "except": except } })
        }
    }
}

fn rule(rule: &PolicyRule, direction: &str) -> Value {
    let peers: Vec<Value> = rule.peers.iter().map(peer).collect();
    let ports: Vec<Value> = rule
        .ports
        .iter()
        .map(|p| json!({ "protocol": "TCP", "port": p }))
        .collect();
    json!({ direction: peers, "ports": ports })
}

pub fn network_policy(spec: &NetworkPolicySpec, namespace: &str) -> Value {
    let types: Vec<&str> = spec
        .policy_types
        .iter()
        .map(|t| match t {
            PolicyType::Ingress => "Ingress",
            PolicyType::Egress => "Egress",
        })
        .collect();

    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": { "name": spec.name, "namespace": namespace },
        "spec": {
            "podSelector": { "matchLabels": spec.pod_selector },
            "policyTypes": types,
            "ingress": spec.ingress.iter().map(|r| rule(r, "from")).collect::<Vec<_>>(),
            "egress": spec.egress.iter().map(|r| rule(r, "to")).collect::<Vec<_>>()
        }
    })
}

pub fn custom_resource(resource: &CustomResource, namespace: &str) -> Value {
    json!({
        "apiVersion": resource.api_version,
        "kind": resource.kind,
        "metadata": { "name": resource.name, "namespace": namespace, "labels": resource.labels },
        "spec": resource.spec
    })
}

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    })
}

fn u32_at(value: &Value, pointer: &str) -> u32 {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn time_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_deployment(value: &Value) -> DeploymentInfo {
    let replicas = Replicas {
        desired: u32_at(value, "/spec/replicas"),
        ready: u32_at(value, "/status/readyReplicas"),
        available: u32_at(value, "/status/availableReplicas"),
    };
    let updated = u32_at(value, "/status/updatedReplicas");

    let failed = value
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Progressing")
                    && c.get("status").and_then(Value::as_str) == Some("False")
            })
        });

    let state = if failed {
        WorkloadState::Failed
    } else if replicas.desired == 0 {
        WorkloadState::Succeeded
    } else if updated < replicas.desired {
        WorkloadState::Updating
    } else if replicas.available == replicas.desired {
        WorkloadState::Running
    } else if replicas.available > 0 {
        WorkloadState::Scaling
    } else {
        WorkloadState::Pending
    };

    DeploymentInfo {
        name: str_at(value, "/metadata/name").unwrap_or_default(),
        namespace: str_at(value, "/metadata/namespace"),
        image: str_at(value, "/spec/template/spec/containers/0/image"),
        state,
        replicas,
        created_at: str_at(value, "/metadata/creationTimestamp"),
        updated_at: None,
    }
}

pub fn parse_event(value: &Value) -> ClusterEvent {
    let kind = match value.get("type").and_then(Value::as_str) {
        Some("Warning") => EventKind::Warning,
        _ => EventKind::Normal,
    };
    ClusterEvent {
        kind,
        reason: str_at(value, "/reason").unwrap_or_default(),
        message: str_at(value, "/message").unwrap_or_default(),
        count: u32_at(value, "/count").max(1),
        first_seen: time_at(value, "/firstTimestamp"),
        last_seen: time_at(value, "/lastTimestamp"),
    }
}

pub fn parse_hpa_status(value: &Value) -> HpaStatus {
    let mut status = HpaStatus {
        current_replicas: u32_at(value, "/status/currentReplicas"),
        desired_replicas: u32_at(value, "/status/desiredReplicas"),
        last_scale_time: str_at(value, "/status/lastScaleTime"),
        ..Default::default()
    };

    let metrics = value
        .pointer("/status/currentMetrics")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for metric in metrics {
        let utilization = metric
            .pointer("/resource/current/averageUtilization")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        match metric.pointer("/resource/name").and_then(Value::as_str) {
            Some("cpu") => status.current_cpu_percent = utilization,
            Some("memory") => status.current_memory_percent = utilization,
            _ => {}
        }
    }
    status
}

/// Parse a Kubernetes CPU quantity (`250m`, `1`, `1500000n`) into cores.
pub fn parse_cpu(quantity: &str) -> f64 {
    let q = quantity.trim();
    if let Some(n) = q.strip_suffix('n') {
        n.parse::<f64>().unwrap_or(0.0) / 1e9
    } else if let Some(u) = q.strip_suffix('u') {
        u.parse::<f64>().unwrap_or(0.0) / 1e6
    } else if let Some(m) = q.strip_suffix('m') {
        m.parse::<f64>().unwrap_or(0.0) / 1e3
    } else {
        q.parse::<f64>().unwrap_or(0.0)
    }
}

/// Parse a Kubernetes memory quantity (`128Mi`, `1Gi`, `1000Ki`, `512`) into bytes.
pub fn parse_memory(quantity: &str) -> u64 {
    let q = quantity.trim();
    let units: [(&str, u64); 6] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
    ];
    for (suffix, factor) in units {
        if let Some(n) = q.strip_suffix(suffix) {
            return n.parse::<u64>().unwrap_or(0) * factor;
        }
    }
    q.parse::<u64>().unwrap_or(0)
}
