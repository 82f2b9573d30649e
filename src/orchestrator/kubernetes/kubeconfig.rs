// ABOUTME: Kubeconfig and in-cluster credential resolution.
// ABOUTME: Accepts kubeconfig as a path, raw YAML, or base64 and picks one context.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::path::Path;

use crate::orchestrator::config::KubernetesConnection;
use crate::orchestrator::error::OrchestratorError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

/// Everything needed to open an HTTPS client to one API server.
#[derive(Debug, Clone)]
pub struct ResolvedCluster {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate followed by its key, PEM encoded.
    pub identity_pem: Option<Vec<u8>>,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub insecure: bool,
}

/// Resolve connection settings into credentials.
///
/// An explicit `api_endpoint` or `token` overrides what the kubeconfig says.
pub fn resolve(connection: &KubernetesConnection) -> Result<ResolvedCluster, OrchestratorError> {
    let mut resolved = if connection.in_cluster {
        in_cluster()?
    } else if let Some(raw) = &connection.kubeconfig {
        let yaml = load_kubeconfig_text(raw)?;
        from_kubeconfig(&yaml, connection.context.as_deref())?
    } else if let Some(endpoint) = &connection.api_endpoint {
        ResolvedCluster {
            server: endpoint.clone(),
            ca_pem: None,
            identity_pem: None,
            token: None,
            namespace: None,
            insecure: connection.insecure,
        }
    } else {
        return Err(OrchestratorError::InvalidConfig(
            "kubernetes connection needs in_cluster, kubeconfig, or api_endpoint".to_string(),
        ));
    };

    if let Some(endpoint) = &connection.api_endpoint {
        resolved.server = endpoint.clone();
    }
    if connection.token.is_some() {
        resolved.token = connection.token.clone();
    }
    resolved.insecure |= connection.insecure;
    Ok(resolved)
}

/// Turn the configured value into kubeconfig YAML.
fn load_kubeconfig_text(raw: &str) -> Result<String, OrchestratorError> {
    let trimmed = raw.trim();
    if trimmed.contains("clusters:") || trimmed.starts_with("apiVersion") {
        return Ok(trimmed.to_string());
    }

    let path = Path::new(trimmed);
    if path.is_file() {
        return std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidConfig(format!("cannot read kubeconfig {}: {}", trimmed, e))
        });
    }

    let decoded = STANDARD.decode(trimmed).map_err(|_| {
        OrchestratorError::InvalidConfig(
            "kubeconfig is neither YAML, a readable file, nor base64".to_string(),
        )
    })?;
    String::from_utf8(decoded)
        .map_err(|_| OrchestratorError::InvalidConfig("kubeconfig is not UTF-8".to_string()))
}

fn decode_data(field: &str, value: &str) -> Result<Vec<u8>, OrchestratorError> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| OrchestratorError::InvalidConfig(format!("invalid {}: {}", field, e)))
}

fn from_kubeconfig(yaml: &str, context: Option<&str>) -> Result<ResolvedCluster, OrchestratorError> {
    let config: Kubeconfig = serde_yaml::from_str(yaml)
        .map_err(|e| OrchestratorError::InvalidConfig(format!("invalid kubeconfig: {}", e)))?;

    let context_name = context
        .map(str::to_string)
        .or_else(|| config.current_context.clone())
        .or_else(|| config.contexts.first().map(|c| c.name.clone()))
        .ok_or_else(|| OrchestratorError::InvalidConfig("kubeconfig has no context".to_string()))?;

    let context = config
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!("context {} not in kubeconfig", context_name))
        })?;

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!(
                "cluster {} not in kubeconfig",
                context.context.cluster
            ))
        })?;

    let user = context
        .context
        .user
        .as_ref()
        .and_then(|name| config.users.iter().find(|u| &u.name == name));

    let ca_pem = cluster
        .cluster
        .certificate_authority_data
        .as_deref()
        .map(|d| decode_data("certificate-authority-data", d))
        .transpose()?;

    let identity_pem = match user.map(|u| &u.user) {
        Some(UserEntry {
            client_certificate_data: Some(cert),
            client_key_data: Some(key),
            ..
        }) => {
            let mut pem = decode_data("client-certificate-data", cert)?;
            pem.push(b'\n');
            pem.extend(decode_data("client-key-data", key)?);
            Some(pem)
        }
        _ => None,
    };

    Ok(ResolvedCluster {
        server: cluster.cluster.server.clone(),
        ca_pem,
        identity_pem,
        token: user.and_then(|u| u.user.token.clone()),
        namespace: context.context.namespace.clone(),
        insecure: cluster.cluster.insecure_skip_tls_verify,
    })
}

fn in_cluster() -> Result<ResolvedCluster, OrchestratorError> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
        OrchestratorError::InvalidConfig("KUBERNETES_SERVICE_HOST is not set".to_string())
    })?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

    let dir = Path::new(SERVICE_ACCOUNT_DIR);
    let token = std::fs::read_to_string(dir.join("token")).map_err(|e| {
        OrchestratorError::InvalidConfig(format!("cannot read service account token: {}", e))
    })?;
    let ca_pem = std::fs::read(dir.join("ca.crt")).ok();
    let namespace = std::fs::read_to_string(dir.join("namespace"))
        .ok()
        .map(|n| n.trim().to_string());

    Ok(ResolvedCluster {
        server: format!("https://{}:{}", host, port),
        ca_pem,
        identity_pem: None,
        token: Some(token.trim().to_string()),
        namespace,
        insecure: false,
    })
}
