// ABOUTME: Minimal Kubernetes REST client over reqwest.
// ABOUTME: JSON verbs against API paths with bearer or client-certificate auth.

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::kubeconfig::ResolvedCluster;
use crate::orchestrator::error::OrchestratorError;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Authenticated client for one API server.
#[derive(Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("base", &self.base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl KubeClient {
    pub fn new(cluster: &ResolvedCluster) -> Result<Self, OrchestratorError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(cluster.insecure);

        if let Some(ca) = &cluster.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca).map_err(|e| {
                OrchestratorError::InvalidConfig(format!("invalid cluster CA: {}", e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(pem) = &cluster.identity_pem {
            let identity = reqwest::Identity::from_pem(pem).map_err(|e| {
                OrchestratorError::InvalidConfig(format!("invalid client certificate: {}", e))
            })?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            base: cluster.server.trim_end_matches('/').to_string(),
            token: cluster.token.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, OrchestratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(OrchestratorError::from_status(status.as_u16(), message))
    }

    pub async fn get(&self, path: &str) -> Result<Value, OrchestratorError> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// GET that maps 404 to `None`.
    pub async fn get_opt(&self, path: &str) -> Result<Option<Value>, OrchestratorError> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    /// Whether an API group/version is served.
    pub async fn has_api(&self, path: &str) -> Result<bool, OrchestratorError> {
        Ok(self.get_opt(path).await?.is_some())
    }

    pub async fn get_text(&self, path: &str) -> Result<String, OrchestratorError> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(Self::check(response).await?.text().await?)
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, OrchestratorError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, OrchestratorError> {
        let response = self.request(Method::PUT, path).json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn merge_patch(&self, path: &str, body: &Value) -> Result<Value, OrchestratorError> {
        let response = self
            .request(Method::PATCH, path)
            .header(reqwest::header::CONTENT_TYPE, MERGE_PATCH)
            .body(body.to_string())
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), OrchestratorError> {
        let response = self.request(Method::DELETE, path).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Create, or replace the existing object keeping its resourceVersion.
    pub async fn apply(
        &self,
        collection: &str,
        name: &str,
        mut body: Value,
    ) -> Result<Value, OrchestratorError> {
        let item = format!("{}/{}", collection, name);
        match self.get_opt(&item).await? {
            Some(existing) => {
                if let Some(version) = existing.pointer("/metadata/resourceVersion").cloned()
                    && let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut)
                {
                    metadata.insert("resourceVersion".to_string(), version);
                }
                self.put(&item, &body).await
            }
            None => self.post(collection, &body).await,
        }
    }
}

/// Namespaced API path: `{prefix}/namespaces/{ns}/{resource}`.
pub fn namespaced(prefix: &str, namespace: &str, resource: &str) -> String {
    format!(
        "{}/namespaces/{}/{}",
        prefix,
        urlencoding::encode(namespace),
        resource
    )
}

/// API prefix for an `apiVersion` (`v1` → `/api/v1`, `group/v1` → `/apis/group/v1`).
pub fn api_prefix(api_version: &str) -> String {
    if api_version.contains('/') {
        format!("/apis/{}", api_version)
    } else {
        format!("/api/{}", api_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_and_group_prefixes() {
        assert_eq!(api_prefix("v1"), "/api/v1");
        assert_eq!(api_prefix("cert-manager.io/v1"), "/apis/cert-manager.io/v1");
    }

    #[test]
    fn namespaced_paths() {
        assert_eq!(
            namespaced("/apis/apps/v1", "flotilla", "deployments"),
            "/apis/apps/v1/namespaces/flotilla/deployments"
        );
    }
}
