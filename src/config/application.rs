// ABOUTME: Application and compose stack entries of flotilla.yml.
// ABOUTME: Entries become target rows once environment references are resolved.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::env_value::EnvValue;
use crate::error::Result;
use crate::store::{Application, ComposeStack, PreviewSettings};
use crate::types::{AppName, ApplicationId, ComposeId, ImageRef, OrganizationId, ServerId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplicationConfig {
    /// Service name on the cluster; also the application id.
    pub name: AppName,
    pub image: ImageRef,
    /// Server id from `servers`; absent means the control node.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub preview: PreviewSettings,
}

fn default_replicas() -> u32 {
    1
}

impl ApplicationConfig {
    pub fn to_application(&self, organization: &OrganizationId) -> Result<Application> {
        Ok(Application {
            id: ApplicationId::new(self.name.as_str()),
            organization_id: organization.clone(),
            name: self.name.to_string(),
            app_name: self.name.clone(),
            server_id: self.server.as_deref().map(ServerId::new),
            image: self.image.clone(),
            env: EnvValue::resolve_all(&self.env)?,
            replicas: self.replicas,
            port: self.port,
            repository: self.repository.clone(),
            owner: self.owner.clone(),
            branch: self.branch.clone(),
            build_command: self.build_command.clone(),
            preview: self.preview.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComposeConfig {
    pub name: AppName,
    #[serde(default)]
    pub server: Option<String>,
    /// Command that deploys the stack, e.g. `docker stack deploy -c stack.yml web`.
    pub command: String,
}

impl ComposeConfig {
    pub fn to_compose(&self, organization: &OrganizationId) -> ComposeStack {
        ComposeStack {
            id: ComposeId::new(self.name.as_str()),
            organization_id: organization.clone(),
            app_name: self.name.clone(),
            server_id: self.server.as_deref().map(ServerId::new),
            command: self.command.clone(),
        }
    }
}
