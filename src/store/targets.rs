// ABOUTME: Deployable entities and the servers they run on.
// ABOUTME: Applications with preview settings, compose stacks, scheduled jobs, and servers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::records::TargetRef;
use crate::orchestrator::{ClusterCapabilities, OrchestratorConfig};
use crate::types::{
    AppName, ApplicationId, BackupId, ComposeId, ImageRef, OrganizationId, ScheduleId, ServerId,
    VolumeBackupId,
};

/// Wildcard used for preview hosts when an application sets none.
pub const DEFAULT_PREVIEW_WILDCARD: &str = "*.traefik.me";

/// Per-application preview deployment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of live previews for the application.
    #[serde(default = "default_preview_limit")]
    pub limit: usize,
    /// If non-empty, a pull request must carry one of these labels.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub wildcard_domain: Option<String>,
    #[serde(default = "default_preview_port")]
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    /// Extra environment for previews, layered over the application's.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_preview_limit() -> usize {
    3
}

fn default_preview_port() -> u16 {
    3000
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: default_preview_limit(),
            labels: Vec::new(),
            wildcard_domain: None,
            port: default_preview_port(),
            https: false,
            env: BTreeMap::new(),
        }
    }
}

impl PreviewSettings {
    pub fn wildcard(&self) -> &str {
        self.wildcard_domain
            .as_deref()
            .unwrap_or(DEFAULT_PREVIEW_WILDCARD)
    }

    /// Whether a pull request with `labels` passes the label filter.
    pub fn accepts_labels(&self, labels: &[String]) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| labels.contains(l))
    }
}

/// A single-image application.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: ApplicationId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub app_name: AppName,
    /// `None` deploys to the local cluster.
    pub server_id: Option<ServerId>,
    pub image: ImageRef,
    pub env: BTreeMap<String, String>,
    pub replicas: u32,
    pub port: Option<u16>,
    pub repository: Option<String>,
    pub owner: Option<String>,
    pub branch: Option<String>,
    /// Shell command that builds and pushes `image` before rollout.
    pub build_command: Option<String>,
    pub preview: PreviewSettings,
}

/// A multi-service stack deployed from a compose file.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeStack {
    pub id: ComposeId,
    pub organization_id: OrganizationId,
    pub app_name: AppName,
    pub server_id: Option<ServerId>,
    /// Command that deploys the stack on the server.
    pub command: String,
}

/// Entity whose deploys run one command on a server: schedules and backups.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTarget {
    pub app_name: AppName,
    pub server_id: Option<ServerId>,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
    pub trust_on_first_use: bool,
}

/// A machine hosting a cluster manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub ip: String,
    pub orchestrator: OrchestratorConfig,
    pub ssh: SshTarget,
    /// Last probed capabilities, if any.
    pub capabilities: Option<ClusterCapabilities>,
    /// Command run for server setup deploys.
    pub setup_command: Option<String>,
}

/// Full data of a deployment target.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTarget {
    Application(Application),
    Compose(ComposeStack),
    Server(Server),
    Schedule(ScheduleId, CommandTarget),
    Backup(BackupId, CommandTarget),
    VolumeBackup(VolumeBackupId, CommandTarget),
}

impl ResolvedTarget {
    pub fn target_ref(&self) -> TargetRef {
        match self {
            ResolvedTarget::Application(a) => TargetRef::Application(a.id.clone()),
            ResolvedTarget::Compose(c) => TargetRef::Compose(c.id.clone()),
            ResolvedTarget::Server(s) => TargetRef::Server(s.id.clone()),
            ResolvedTarget::Schedule(id, _) => TargetRef::Schedule(id.clone()),
            ResolvedTarget::Backup(id, _) => TargetRef::Backup(id.clone()),
            ResolvedTarget::VolumeBackup(id, _) => TargetRef::VolumeBackup(id.clone()),
        }
    }

    /// Name used for the log directory.
    pub fn app_name(&self) -> &str {
        match self {
            ResolvedTarget::Application(a) => a.app_name.as_str(),
            ResolvedTarget::Compose(c) => c.app_name.as_str(),
            ResolvedTarget::Server(s) => s.name.as_str(),
            ResolvedTarget::Schedule(_, t)
            | ResolvedTarget::Backup(_, t)
            | ResolvedTarget::VolumeBackup(_, t) => t.app_name.as_str(),
        }
    }

    /// Server the target lives on; `None` is the local machine.
    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            ResolvedTarget::Application(a) => a.server_id.as_ref(),
            ResolvedTarget::Compose(c) => c.server_id.as_ref(),
            ResolvedTarget::Server(s) => Some(&s.id),
            ResolvedTarget::Schedule(_, t)
            | ResolvedTarget::Backup(_, t)
            | ResolvedTarget::VolumeBackup(_, t) => t.server_id.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_label_filter_accepts_everything() {
        let settings = PreviewSettings::default();
        assert!(settings.accepts_labels(&[]));

        let settings = PreviewSettings {
            labels: vec!["preview".into()],
            ..Default::default()
        };
        assert!(!settings.accepts_labels(&["bug".into()]));
        assert!(settings.accepts_labels(&["bug".into(), "preview".into()]));
    }
}
