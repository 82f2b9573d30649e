// ABOUTME: Deployment, rollback, preview, and domain records.
// ABOUTME: Rows owned by the persistence layer and referenced by id elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::types::{
    AppName, ApplicationId, BackupId, ComposeId, DeploymentId, DomainId, ImageRef, PreviewId,
    RollbackId, ScheduleId, ServerId, VolumeBackupId,
};

/// Kind of entity a deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Application,
    Compose,
    Server,
    Schedule,
    Backup,
    VolumeBackup,
}

impl TargetKind {
    /// Kinds whose deploys roll out workloads and need an orchestrator.
    pub fn needs_orchestrator(self) -> bool {
        matches!(self, TargetKind::Application | TargetKind::Compose)
    }

    /// Kinds that only support plain deploys.
    pub fn supports_redeploy(self) -> bool {
        matches!(
            self,
            TargetKind::Application | TargetKind::Compose | TargetKind::Server
        )
    }

    /// Records kept per target after each job.
    pub fn retention(self) -> usize {
        match self {
            TargetKind::Server => 5,
            _ => 10,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::Application => "application",
            TargetKind::Compose => "compose",
            TargetKind::Server => "server",
            TargetKind::Schedule => "schedule",
            TargetKind::Backup => "backup",
            TargetKind::VolumeBackup => "volume-backup",
        };
        f.write_str(s)
    }
}

/// The entity a deployment is for. Exactly one id is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum TargetRef {
    Application(ApplicationId),
    Compose(ComposeId),
    Server(ServerId),
    Schedule(ScheduleId),
    Backup(BackupId),
    VolumeBackup(VolumeBackupId),
}

impl TargetRef {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetRef::Application(_) => TargetKind::Application,
            TargetRef::Compose(_) => TargetKind::Compose,
            TargetRef::Server(_) => TargetKind::Server,
            TargetRef::Schedule(_) => TargetKind::Schedule,
            TargetRef::Backup(_) => TargetKind::Backup,
            TargetRef::VolumeBackup(_) => TargetKind::VolumeBackup,
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            TargetRef::Application(id) => id.as_str(),
            TargetRef::Compose(id) => id.as_str(),
            TargetRef::Server(id) => id.as_str(),
            TargetRef::Schedule(id) => id.as_str(),
            TargetRef::Backup(id) => id.as_str(),
            TargetRef::VolumeBackup(id) => id.as_str(),
        }
    }

    /// Key under which jobs for this target are serialized.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.kind(), self.id_str())
    }

    pub fn application_id(&self) -> Option<&ApplicationId> {
        match self {
            TargetRef::Application(id) => Some(id),
            _ => None,
        }
    }

    pub fn schedule_id(&self) -> Option<&ScheduleId> {
        match self {
            TargetRef::Schedule(id) => Some(id),
            _ => None,
        }
    }

    pub fn backup_id(&self) -> Option<&BackupId> {
        match self {
            TargetRef::Backup(id) => Some(id),
            _ => None,
        }
    }

    pub fn volume_backup_id(&self) -> Option<&VolumeBackupId> {
        match self {
            TargetRef::VolumeBackup(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentIntent {
    #[default]
    Deploy,
    Redeploy,
}

impl fmt::Display for DeploymentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentIntent::Deploy => f.write_str("deploy"),
            DeploymentIntent::Redeploy => f.write_str("redeploy"),
        }
    }
}

/// Persisted status of a deployment record.
///
/// `Running` moves to `Done` or `Error` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Done,
    Error,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentStatus::Running)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Running => f.write_str("running"),
            DeploymentStatus::Done => f.write_str("done"),
            DeploymentStatus::Error => f.write_str("error"),
        }
    }
}

/// One deployment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub target: TargetRef,
    pub intent: DeploymentIntent,
    pub status: DeploymentStatus,
    pub title: String,
    pub description: Option<String>,
    pub log_path: PathBuf,
    pub process_id: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub rollback_id: Option<RollbackId>,
    pub preview_deployment_id: Option<PreviewId>,
    pub is_preview: bool,
}

/// Fields supplied when a worker claims a job.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub target: TargetRef,
    pub intent: DeploymentIntent,
    pub title: String,
    pub description: Option<String>,
    pub log_path: PathBuf,
    pub rollback_id: Option<RollbackId>,
    pub preview_deployment_id: Option<PreviewId>,
}

impl NewDeployment {
    pub fn into_record(self, id: DeploymentId, now: DateTime<Utc>) -> DeploymentRecord {
        DeploymentRecord {
            id,
            target: self.target,
            intent: self.intent,
            status: DeploymentStatus::Running,
            title: self.title,
            description: self.description,
            log_path: self.log_path,
            process_id: None,
            created_at: now,
            started_at: now,
            finished_at: None,
            error_message: None,
            rollback_id: self.rollback_id,
            is_preview: self.preview_deployment_id.is_some(),
            preview_deployment_id: self.preview_deployment_id,
        }
    }
}

/// Image and environment captured after a successful application deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: RollbackId,
    pub application_id: ApplicationId,
    pub deployment_id: DeploymentId,
    /// Per-application sequence number, starting at 1.
    pub version: u32,
    pub image: ImageRef,
    pub env: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRollback {
    pub application_id: ApplicationId,
    pub deployment_id: DeploymentId,
    pub image: ImageRef,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// Ephemeral environment for one pull request of one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewDeployment {
    pub id: PreviewId,
    pub application_id: ApplicationId,
    pub branch: String,
    pub pull_request_id: String,
    pub pull_request_number: String,
    pub pull_request_title: String,
    pub pull_request_url: String,
    pub status: PreviewStatus,
    pub app_name: AppName,
    pub domain_id: Option<DomainId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Preview to create when none exists for the pull request.
#[derive(Debug, Clone)]
pub struct NewPreview {
    pub application_id: ApplicationId,
    pub branch: String,
    pub pull_request_id: String,
    pub pull_request_number: String,
    pub pull_request_title: String,
    pub pull_request_url: String,
    pub app_name: AppName,
    pub domain: Option<NewDomain>,
}

/// Outcome of an atomic preview lookup-or-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewSlot {
    Existing(PreviewDeployment),
    Created(PreviewDeployment),
    /// The application already has `count` other previews.
    LimitReached { count: usize, limit: usize },
}

/// Routed host of a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub host: String,
    pub https: bool,
    pub port: u16,
    pub preview_deployment_id: Option<PreviewId>,
}

#[derive(Debug, Clone)]
pub struct NewDomain {
    pub host: String,
    pub https: bool,
    pub port: u16,
}
