// ABOUTME: In-memory implementation of every persistence trait.
// ABOUTME: One mutex guards all tables so multi-row steps are atomic.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::error::{StoreError, StoreResult};
use super::records::{
    DeploymentRecord, DeploymentStatus, Domain, NewDeployment, NewPreview, NewRollback,
    PreviewDeployment, PreviewSlot, PreviewStatus, RollbackRecord, TargetRef,
};
use super::targets::{Application, CommandTarget, ComposeStack, ResolvedTarget, Server};
use super::{DeploymentStore, PreviewStore, RollbackStore, TargetStore};
use crate::orchestrator::{ClusterCapabilities, ClusterSelection, ClusterType};
use crate::types::{
    ApplicationId, BackupId, ComposeId, DeploymentId, DomainId, ImageRef, OrganizationId,
    PreviewId, RollbackId, ScheduleId, ServerId, VolumeBackupId,
};

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order; newest last.
    deployments: Vec<DeploymentRecord>,
    rollbacks: BTreeMap<RollbackId, RollbackRecord>,
    previews: BTreeMap<PreviewId, PreviewDeployment>,
    domains: BTreeMap<DomainId, Domain>,
    applications: BTreeMap<ApplicationId, Application>,
    composes: BTreeMap<ComposeId, ComposeStack>,
    servers: BTreeMap<ServerId, Server>,
    schedules: BTreeMap<ScheduleId, CommandTarget>,
    backups: BTreeMap<BackupId, CommandTarget>,
    volume_backups: BTreeMap<VolumeBackupId, CommandTarget>,
}

impl Tables {
    fn deployment_mut(&mut self, id: &DeploymentId) -> StoreResult<&mut DeploymentRecord> {
        self.deployments
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StoreError::not_found("deployment", id))
    }

    fn remove_preview_cascade(&mut self, id: &PreviewId) {
        if let Some(preview) = self.previews.remove(id)
            && let Some(domain) = preview.domain_id
        {
            self.domains.remove(&domain);
        }
        self.deployments
            .retain(|d| d.preview_deployment_id.as_ref() != Some(id));
    }
}

/// Process-local store.
///
/// Suitable for tests and single-node runs; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_application(&self, application: Application) {
        self.tables
            .lock()
            .applications
            .insert(application.id.clone(), application);
    }

    pub fn insert_compose(&self, compose: ComposeStack) {
        self.tables.lock().composes.insert(compose.id.clone(), compose);
    }

    pub fn insert_server(&self, server: Server) {
        self.tables.lock().servers.insert(server.id.clone(), server);
    }

    pub fn insert_schedule(&self, id: ScheduleId, target: CommandTarget) {
        self.tables.lock().schedules.insert(id, target);
    }

    pub fn insert_backup(&self, id: BackupId, target: CommandTarget) {
        self.tables.lock().backups.insert(id, target);
    }

    pub fn insert_volume_backup(&self, id: VolumeBackupId, target: CommandTarget) {
        self.tables.lock().volume_backups.insert(id, target);
    }

    /// Every deployment record, oldest first.
    pub fn all_deployments(&self) -> Vec<DeploymentRecord> {
        self.tables.lock().deployments.clone()
    }

    pub fn all_previews(&self) -> Vec<PreviewDeployment> {
        self.tables.lock().previews.values().cloned().collect()
    }

    pub fn domain_count(&self) -> usize {
        self.tables.lock().domains.len()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create_deployment(&self, new: NewDeployment) -> StoreResult<DeploymentRecord> {
        let record = new.into_record(DeploymentId::generate(), Utc::now());
        self.tables.lock().deployments.push(record.clone());
        Ok(record)
    }

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>> {
        let tables = self.tables.lock();
        Ok(tables.deployments.iter().find(|d| &d.id == id).cloned())
    }

    async fn set_process_id(&self, id: &DeploymentId, pid: u32) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let record = tables.deployment_mut(id)?;
        if record.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "deployment {} already finished",
                id
            )));
        }
        record.process_id = Some(pid);
        Ok(())
    }

    async fn finish_deployment(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> StoreResult<DeploymentRecord> {
        let mut tables = self.tables.lock();
        let record = tables.deployment_mut(id)?;
        if record.status.is_terminal() || !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        record.error_message = error_message;
        record.finished_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn list_deployments(
        &self,
        target: &TargetRef,
        preview: Option<&PreviewId>,
    ) -> StoreResult<Vec<DeploymentRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .deployments
            .iter()
            .rev()
            .filter(|d| &d.target == target && d.preview_deployment_id.as_ref() == preview)
            .cloned()
            .collect())
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let before = tables.deployments.len();
        tables.deployments.retain(|d| &d.id != id);
        if tables.deployments.len() == before {
            return Err(StoreError::not_found("deployment", id));
        }
        Ok(())
    }
}

#[async_trait]
impl RollbackStore for MemoryStore {
    async fn create_rollback(&self, new: NewRollback) -> StoreResult<RollbackRecord> {
        let mut tables = self.tables.lock();
        let version = tables
            .rollbacks
            .values()
            .filter(|r| r.application_id == new.application_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;
        let record = RollbackRecord {
            id: RollbackId::generate(),
            application_id: new.application_id,
            deployment_id: new.deployment_id,
            version,
            image: new.image,
            env: new.env,
            created_at: Utc::now(),
        };
        tables.rollbacks.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_rollback(&self, id: &RollbackId) -> StoreResult<Option<RollbackRecord>> {
        Ok(self.tables.lock().rollbacks.get(id).cloned())
    }

    async fn list_rollbacks(
        &self,
        application: &ApplicationId,
    ) -> StoreResult<Vec<RollbackRecord>> {
        let tables = self.tables.lock();
        let mut rows: Vec<_> = tables
            .rollbacks
            .values()
            .filter(|r| &r.application_id == application)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(rows)
    }

    async fn pin_rollback(&self, id: &RollbackId, image: ImageRef) -> StoreResult<RollbackRecord> {
        let mut tables = self.tables.lock();
        let record = tables
            .rollbacks
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("rollback", id))?;
        record.image = image;
        Ok(record.clone())
    }

    async fn delete_rollback(&self, id: &RollbackId) -> StoreResult<bool> {
        Ok(self.tables.lock().rollbacks.remove(id).is_some())
    }
}

#[async_trait]
impl PreviewStore for MemoryStore {
    async fn find_or_create_preview(
        &self,
        new: NewPreview,
        limit: usize,
    ) -> StoreResult<PreviewSlot> {
        let mut tables = self.tables.lock();

        if let Some(existing) = tables.previews.values_mut().find(|p| {
            p.application_id == new.application_id && p.pull_request_id == new.pull_request_id
        }) {
            existing.pull_request_title = new.pull_request_title;
            existing.pull_request_url = new.pull_request_url;
            existing.branch = new.branch;
            return Ok(PreviewSlot::Existing(existing.clone()));
        }

        let count = tables
            .previews
            .values()
            .filter(|p| p.application_id == new.application_id)
            .count();
        if count >= limit {
            return Ok(PreviewSlot::LimitReached { count, limit });
        }

        let id = PreviewId::generate();
        let domain_id = new.domain.map(|domain| {
            let domain = Domain {
                id: DomainId::generate(),
                host: domain.host,
                https: domain.https,
                port: domain.port,
                preview_deployment_id: Some(id.clone()),
            };
            let domain_id = domain.id.clone();
            tables.domains.insert(domain_id.clone(), domain);
            domain_id
        });

        let preview = PreviewDeployment {
            id: id.clone(),
            application_id: new.application_id,
            branch: new.branch,
            pull_request_id: new.pull_request_id,
            pull_request_number: new.pull_request_number,
            pull_request_title: new.pull_request_title,
            pull_request_url: new.pull_request_url,
            status: PreviewStatus::Idle,
            app_name: new.app_name,
            domain_id,
            created_at: Utc::now(),
            expires_at: None,
        };
        tables.previews.insert(id, preview.clone());
        Ok(PreviewSlot::Created(preview))
    }

    async fn get_preview(&self, id: &PreviewId) -> StoreResult<Option<PreviewDeployment>> {
        Ok(self.tables.lock().previews.get(id).cloned())
    }

    async fn find_previews_by_pull_request(
        &self,
        applications: &[ApplicationId],
        pull_request_id: &str,
    ) -> StoreResult<Vec<PreviewDeployment>> {
        let tables = self.tables.lock();
        Ok(tables
            .previews
            .values()
            .filter(|p| {
                p.pull_request_id == pull_request_id && applications.contains(&p.application_id)
            })
            .cloned()
            .collect())
    }

    async fn count_previews(&self, application: &ApplicationId) -> StoreResult<usize> {
        let tables = self.tables.lock();
        Ok(tables
            .previews
            .values()
            .filter(|p| &p.application_id == application)
            .count())
    }

    async fn list_previews(
        &self,
        application: &ApplicationId,
    ) -> StoreResult<Vec<PreviewDeployment>> {
        let tables = self.tables.lock();
        Ok(tables
            .previews
            .values()
            .filter(|p| &p.application_id == application)
            .cloned()
            .collect())
    }

    async fn set_preview_status(&self, id: &PreviewId, status: PreviewStatus) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let preview = tables
            .previews
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("preview deployment", id))?;
        preview.status = status;
        Ok(())
    }

    async fn get_domain(&self, id: &DomainId) -> StoreResult<Option<Domain>> {
        Ok(self.tables.lock().domains.get(id).cloned())
    }

    async fn delete_domain(&self, id: &DomainId) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        tables.domains.remove(id);
        for preview in tables.previews.values_mut() {
            if preview.domain_id.as_ref() == Some(id) {
                preview.domain_id = None;
            }
        }
        Ok(())
    }

    async fn delete_preview(&self, id: &PreviewId) -> StoreResult<()> {
        self.tables.lock().remove_preview_cascade(id);
        Ok(())
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn resolve_target(&self, target: &TargetRef) -> StoreResult<Option<ResolvedTarget>> {
        let tables = self.tables.lock();
        Ok(match target {
            TargetRef::Application(id) => tables
                .applications
                .get(id)
                .cloned()
                .map(ResolvedTarget::Application),
            TargetRef::Compose(id) => tables.composes.get(id).cloned().map(ResolvedTarget::Compose),
            TargetRef::Server(id) => tables.servers.get(id).cloned().map(ResolvedTarget::Server),
            TargetRef::Schedule(id) => tables
                .schedules
                .get(id)
                .cloned()
                .map(|t| ResolvedTarget::Schedule(id.clone(), t)),
            TargetRef::Backup(id) => tables
                .backups
                .get(id)
                .cloned()
                .map(|t| ResolvedTarget::Backup(id.clone(), t)),
            TargetRef::VolumeBackup(id) => tables
                .volume_backups
                .get(id)
                .cloned()
                .map(|t| ResolvedTarget::VolumeBackup(id.clone(), t)),
        })
    }

    async fn get_application(&self, id: &ApplicationId) -> StoreResult<Option<Application>> {
        Ok(self.tables.lock().applications.get(id).cloned())
    }

    async fn get_server(&self, id: &ServerId) -> StoreResult<Option<Server>> {
        Ok(self.tables.lock().servers.get(id).cloned())
    }

    async fn list_servers(&self) -> StoreResult<Vec<Server>> {
        Ok(self.tables.lock().servers.values().cloned().collect())
    }

    async fn organization_applications(
        &self,
        organization: &OrganizationId,
    ) -> StoreResult<Vec<Application>> {
        let tables = self.tables.lock();
        Ok(tables
            .applications
            .values()
            .filter(|a| &a.organization_id == organization)
            .cloned()
            .collect())
    }

    async fn update_server_cluster(&self, id: &ServerId, cluster: ClusterType) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let server = tables
            .servers
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("server", id))?;
        server.orchestrator.cluster = ClusterSelection::from(cluster);
        Ok(())
    }

    async fn update_server_capabilities(
        &self,
        id: &ServerId,
        capabilities: ClusterCapabilities,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let server = tables
            .servers
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("server", id))?;
        server.capabilities = Some(capabilities);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::DeploymentIntent;
    use crate::types::{AppName, ImageRef};
    use std::path::PathBuf;

    fn new_deployment(app: &str) -> NewDeployment {
        NewDeployment {
            target: TargetRef::Application(ApplicationId::new(app)),
            intent: DeploymentIntent::Deploy,
            title: "Manual deployment".into(),
            description: None,
            log_path: PathBuf::from("/tmp/x.log"),
            rollback_id: None,
            preview_deployment_id: None,
        }
    }

    #[tokio::test]
    async fn finished_records_refuse_further_transitions() {
        let store = MemoryStore::new();
        let record = store.create_deployment(new_deployment("a")).await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Running);

        store
            .finish_deployment(&record.id, DeploymentStatus::Done, None)
            .await
            .unwrap();
        let err = store
            .finish_deployment(&record.id, DeploymentStatus::Error, Some("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn rollback_versions_are_per_application() {
        let store = MemoryStore::new();
        let snapshot = |app: &str| NewRollback {
            application_id: ApplicationId::new(app),
            deployment_id: DeploymentId::generate(),
            image: ImageRef::parse("api:v1").unwrap(),
            env: BTreeMap::new(),
        };
        assert_eq!(store.create_rollback(snapshot("a")).await.unwrap().version, 1);
        assert_eq!(store.create_rollback(snapshot("a")).await.unwrap().version, 2);
        assert_eq!(store.create_rollback(snapshot("b")).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn preview_limit_ignores_own_preview() {
        let store = MemoryStore::new();
        let new = |pr: &str| NewPreview {
            application_id: ApplicationId::new("a"),
            branch: "feature".into(),
            pull_request_id: pr.into(),
            pull_request_number: pr.into(),
            pull_request_title: "t".into(),
            pull_request_url: "u".into(),
            app_name: AppName::new(&format!("preview-api-{}", pr)).unwrap(),
            domain: None,
        };
        assert!(matches!(
            store.find_or_create_preview(new("10"), 1).await.unwrap(),
            PreviewSlot::Created(_)
        ));
        assert!(matches!(
            store.find_or_create_preview(new("10"), 1).await.unwrap(),
            PreviewSlot::Existing(_)
        ));
        assert!(matches!(
            store.find_or_create_preview(new("11"), 1).await.unwrap(),
            PreviewSlot::LimitReached { count: 1, limit: 1 }
        ));
    }
}
