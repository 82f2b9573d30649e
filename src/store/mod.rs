// ABOUTME: Persistence traits for deployment history, rollbacks, previews, and targets.
// ABOUTME: MemoryStore implements all of them in process.

mod error;
mod memory;
mod records;
mod targets;

pub use error::{StoreError, StoreErrorKind, StoreResult};
pub use memory::MemoryStore;
pub use records::{
    DeploymentIntent, DeploymentRecord, DeploymentStatus, Domain, NewDeployment, NewDomain,
    NewPreview, NewRollback, PreviewDeployment, PreviewSlot, PreviewStatus, RollbackRecord,
    TargetKind, TargetRef,
};
pub use targets::{
    Application, CommandTarget, ComposeStack, DEFAULT_PREVIEW_WILDCARD, PreviewSettings,
    ResolvedTarget, Server, SshTarget,
};

use async_trait::async_trait;
use std::sync::Arc;

use crate::orchestrator::{ClusterCapabilities, ClusterType};
use crate::types::{
    ApplicationId, DeploymentId, DomainId, ImageRef, OrganizationId, PreviewId, RollbackId,
    ServerId,
};

/// Deployment records.
///
/// A record is created `Running` and finished exactly once.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn create_deployment(&self, new: NewDeployment) -> StoreResult<DeploymentRecord>;

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>>;

    /// Record the pid of the build process. Only allowed while running.
    async fn set_process_id(&self, id: &DeploymentId, pid: u32) -> StoreResult<()>;

    /// Move a running record to `Done` or `Error`.
    ///
    /// Fails with `InvalidTransition` if the record is already terminal or
    /// `status` is `Running`.
    async fn finish_deployment(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> StoreResult<DeploymentRecord>;

    /// Records of a target, newest first.
    ///
    /// With `preview` set only that preview's records are returned; without
    /// it preview records are excluded.
    async fn list_deployments(
        &self,
        target: &TargetRef,
        preview: Option<&PreviewId>,
    ) -> StoreResult<Vec<DeploymentRecord>>;

    async fn delete_deployment(&self, id: &DeploymentId) -> StoreResult<()>;
}

/// Rollback snapshots.
#[async_trait]
pub trait RollbackStore: Send + Sync {
    /// Insert with `version` = current maximum for the application + 1.
    async fn create_rollback(&self, new: NewRollback) -> StoreResult<RollbackRecord>;

    async fn get_rollback(&self, id: &RollbackId) -> StoreResult<Option<RollbackRecord>>;

    /// Snapshots of an application, highest version first.
    async fn list_rollbacks(
        &self,
        application: &ApplicationId,
    ) -> StoreResult<Vec<RollbackRecord>>;

    /// Point a snapshot at the image it was pinned to.
    async fn pin_rollback(&self, id: &RollbackId, image: ImageRef) -> StoreResult<RollbackRecord>;

    /// Returns whether a row was removed.
    async fn delete_rollback(&self, id: &RollbackId) -> StoreResult<bool>;
}

/// Preview deployments and their domains.
#[async_trait]
pub trait PreviewStore: Send + Sync {
    /// Return the preview for `(application, pull request)`, creating it
    /// unless the application already has `limit` other previews.
    ///
    /// Lookup, count, and insert are one atomic step.
    async fn find_or_create_preview(
        &self,
        new: NewPreview,
        limit: usize,
    ) -> StoreResult<PreviewSlot>;

    async fn get_preview(&self, id: &PreviewId) -> StoreResult<Option<PreviewDeployment>>;

    async fn find_previews_by_pull_request(
        &self,
        applications: &[ApplicationId],
        pull_request_id: &str,
    ) -> StoreResult<Vec<PreviewDeployment>>;

    async fn count_previews(&self, application: &ApplicationId) -> StoreResult<usize>;

    async fn list_previews(
        &self,
        application: &ApplicationId,
    ) -> StoreResult<Vec<PreviewDeployment>>;

    async fn set_preview_status(&self, id: &PreviewId, status: PreviewStatus) -> StoreResult<()>;

    async fn get_domain(&self, id: &DomainId) -> StoreResult<Option<Domain>>;

    async fn delete_domain(&self, id: &DomainId) -> StoreResult<()>;

    async fn delete_preview(&self, id: &PreviewId) -> StoreResult<()>;
}

/// Read access to deployable entities, plus probed server facts.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn resolve_target(&self, target: &TargetRef) -> StoreResult<Option<ResolvedTarget>>;

    async fn get_application(&self, id: &ApplicationId) -> StoreResult<Option<Application>>;

    async fn get_server(&self, id: &ServerId) -> StoreResult<Option<Server>>;

    async fn list_servers(&self) -> StoreResult<Vec<Server>>;

    /// Applications in an organization.
    async fn organization_applications(
        &self,
        organization: &OrganizationId,
    ) -> StoreResult<Vec<Application>>;

    /// Persist the cluster type found by auto-detection.
    async fn update_server_cluster(&self, id: &ServerId, cluster: ClusterType) -> StoreResult<()>;

    async fn update_server_capabilities(
        &self,
        id: &ServerId,
        capabilities: ClusterCapabilities,
    ) -> StoreResult<()>;
}

/// Handles to every store, usually one backend behind all four.
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn DeploymentStore>,
    pub rollbacks: Arc<dyn RollbackStore>,
    pub previews: Arc<dyn PreviewStore>,
    pub targets: Arc<dyn TargetStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: DeploymentStore + RollbackStore + PreviewStore + TargetStore + 'static,
    {
        Self {
            deployments: backend.clone(),
            rollbacks: backend.clone(),
            previews: backend.clone(),
            targets: backend,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
