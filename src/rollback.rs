// ABOUTME: Versioned snapshots of successful application deploys and their replay.
// ABOUTME: A rollback submits an ordinary deploy job that redeploys the captured image.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::build::BuildError;
use crate::deploy::{DeployError, DeploymentJob, RecordHandle, Scheduler};
use crate::remote::{ExecTarget, RemoteExec, shell_quote};
use crate::store::{
    Application, NewRollback, RollbackRecord, RollbackStore, TargetRef, TargetStore,
};
use crate::types::{ApplicationId, DeploymentId, ImageRef, RollbackId};

/// Image a snapshot is pinned to: `{app_name}:v{version}`.
pub fn pinned_image(app: &Application, version: u32) -> ImageRef {
    ImageRef::local(app.app_name.as_str(), &format!("v{}", version))
}

/// Store a snapshot of a successful deploy and pin its image.
///
/// The store assigns the version. The deployed image is retagged as
/// [`pinned_image`] on the application's host so a later rebuild of a
/// mutable tag cannot change what the snapshot restores. A snapshot whose
/// image cannot be pinned is discarded.
pub async fn record_success(
    rollbacks: &dyn RollbackStore,
    remote: &dyn RemoteExec,
    app: &Application,
    deployment: &DeploymentId,
    image: ImageRef,
    env: BTreeMap<String, String>,
) -> Result<RollbackRecord, DeployError> {
    let record = rollbacks
        .create_rollback(NewRollback {
            application_id: app.id.clone(),
            deployment_id: deployment.clone(),
            image: image.clone(),
            env,
        })
        .await?;

    let pinned = pinned_image(app, record.version);
    let host = ExecTarget::for_server(app.server_id.as_ref());
    let command = format!(
        "docker tag {} {}",
        shell_quote(&image.to_string()),
        shell_quote(&pinned.to_string())
    );
    let tagged = match remote.execute(&host, &command).await {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(DeployError::Build(BuildError::CommandFailed {
            exit_code: output.exit_code,
        })),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = tagged {
        if let Err(cleanup) = rollbacks.delete_rollback(&record.id).await {
            tracing::warn!(rollback = %record.id, "cannot discard unpinned rollback: {}", cleanup);
        }
        return Err(e);
    }

    let record = rollbacks.pin_rollback(&record.id, pinned).await?;
    tracing::info!(
        application = %app.id,
        deployment = %deployment,
        version = record.version,
        source = %image,
        image = %record.image,
        "recorded rollback"
    );
    Ok(record)
}

/// Record title of a rollback replay.
pub fn rollback_title(version: u32) -> String {
    format!("Rollback to v{}", version)
}

/// Replays, lists, and deletes rollback records.
pub struct RollbackEngine {
    rollbacks: Arc<dyn RollbackStore>,
    targets: Arc<dyn TargetStore>,
    scheduler: Arc<dyn Scheduler>,
    remote: Arc<dyn RemoteExec>,
}

impl std::fmt::Debug for RollbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine").finish_non_exhaustive()
    }
}

impl RollbackEngine {
    pub fn new(
        rollbacks: Arc<dyn RollbackStore>,
        targets: Arc<dyn TargetStore>,
        scheduler: Arc<dyn Scheduler>,
        remote: Arc<dyn RemoteExec>,
    ) -> Self {
        Self {
            rollbacks,
            targets,
            scheduler,
            remote,
        }
    }

    /// Redeploy the snapshot through the regular job pipeline.
    ///
    /// The new record links back to the rollback; no new snapshot is taken.
    pub async fn rollback(&self, id: &RollbackId) -> Result<RecordHandle, DeployError> {
        let record = self
            .rollbacks
            .get_rollback(id)
            .await?
            .ok_or_else(|| DeployError::not_found("rollback", id))?;
        let app = self
            .targets
            .get_application(&record.application_id)
            .await?
            .ok_or_else(|| DeployError::not_found("application", &record.application_id))?;

        let job = DeploymentJob::deploy(
            TargetRef::Application(app.id.clone()),
            rollback_title(record.version),
        )
        .with_description(format!("Restore {}", record.image))
        .on_server(app.server_id.clone())
        .replaying(record.id.clone());
        tracing::info!(application = %app.id, version = record.version, "submitting rollback");
        self.scheduler.submit(job).await
    }

    /// Delete the snapshot and its pinned image.
    ///
    /// Deployments and workloads are untouched. Removing the image is best
    /// effort; a running service may still use it.
    pub async fn remove_rollback(&self, id: &RollbackId) -> Result<(), DeployError> {
        let record = self
            .rollbacks
            .get_rollback(id)
            .await?
            .ok_or_else(|| DeployError::not_found("rollback", id))?;
        if !self.rollbacks.delete_rollback(id).await? {
            return Err(DeployError::not_found("rollback", id));
        }

        let server = match self.targets.get_application(&record.application_id).await {
            Ok(app) => app.and_then(|a| a.server_id),
            Err(e) => {
                tracing::warn!(rollback = %id, "cannot resolve application host: {}", e);
                None
            }
        };
        let host = ExecTarget::for_server(server.as_ref());
        let command = format!(
            "docker image rm {} --force",
            shell_quote(&record.image.to_string())
        );
        let failure = match self.remote.execute(&host, &command).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(output.stderr.trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            tracing::warn!(rollback = %id, image = %record.image, "cannot remove image: {}", reason);
        }
        tracing::info!(rollback = %id, "removed rollback");
        Ok(())
    }

    /// Snapshots of an application, newest version first.
    pub async fn list_rollbacks(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<RollbackRecord>, DeployError> {
        Ok(self.rollbacks.list_rollbacks(application).await?)
    }
}
