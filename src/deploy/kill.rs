// ABOUTME: Stops a running deployment by killing its recorded process.
// ABOUTME: The record is forced to error even when the signal cannot be delivered.

use crate::logs::LogSink;
use crate::remote::{ExecTarget, RemoteExec};
use crate::store::{DeploymentRecord, DeploymentStatus, PreviewStatus, StoreError, Stores};
use crate::types::DeploymentId;

use super::error::DeployError;

/// Error message of a killed deployment.
pub const KILLED_MESSAGE: &str = "Deployment killed";

/// Send SIGKILL to the process group led by `pid` on the host behind `target`.
///
/// Build commands run as group leaders, so this also stops whatever they
/// started. Failures are traced and otherwise ignored.
pub async fn signal_process(remote: &dyn RemoteExec, target: &ExecTarget, pid: u32) {
    match remote.execute(target, &format!("kill -9 -- -{}", pid)).await {
        Ok(output) if output.success() => {
            tracing::info!(pid, host = %target, "killed deployment process")
        }
        Ok(output) => tracing::warn!(
            pid,
            host = %target,
            exit_code = output.exit_code,
            "kill failed: {}",
            output.stderr.trim()
        ),
        Err(e) => tracing::warn!(pid, host = %target, "cannot deliver kill: {}", e),
    }
}

/// Host a deployment's process runs on.
pub async fn exec_target_of(stores: &Stores, record: &DeploymentRecord) -> ExecTarget {
    match stores.targets.resolve_target(&record.target).await {
        Ok(Some(target)) => ExecTarget::for_server(target.server_id()),
        Ok(None) => ExecTarget::Local,
        Err(e) => {
            tracing::warn!(deployment = %record.id, "cannot resolve target host: {}", e);
            ExecTarget::Local
        }
    }
}

/// Kill a running deployment.
///
/// Fails with `NotFound`, `NotRunning`, or `NoProcessId` without touching the
/// record. Otherwise the process is signalled and the record finished as
/// `error` with [`KILLED_MESSAGE`].
pub async fn kill_deployment(
    stores: &Stores,
    remote: &dyn RemoteExec,
    logs: &dyn LogSink,
    id: &DeploymentId,
) -> Result<DeploymentRecord, DeployError> {
    let record = stores
        .deployments
        .get_deployment(id)
        .await?
        .ok_or_else(|| DeployError::not_found("deployment", id))?;
    if record.status != DeploymentStatus::Running {
        return Err(DeployError::NotRunning(id.clone()));
    }
    let pid = record
        .process_id
        .ok_or_else(|| DeployError::NoProcessId(id.clone()))?;

    let host = exec_target_of(stores, &record).await;
    signal_process(remote, &host, pid).await;

    let record = match stores
        .deployments
        .finish_deployment(id, DeploymentStatus::Error, Some(KILLED_MESSAGE.to_string()))
        .await
    {
        Ok(record) => record,
        Err(StoreError::InvalidTransition { .. }) => {
            return Err(DeployError::NotRunning(id.clone()));
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = logs.append_log(&record.log_path, KILLED_MESSAGE).await {
        tracing::debug!(deployment = %id, "cannot write deployment log: {}", e);
    }
    if let Some(preview) = &record.preview_deployment_id
        && let Err(e) = stores
            .previews
            .set_preview_status(preview, PreviewStatus::Error)
            .await
    {
        tracing::warn!(preview = %preview, "cannot update preview status: {}", e);
    }
    Ok(record)
}
