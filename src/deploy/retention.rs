// ABOUTME: Prunes old deployment records and their logs.
// ABOUTME: Keeps the newest records per target and removes everything when a target goes away.

use crate::diagnostics::Diagnostics;
use crate::logs::LogSink;
use crate::store::{DeploymentRecord, Stores, TargetRef};
use crate::types::PreviewId;

use super::error::DeployError;

/// Drop all but the newest records of one target.
///
/// Preview records are pruned per preview. Records still `running` are never
/// removed. Returns the number of removed records.
pub async fn apply_retention(
    stores: &Stores,
    logs: &dyn LogSink,
    target: &TargetRef,
    preview: Option<&PreviewId>,
) -> Result<usize, DeployError> {
    let keep = target.kind().retention();
    let records = stores.deployments.list_deployments(target, preview).await?;
    let stale: Vec<DeploymentRecord> = records
        .into_iter()
        .skip(keep)
        .filter(|r| r.status.is_terminal())
        .collect();

    let mut removed = 0;
    for record in &stale {
        if let Err(e) = logs.remove_log(&record.log_path).await {
            tracing::warn!(deployment = %record.id, "cannot remove log: {}", e);
        }
        stores.deployments.delete_deployment(&record.id).await?;
        removed += 1;
    }
    if removed > 0 {
        tracing::debug!(target = %target, removed, "pruned old deployments");
    }
    Ok(removed)
}

/// Delete every record and log of a target, previews included.
pub async fn remove_target_deployments(
    stores: &Stores,
    logs: &dyn LogSink,
    target: &TargetRef,
    previews: &[PreviewId],
) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    remove_group(stores, logs, target, None, &mut diagnostics).await;
    for preview in previews {
        remove_group(stores, logs, target, Some(preview), &mut diagnostics).await;
    }
    diagnostics
}

/// Delete the records and logs of one preview.
pub async fn remove_preview_deployments(
    stores: &Stores,
    logs: &dyn LogSink,
    target: &TargetRef,
    preview: &PreviewId,
) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    remove_group(stores, logs, target, Some(preview), &mut diagnostics).await;
    diagnostics
}

async fn remove_group(
    stores: &Stores,
    logs: &dyn LogSink,
    target: &TargetRef,
    preview: Option<&PreviewId>,
    diagnostics: &mut Diagnostics,
) {
    let records = match stores.deployments.list_deployments(target, preview).await {
        Ok(records) => records,
        Err(e) => {
            diagnostics.warn(format!("cannot list deployments of {}: {}", target, e));
            return;
        }
    };
    for record in records {
        if let Err(e) = logs.remove_log(&record.log_path).await {
            diagnostics.warn(format!("cannot remove log of {}: {}", record.id, e));
        }
        if let Err(e) = stores.deployments.delete_deployment(&record.id).await {
            diagnostics.warn(format!("cannot delete deployment {}: {}", record.id, e));
        }
    }
}
