// ABOUTME: Runs one deployment job from record creation to retention.
// ABOUTME: Resolves the target, builds or replays it under a timeout, mints rollbacks, and notifies.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::build::{BuildOutput, BuildStep, ImageBuildStep, PidReporter};
use crate::logs::{FileLogSink, LogSink};
use crate::notify::{NotificationEvent, Notifier, TracingNotifier};
use crate::orchestrator::OrchestratorFactory;
use crate::remote::RemoteExec;
use crate::rollback;
use crate::store::{
    DeploymentRecord, DeploymentStatus, Domain, NewDeployment, PreviewDeployment, PreviewStatus,
    ResolvedTarget, Stores, TargetRef,
};

use super::error::DeployError;
use super::handle::ProgressTx;
use super::job::DeploymentJob;
use super::kill::{exec_target_of, signal_process};
use super::lifecycle::{ActiveDeployment, INITIAL_LOG_LINE};
use super::retention::apply_retention;

/// Default limit on one job's run time.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Log file for a deployment started at `now`.
///
/// Layout: `{logs_dir}/{app}/{app}-{YYYY-MM-DD:HH:MM:SS}.log`.
pub fn log_path(logs_dir: &Path, app_name: &str, now: DateTime<Utc>) -> PathBuf {
    logs_dir.join(app_name).join(format!(
        "{}-{}.log",
        app_name,
        now.format("%Y-%m-%d:%H:%M:%S")
    ))
}

/// Executes deployment jobs.
///
/// Schedulers decide when a job runs; the worker decides what running means.
pub struct Worker {
    stores: Stores,
    factory: Arc<OrchestratorFactory>,
    remote: Arc<dyn RemoteExec>,
    build: Arc<dyn BuildStep>,
    logs: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    logs_dir: PathBuf,
    job_timeout: Duration,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("logs_dir", &self.logs_dir)
            .field("job_timeout", &self.job_timeout)
            .finish()
    }
}

impl Worker {
    pub fn new(
        stores: Stores,
        factory: Arc<OrchestratorFactory>,
        remote: Arc<dyn RemoteExec>,
        logs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stores,
            factory,
            remote,
            build: Arc::new(ImageBuildStep::new()),
            logs: Arc::new(FileLogSink::new()),
            notifier: Arc::new(TracingNotifier),
            logs_dir: logs_dir.into(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_build_step(mut self, build: Arc<dyn BuildStep>) -> Self {
        self.build = build;
        self
    }

    pub fn with_log_sink(mut self, logs: Arc<dyn LogSink>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn factory(&self) -> &Arc<OrchestratorFactory> {
        &self.factory
    }

    pub fn remote(&self) -> &dyn RemoteExec {
        self.remote.as_ref()
    }

    pub fn logs(&self) -> &dyn LogSink {
        self.logs.as_ref()
    }

    /// Run a job to a terminal record, reporting through `progress`.
    #[tracing::instrument(
        skip_all,
        fields(job = %job.id, target = %job.target, server = ?job.remote, external = job.is_external)
    )]
    pub async fn execute(
        &self,
        job: &DeploymentJob,
        progress: &mut ProgressTx,
    ) -> Option<DeploymentRecord> {
        let resolved = match self.stores.targets.resolve_target(&job.target).await {
            Ok(Some(target)) => Ok(target),
            Ok(None) => Err(DeployError::not_found(kind_name(&job.target), job.target.id_str())),
            Err(e) => Err(e.into()),
        };
        let preview = self.preview_of(job).await;
        if let Err(e @ DeployError::PreviewRemoved(_)) = &preview {
            // Teardown already removed the preview's records.
            tracing::warn!("{}", e);
            progress.rejected(e.to_string());
            return None;
        }

        let app_name = match (&preview, &resolved) {
            (Ok(Some((preview, _))), _) => preview.app_name.to_string(),
            (_, Ok(target)) => target.app_name().to_string(),
            _ => job.target.id_str().to_string(),
        };
        let new = NewDeployment {
            target: job.target.clone(),
            intent: job.intent,
            title: job.title.clone(),
            description: job.description.clone(),
            log_path: log_path(&self.logs_dir, &app_name, Utc::now()),
            rollback_id: job.replay.clone(),
            preview_deployment_id: job.preview_deployment_id.clone(),
        };

        // A preview job never falls back to the application's own workload.
        let (target, preview, domain) = match (resolved, preview) {
            (Ok(target), Ok(Some((preview, domain)))) => (target, Some(preview), domain),
            (Ok(target), Ok(None)) => (target, None, None),
            (Err(e), _) | (_, Err(e)) => return self.record_failure(new, &e, progress).await,
        };

        let active = match ActiveDeployment::claim(
            &self.stores,
            self.logs.as_ref(),
            new,
            target.clone(),
            preview.clone(),
            domain,
        )
        .await
        {
            Ok(active) => active,
            Err(e) => {
                tracing::error!("cannot create deployment record: {}", e);
                progress.rejected(e.to_string());
                return None;
            }
        };
        progress.claimed(active.record());
        if job.is_external {
            self.log_line(active.record(), "Triggered by a pull request event")
                .await;
        }
        self.set_preview_status(preview.as_ref(), PreviewStatus::Running)
            .await;

        let claimed = active.record().clone();
        let outcome = match tokio::time::timeout(self.job_timeout, self.run(active, job)).await {
            Ok(outcome) => outcome,
            Err(_) => self.expire(&claimed).await.map(|r| (r, None)),
        };

        let record = match outcome {
            Ok((record, output)) => {
                self.after_success(job, &target, &record, output).await;
                record
            }
            Err(e) => {
                tracing::error!(deployment = %claimed.id, "cannot finish deployment: {}", e);
                match self.stores.deployments.get_deployment(&claimed.id).await {
                    Ok(Some(record)) => record,
                    _ => {
                        progress.rejected(e.to_string());
                        return None;
                    }
                }
            }
        };

        let status = match record.status {
            DeploymentStatus::Done => PreviewStatus::Done,
            _ => PreviewStatus::Error,
        };
        self.set_preview_status(preview.as_ref(), status).await;
        self.notify(job, &record).await;

        if let Err(e) = apply_retention(
            &self.stores,
            self.logs.as_ref(),
            &record.target,
            record.preview_deployment_id.as_ref(),
        )
        .await
        {
            tracing::warn!("retention failed: {}", e);
        }

        progress.finished(&record);
        Some(record)
    }

    async fn run(
        &self,
        active: ActiveDeployment<super::state::Claimed>,
        job: &DeploymentJob,
    ) -> Result<(DeploymentRecord, Option<BuildOutput>), DeployError> {
        let logs = self.logs.as_ref();
        let pid = PidReporter::new(self.stores.deployments.clone(), active.record().id.clone());

        let prepared = match active.prepare(&self.factory).await {
            Ok(prepared) => prepared,
            Err((active, e)) => {
                return active
                    .fail(&self.stores, logs, &e.to_string())
                    .await
                    .map(|r| (r, None));
            }
        };

        let built = match &job.replay {
            Some(rollback) => {
                prepared
                    .replay(&self.stores, rollback, logs, self.remote.as_ref(), &pid)
                    .await
            }
            None => {
                prepared
                    .build(self.build.as_ref(), logs, self.remote.as_ref(), &pid)
                    .await
            }
        };

        match built {
            Ok(built) => built
                .complete(&self.stores, logs)
                .await
                .map(|(r, output)| (r, Some(output))),
            Err((prepared, e)) => prepared
                .fail(&self.stores, logs, &e.to_string())
                .await
                .map(|r| (r, None)),
        }
    }

    /// Kill the process of a timed-out job and fail its record.
    async fn expire(&self, claimed: &DeploymentRecord) -> Result<DeploymentRecord, DeployError> {
        let message = DeployError::TimedOut(self.job_timeout).to_string();
        tracing::warn!(deployment = %claimed.id, "{}", message);

        let current = self
            .stores
            .deployments
            .get_deployment(&claimed.id)
            .await?
            .unwrap_or_else(|| claimed.clone());
        if let Some(pid) = current.process_id {
            let host = exec_target_of(&self.stores, &current).await;
            signal_process(self.remote.as_ref(), &host, pid).await;
        }
        self.log_line(&current, &format!("Error: {}", message)).await;

        match self
            .stores
            .deployments
            .finish_deployment(&claimed.id, DeploymentStatus::Error, Some(message))
            .await
        {
            Ok(record) => Ok(record),
            Err(crate::store::StoreError::InvalidTransition { .. }) => Ok(current),
            Err(e) => Err(e.into()),
        }
    }

    async fn after_success(
        &self,
        job: &DeploymentJob,
        target: &ResolvedTarget,
        record: &DeploymentRecord,
        output: Option<BuildOutput>,
    ) {
        if record.status != DeploymentStatus::Done || job.replay.is_some() || record.is_preview {
            return;
        }
        let (ResolvedTarget::Application(app), Some(output)) = (target, output) else {
            return;
        };
        let Some(image) = output.image else {
            return;
        };
        match rollback::record_success(
            self.stores.rollbacks.as_ref(),
            self.remote.as_ref(),
            app,
            &record.id,
            image,
            output.env,
        )
        .await
        {
            Ok(rollback) => {
                self.log_line(
                    record,
                    &format!("Saved rollback v{} as {}", rollback.version, rollback.image),
                )
                .await
            }
            Err(e) => tracing::warn!(deployment = %record.id, "cannot save rollback: {}", e),
        }
    }

    /// Write an `error` record for a job that failed before it could start.
    async fn record_failure(
        &self,
        new: NewDeployment,
        error: &DeployError,
        progress: &mut ProgressTx,
    ) -> Option<DeploymentRecord> {
        let message = format!("An error occurred: {}", error);
        tracing::warn!("{}", message);
        let record = match self.stores.deployments.create_deployment(new).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("cannot create deployment record: {}", e);
                progress.rejected(message);
                return None;
            }
        };
        progress.claimed(&record);
        self.log_line(&record, INITIAL_LOG_LINE).await;
        self.log_line(&record, &message).await;
        match self
            .stores
            .deployments
            .finish_deployment(&record.id, DeploymentStatus::Error, Some(message.clone()))
            .await
        {
            Ok(record) => {
                progress.finished(&record);
                Some(record)
            }
            Err(e) => {
                tracing::error!(deployment = %record.id, "cannot finish deployment: {}", e);
                progress.rejected(message);
                None
            }
        }
    }

    /// Preview a job deploys, with its domain.
    ///
    /// Fails when the job names a preview that is gone or cannot be loaded.
    async fn preview_of(
        &self,
        job: &DeploymentJob,
    ) -> Result<Option<(PreviewDeployment, Option<Domain>)>, DeployError> {
        let Some(id) = &job.preview_deployment_id else {
            return Ok(None);
        };
        let preview = self
            .stores
            .previews
            .get_preview(id)
            .await?
            .ok_or_else(|| DeployError::PreviewRemoved(id.clone()))?;
        let domain = match &preview.domain_id {
            Some(domain) => self.stores.previews.get_domain(domain).await?,
            None => None,
        };
        Ok(Some((preview, domain)))
    }

    async fn set_preview_status(&self, preview: Option<&PreviewDeployment>, status: PreviewStatus) {
        if let Some(preview) = preview
            && let Err(e) = self
                .stores
                .previews
                .set_preview_status(&preview.id, status)
                .await
        {
            tracing::warn!(preview = %preview.id, "cannot update preview status: {}", e);
        }
    }

    async fn notify(&self, job: &DeploymentJob, record: &DeploymentRecord) {
        let event = match record.status {
            DeploymentStatus::Done => NotificationEvent::DeploymentSucceeded,
            _ => NotificationEvent::DeploymentFailed,
        };
        let payload = json!({
            "deployment_id": record.id,
            "target": record.target,
            "title": record.title,
            "status": record.status,
            "error": record.error_message,
            "server": job.remote,
            "external": job.is_external,
            "preview_deployment_id": record.preview_deployment_id,
        });
        if let Err(e) = self.notifier.notify(event, payload).await {
            tracing::warn!(deployment = %record.id, "notification failed: {}", e);
        }
    }

    async fn log_line(&self, record: &DeploymentRecord, line: &str) {
        if let Err(e) = self.logs.append_log(&record.log_path, line).await {
            tracing::debug!(deployment = %record.id, "cannot write deployment log: {}", e);
        }
    }
}

fn kind_name(target: &TargetRef) -> &'static str {
    match target {
        TargetRef::Application(_) => "application",
        TargetRef::Compose(_) => "compose",
        TargetRef::Server(_) => "server",
        TargetRef::Schedule(_) => "schedule",
        TargetRef::Backup(_) => "backup",
        TargetRef::VolumeBackup(_) => "volume backup",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_path_layout() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = log_path(Path::new("/var/lib/flotilla/logs"), "web", now);
        assert_eq!(
            path,
            PathBuf::from("/var/lib/flotilla/logs/web/web-2026-03-04:05:06:07.log")
        );
    }
}
