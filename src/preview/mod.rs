// ABOUTME: Preview deployments that follow the lifecycle of a pull request.
// ABOUTME: Opened and synchronized pull requests deploy previews; closing one tears them down.

mod domain;
mod event;

pub use domain::{WildcardError, wildcard_host};
pub use event::{PullRequestAction, PullRequestEvent};

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::deploy::{
    DeployError, DeploymentJob, RecordHandle, Scheduler, TargetLocks, preview_lane,
    remove_preview_deployments,
};
use crate::diagnostics::{Diagnostics, Warning};
use crate::logs::LogSink;
use crate::notify::{NotificationEvent, Notifier, TracingNotifier};
use crate::orchestrator::OrchestratorFactory;
use crate::store::{
    Application, NewDomain, NewPreview, PreviewDeployment, PreviewSlot, Stores, TargetRef,
};
use crate::types::JobId;

/// Record title of every preview deploy.
pub const PREVIEW_TITLE: &str = "Preview Deployment";

/// Result of handling one pull request event.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutcome {
    pub message: String,
    /// Previews deployed or removed.
    pub previews: Vec<PreviewDeployment>,
    /// Handles of the submitted preview jobs, in the order of `previews`.
    #[serde(skip)]
    pub jobs: Vec<RecordHandle>,
    pub diagnostics: Diagnostics,
}

impl PreviewOutcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            previews: Vec::new(),
            jobs: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }
}

/// Creates, redeploys, and removes previews in response to pull request events.
pub struct PreviewController {
    stores: Stores,
    factory: Arc<OrchestratorFactory>,
    scheduler: Arc<dyn Scheduler>,
    locks: TargetLocks,
    logs: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    /// Address of the control node, used in wildcard hosts of local apps.
    local_ip: Option<String>,
}

impl std::fmt::Debug for PreviewController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewController")
            .field("local_ip", &self.local_ip)
            .finish_non_exhaustive()
    }
}

impl PreviewController {
    pub fn new(
        stores: Stores,
        factory: Arc<OrchestratorFactory>,
        scheduler: Arc<dyn Scheduler>,
        locks: TargetLocks,
        logs: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            stores,
            factory,
            scheduler,
            locks,
            logs,
            notifier: Arc::new(TracingNotifier),
            local_ip: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_local_ip(mut self, ip: Option<String>) -> Self {
        self.local_ip = ip;
        self
    }

    #[tracing::instrument(
        skip_all,
        fields(action = %event.action, repository = %event.repository, pr = %event.pull_request_number)
    )]
    pub async fn on_pull_request_event(
        &self,
        event: &PullRequestEvent,
    ) -> Result<PreviewOutcome, DeployError> {
        match &event.action {
            PullRequestAction::Closed => self.close(event).await,
            action if action.deploys() => self.deploy(event).await,
            action => Ok(PreviewOutcome::message(format!(
                "No action taken for {}",
                action
            ))),
        }
    }

    async fn deploy(&self, event: &PullRequestEvent) -> Result<PreviewOutcome, DeployError> {
        if event.repository.trim().is_empty() {
            return Err(DeployError::Validation("repository is required".into()));
        }
        if event.branch.trim().is_empty() {
            return Err(DeployError::Validation("branch is required".into()));
        }

        let apps: Vec<Application> = self
            .stores
            .targets
            .organization_applications(&event.organization_id)
            .await?
            .into_iter()
            .filter(|app| matches_event(app, event))
            .collect();

        let mut outcome = PreviewOutcome::message("No applications matched");
        let mut limited = false;
        for app in &apps {
            if !app.preview.accepts_labels(&event.labels) {
                tracing::debug!(application = %app.id, "pull request lacks a preview label");
                continue;
            }

            let new = match self.new_preview(app, event).await {
                Ok(new) => new,
                Err(e) => {
                    outcome.diagnostics.warn(Warning::cleanup(format!(
                        "cannot prepare preview of {}: {}",
                        app.id, e
                    )));
                    continue;
                }
            };
            let preview = match self
                .stores
                .previews
                .find_or_create_preview(new, app.preview.limit)
                .await?
            {
                PreviewSlot::Existing(preview) => preview,
                PreviewSlot::Created(preview) => {
                    tracing::info!(application = %app.id, preview = %preview.id, "created preview");
                    preview
                }
                PreviewSlot::LimitReached { count, limit } => {
                    tracing::info!(application = %app.id, count, limit, "preview limit reached");
                    limited = true;
                    continue;
                }
            };

            let job = DeploymentJob::deploy(TargetRef::Application(app.id.clone()), PREVIEW_TITLE)
                .with_description(format!("Hash: {}", event.head_sha))
                .on_server(app.server_id.clone())
                .for_preview(preview.id.clone());
            match self.scheduler.submit(job).await {
                Ok(handle) => {
                    outcome.previews.push(preview);
                    outcome.jobs.push(handle);
                }
                Err(e) => {
                    tracing::warn!(preview = %preview.id, "preview job refused: {}", e);
                    outcome.diagnostics.warn(Warning::cleanup(format!(
                        "cannot submit preview {}: {}",
                        preview.id, e
                    )));
                }
            }
        }

        if !outcome.jobs.is_empty() {
            outcome.message = "Preview deployments queued".into();
        } else if limited {
            outcome.message = "Preview limit reached".into();
        } else if outcome.diagnostics.has_warnings() {
            outcome.message = "Preview deployments not queued".into();
        }
        Ok(outcome)
    }

    async fn new_preview(
        &self,
        app: &Application,
        event: &PullRequestEvent,
    ) -> Result<NewPreview, DeployError> {
        let app_name = app.app_name.preview();
        let server_ip = match &app.server_id {
            Some(server) => self
                .stores
                .targets
                .get_server(server)
                .await?
                .map(|s| s.ip),
            None => self.local_ip.clone(),
        };
        let host = wildcard_host(app.preview.wildcard(), app_name.as_str(), server_ip.as_deref())
            .map_err(|e| DeployError::Validation(e.to_string()))?;

        Ok(NewPreview {
            application_id: app.id.clone(),
            branch: event.source_branch().to_string(),
            pull_request_id: event.pull_request_id.clone(),
            pull_request_number: event.pull_request_number.clone(),
            pull_request_title: event.title.clone(),
            pull_request_url: event.url.clone(),
            app_name,
            domain: Some(NewDomain {
                host,
                https: app.preview.https,
                port: app.preview.port,
            }),
        })
    }

    async fn close(&self, event: &PullRequestEvent) -> Result<PreviewOutcome, DeployError> {
        let apps = self
            .stores
            .targets
            .organization_applications(&event.organization_id)
            .await?;
        let ids: Vec<_> = apps.iter().map(|a| a.id.clone()).collect();
        let previews = self
            .stores
            .previews
            .find_previews_by_pull_request(&ids, &event.pull_request_id)
            .await?;

        let mut outcome = PreviewOutcome::message("Preview deployments removed");
        for preview in previews {
            let app = apps.iter().find(|a| a.id == preview.application_id);
            let diagnostics = self.remove_preview(app, &preview).await;
            outcome.diagnostics.extend(diagnostics);
            outcome.previews.push(preview);
        }
        Ok(outcome)
    }

    /// Tear down one preview. Every step runs even if an earlier one failed.
    ///
    /// Waiting jobs of the preview are cancelled, and a running one is waited
    /// out on the preview's lane before anything is removed.
    pub async fn remove_preview(
        &self,
        app: Option<&Application>,
        preview: &PreviewDeployment,
    ) -> Diagnostics {
        let cancelled = self.scheduler.clean_preview(&preview.id);
        let teardown = JobId::generate();
        let _lane = self.locks.lock(&preview_lane(&preview.id), &teardown).await;
        tracing::debug!(preview = %preview.id, cancelled, job = %teardown, "holding preview lane");

        let mut diagnostics = Diagnostics::new();
        let server = app.and_then(|a| a.server_id.as_ref());

        match self.factory.for_server(server).await {
            Ok(orchestrator) => {
                if let Err(e) = orchestrator
                    .delete_application(preview.app_name.as_str(), None)
                    .await
                {
                    diagnostics.warn(Warning::service_removal(format!(
                        "cannot remove service {}: {}",
                        preview.app_name, e
                    )));
                }
            }
            Err(e) => diagnostics.warn(Warning::service_removal(format!(
                "cannot reach cluster for {}: {}",
                preview.app_name, e
            ))),
        }

        let target = TargetRef::Application(preview.application_id.clone());
        diagnostics.extend(
            remove_preview_deployments(&self.stores, self.logs.as_ref(), &target, &preview.id)
                .await,
        );

        if let Some(domain) = &preview.domain_id
            && let Err(e) = self.stores.previews.delete_domain(domain).await
        {
            diagnostics.warn(format!("cannot delete domain {}: {}", domain, e));
        }
        if let Err(e) = self.stores.previews.delete_preview(&preview.id).await {
            diagnostics.warn(format!("cannot delete preview {}: {}", preview.id, e));
        }

        tracing::info!(preview = %preview.id, app_name = %preview.app_name, "removed preview");
        let payload = json!({
            "preview_deployment_id": preview.id,
            "application_id": preview.application_id,
            "pull_request_id": preview.pull_request_id,
            "warnings": diagnostics.warnings().len(),
        });
        if let Err(e) = self
            .notifier
            .notify(NotificationEvent::PreviewRemoved, payload)
            .await
        {
            tracing::warn!(preview = %preview.id, "notification failed: {}", e);
        }
        diagnostics
    }
}

/// Whether an application wants previews for the event's repository and base branch.
fn matches_event(app: &Application, event: &PullRequestEvent) -> bool {
    app.preview.enabled
        && app.repository.as_deref() == Some(event.repository.as_str())
        && app.owner.as_deref() == Some(event.owner.as_str())
        && app.branch.as_deref() == Some(event.branch.as_str())
}
