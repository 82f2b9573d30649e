// ABOUTME: A deployment in progress, parameterized by its current state.
// ABOUTME: Each transition consumes self and returns the next state or the current one with an error.

use crate::build::{self, BuildContext, BuildStep, PidReporter, PreviewContext};
use crate::logs::LogSink;
use crate::orchestrator::OrchestratorFactory;
use crate::remote::RemoteExec;
use crate::store::{
    DeploymentIntent, DeploymentRecord, DeploymentStatus, Domain, NewDeployment,
    PreviewDeployment, ResolvedTarget, StoreError, Stores,
};
use crate::types::RollbackId;

use super::error::DeployError;
use super::state::{Built, Claimed, Prepared};

/// First line of every deployment log.
pub const INITIAL_LOG_LINE: &str = "Initializing deployment";

/// Result type for transitions that hand back the deployment on failure.
pub type TransitionResult<T, S> = Result<ActiveDeployment<T>, (ActiveDeployment<S>, DeployError)>;

/// A deployment whose record is `running`.
///
/// The record can only leave `running` through [`ActiveDeployment::complete`]
/// or [`ActiveDeployment::fail`], both of which consume the deployment.
#[derive(Debug)]
pub struct ActiveDeployment<S> {
    record: DeploymentRecord,
    target: ResolvedTarget,
    preview: Option<PreviewDeployment>,
    domain: Option<Domain>,
    state: S,
}

impl<S> ActiveDeployment<S> {
    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    fn transition<T>(self, state: T) -> ActiveDeployment<T> {
        ActiveDeployment {
            record: self.record,
            target: self.target,
            preview: self.preview,
            domain: self.domain,
            state,
        }
    }

    /// Finish the record as `error` with `message`.
    ///
    /// A record already finished elsewhere (killed) is returned unchanged.
    pub async fn fail(
        self,
        stores: &Stores,
        logs: &dyn LogSink,
        message: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        tracing::warn!(deployment = %self.record.id, target = %self.record.target, "deployment failed: {}", message);
        if let Err(e) = logs
            .append_log(&self.record.log_path, &format!("Error: {}", message))
            .await
        {
            tracing::debug!(deployment = %self.record.id, "cannot write deployment log: {}", e);
        }
        finish(stores, &self.record, DeploymentStatus::Error, Some(message.to_string())).await
    }
}

impl ActiveDeployment<Claimed> {
    /// Create the `running` record and start its log.
    pub async fn claim(
        stores: &Stores,
        logs: &dyn LogSink,
        new: NewDeployment,
        target: ResolvedTarget,
        preview: Option<PreviewDeployment>,
        domain: Option<Domain>,
    ) -> Result<Self, DeployError> {
        let record = stores.deployments.create_deployment(new).await?;
        if let Err(e) = logs.append_log(&record.log_path, INITIAL_LOG_LINE).await {
            tracing::warn!(deployment = %record.id, "cannot write deployment log: {}", e);
        }
        tracing::info!(deployment = %record.id, target = %record.target, title = %record.title, "deployment claimed");
        Ok(Self {
            record,
            target,
            preview,
            domain,
            state: Claimed,
        })
    }

    /// Resolve the orchestrator for target kinds that run on a cluster.
    pub async fn prepare(self, factory: &OrchestratorFactory) -> TransitionResult<Prepared, Claimed> {
        if !self.record.target.kind().needs_orchestrator() {
            return Ok(self.transition(Prepared { orchestrator: None }));
        }
        match factory.for_server(self.target.server_id()).await {
            Ok(orchestrator) => Ok(self.transition(Prepared {
                orchestrator: Some(orchestrator),
            })),
            Err(e) => Err((self, e.into())),
        }
    }
}

impl ActiveDeployment<Prepared> {
    fn context<'a>(
        &'a self,
        logs: &'a dyn LogSink,
        remote: &'a dyn RemoteExec,
        pid: &'a PidReporter,
    ) -> BuildContext<'a> {
        BuildContext {
            record: &self.record,
            target: &self.target,
            intent: self.record.intent,
            orchestrator: self.state.orchestrator(),
            preview: self.preview.as_ref().map(|deployment| PreviewContext {
                deployment,
                domain: self.domain.as_ref(),
            }),
            logs,
            remote,
            pid,
        }
    }

    /// Run the build step.
    pub async fn build(
        self,
        step: &dyn BuildStep,
        logs: &dyn LogSink,
        remote: &dyn RemoteExec,
        pid: &PidReporter,
    ) -> TransitionResult<Built, Prepared> {
        let result = step
            .build_and_start(&self.context(logs, remote, pid))
            .await;
        match result {
            Ok(output) => Ok(self.transition(Built { output })),
            Err(e) => Err((self, e.into())),
        }
    }

    /// Redeploy the image and environment captured by a rollback record.
    pub async fn replay(
        self,
        stores: &Stores,
        rollback: &RollbackId,
        logs: &dyn LogSink,
        remote: &dyn RemoteExec,
        pid: &PidReporter,
    ) -> TransitionResult<Built, Prepared> {
        let record = match stores.rollbacks.get_rollback(rollback).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err((self, DeployError::not_found("rollback", rollback))),
            Err(e) => return Err((self, e.into())),
        };
        let ResolvedTarget::Application(app) = &self.target else {
            let err = DeployError::Validation(format!(
                "rollbacks apply to applications, not {}",
                self.record.target.kind()
            ));
            return Err((self, err));
        };

        let ctx = self.context(logs, remote, pid);
        ctx.log(&format!("Rolling back to v{} ({})", record.version, record.image))
            .await;
        let result = build::deploy_image(&ctx, app, &record.image, &record.env).await;
        match result {
            Ok(output) => Ok(self.transition(Built { output })),
            Err(e) => Err((self, e.into())),
        }
    }
}

impl ActiveDeployment<Built> {
    /// Finish the record as `done`.
    pub async fn complete(
        self,
        stores: &Stores,
        logs: &dyn LogSink,
    ) -> Result<(DeploymentRecord, build::BuildOutput), DeployError> {
        let line = match self.record.intent {
            DeploymentIntent::Deploy => "Deployment completed",
            DeploymentIntent::Redeploy => "Redeployment completed",
        };
        if let Err(e) = logs.append_log(&self.record.log_path, line).await {
            tracing::debug!(deployment = %self.record.id, "cannot write deployment log: {}", e);
        }
        let record = finish(stores, &self.record, DeploymentStatus::Done, None).await?;
        tracing::info!(deployment = %record.id, target = %record.target, status = %record.status, "deployment finished");
        Ok((record, self.state.output))
    }
}

async fn finish(
    stores: &Stores,
    record: &DeploymentRecord,
    status: DeploymentStatus,
    error_message: Option<String>,
) -> Result<DeploymentRecord, DeployError> {
    match stores
        .deployments
        .finish_deployment(&record.id, status, error_message)
        .await
    {
        Ok(record) => Ok(record),
        Err(StoreError::InvalidTransition { .. }) => stores
            .deployments
            .get_deployment(&record.id)
            .await?
            .ok_or_else(|| DeployError::not_found("deployment", &record.id)),
        Err(e) => Err(e.into()),
    }
}
