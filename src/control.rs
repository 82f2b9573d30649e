// ABOUTME: The operation surface of the control plane.
// ABOUTME: Wires stores, the orchestrator factory, schedulers, rollbacks, and previews together.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::build::BuildStep;
use crate::config::Config;
use crate::deploy::{
    self, DEFAULT_CONCURRENCY, DEFAULT_JOB_TIMEOUT, DeploymentJob, DirectDispatch, DispatchMode,
    InProcessQueue, QueueStatus, RecordHandle, RoutedScheduler, Scheduler, TargetLocks, Worker,
    default_title,
};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::logs::{FileLogSink, LogSink};
use crate::notify::{Notifier, TracingNotifier};
use crate::orchestrator::{
    Capability, ClusterCapabilities, ClusterConnector, ClusterType, HealthStatus, Orchestrator,
    OrchestratorFactory,
};
use crate::preview::{PreviewController, PreviewOutcome, PullRequestEvent};
use crate::remote::{RemoteExec, SshExec};
use crate::ssh::SessionPool;
use crate::rollback::RollbackEngine;
use crate::store::{
    DeploymentIntent, DeploymentRecord, MemoryStore, RollbackRecord, Stores, TargetRef,
};
use crate::types::{ApplicationId, DeploymentId, RollbackId, ServerId};

/// What to report cluster health for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTarget {
    /// A registered server, or the control node for `None`.
    Server(Option<ServerId>),
    /// The server an application is pinned to.
    Application(ApplicationId),
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub server: Option<ServerId>,
    pub cluster: ClusterType,
    pub health: HealthStatus,
    pub capabilities: Vec<Capability>,
}

/// Assembles a [`ControlPlane`] from its collaborators.
pub struct ControlPlaneBuilder {
    stores: Stores,
    factory: Arc<OrchestratorFactory>,
    remote: Arc<dyn RemoteExec>,
    logs_dir: PathBuf,
    mode: DispatchMode,
    concurrency: usize,
    job_timeout: Duration,
    build: Option<Arc<dyn BuildStep>>,
    logs: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    local_ip: Option<String>,
    ssh: Option<Arc<SessionPool>>,
}

impl ControlPlaneBuilder {
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
            logs_dir: logs_dir.into(),
            mode: DispatchMode::default(),
            concurrency: DEFAULT_CONCURRENCY,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            build: None,
            logs: Arc::new(FileLogSink::new()),
            notifier: Arc::new(TracingNotifier),
            local_ip: None,
            ssh: None,
        }
    }

    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn build_step(mut self, build: Arc<dyn BuildStep>) -> Self {
        self.build = Some(build);
        self
    }

    pub fn log_sink(mut self, logs: Arc<dyn LogSink>) -> Self {
        self.logs = logs;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn local_ip(mut self, ip: Option<String>) -> Self {
        self.local_ip = ip;
        self
    }

    /// SSH pool closed on shutdown.
    pub fn ssh_pool(mut self, ssh: Arc<SessionPool>) -> Self {
        self.ssh = Some(ssh);
        self
    }

    pub fn build(self) -> ControlPlane {
        let mut worker = Worker::new(
            self.stores.clone(),
            self.factory.clone(),
            self.remote.clone(),
            self.logs_dir,
        )
        .with_log_sink(self.logs.clone())
        .with_notifier(self.notifier.clone())
        .with_job_timeout(self.job_timeout);
        if let Some(build) = self.build {
            worker = worker.with_build_step(build);
        }
        let worker = Arc::new(worker);

        let locks = TargetLocks::new();
        let queue = Arc::new(InProcessQueue::new(
            worker.clone(),
            locks.clone(),
            self.concurrency,
        ));
        let direct = Arc::new(DirectDispatch::new(worker, locks.clone()));
        let scheduler: Arc<dyn Scheduler> =
            Arc::new(RoutedScheduler::new(self.mode, queue.clone(), direct));

        let rollbacks = RollbackEngine::new(
            self.stores.rollbacks.clone(),
            self.stores.targets.clone(),
            scheduler.clone(),
            self.remote.clone(),
        );
        let previews = PreviewController::new(
            self.stores.clone(),
            self.factory.clone(),
            scheduler.clone(),
            locks,
            self.logs.clone(),
        )
        .with_notifier(self.notifier)
        .with_local_ip(self.local_ip);

        ControlPlane {
            stores: self.stores,
            factory: self.factory,
            remote: self.remote,
            logs: self.logs,
            queue,
            scheduler,
            rollbacks,
            previews,
            ssh: self.ssh,
        }
    }
}

/// Entry point for every deployment operation.
///
/// Owns the process-wide queue and adapter cache; call [`ControlPlane::shutdown`]
/// before dropping it so running jobs finish and connections close.
pub struct ControlPlane {
    stores: Stores,
    factory: Arc<OrchestratorFactory>,
    remote: Arc<dyn RemoteExec>,
    logs: Arc<dyn LogSink>,
    queue: Arc<InProcessQueue>,
    scheduler: Arc<dyn Scheduler>,
    rollbacks: RollbackEngine,
    previews: PreviewController,
    ssh: Option<Arc<SessionPool>>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("factory", &self.factory)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    /// In-memory control plane for the targets in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        config.seed(&store)?;
        let stores = Stores::shared(store);

        let ssh = Arc::new(SessionPool::new(stores.targets.clone()));
        let connector = Arc::new(ClusterConnector::new(ssh.clone()));
        let remote = Arc::new(SshExec::new(ssh.clone()));
        let factory = Arc::new(OrchestratorFactory::new(
            stores.targets.clone(),
            connector,
            config.local.clone(),
        ));

        Ok(
            ControlPlaneBuilder::new(stores, factory, remote, config.logs_dir.clone())
                .mode(config.mode)
                .concurrency(config.queue.concurrency)
                .job_timeout(config.queue.job_timeout)
                .local_ip(config.local_ip.clone())
                .ssh_pool(ssh)
                .build(),
        )
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn factory(&self) -> &Arc<OrchestratorFactory> {
        &self.factory
    }

    pub fn logs(&self) -> &dyn LogSink {
        self.logs.as_ref()
    }

    /// Queue a deploy or redeploy of a target.
    ///
    /// The target is checked before anything is queued, so an unknown target
    /// or an unsupported intent never produces a record.
    #[tracing::instrument(skip(self), fields(target = %target))]
    pub async fn submit_deploy(
        &self,
        target: TargetRef,
        intent: DeploymentIntent,
    ) -> Result<RecordHandle> {
        let resolved = self
            .stores
            .targets
            .resolve_target(&target)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "target",
                id: target.to_string(),
            })?;
        if intent == DeploymentIntent::Redeploy && !target.kind().supports_redeploy() {
            return Err(Error::Validation(format!(
                "{} targets cannot be redeployed",
                target.kind()
            )));
        }

        let job = DeploymentJob::new(target, intent, default_title(intent))
            .on_server(resolved.server_id().cloned());
        Ok(self.scheduler.submit(job).await?)
    }

    pub async fn kill_deployment(&self, id: &DeploymentId) -> Result<DeploymentRecord> {
        let record =
            deploy::kill_deployment(&self.stores, self.remote.as_ref(), self.logs.as_ref(), id)
                .await?;
        Ok(record)
    }

    /// Adapter for the server a target runs on.
    pub async fn orchestrator(&self, target: &HealthTarget) -> Result<Orchestrator> {
        Ok(match target {
            HealthTarget::Server(server) => self.factory.for_server(server.as_ref()).await?,
            HealthTarget::Application(app) => self.factory.for_application(app).await?,
        })
    }

    pub async fn get_adapter_health(&self, target: HealthTarget) -> Result<AdapterHealth> {
        let server = match &target {
            HealthTarget::Server(server) => server.clone(),
            HealthTarget::Application(app) => self
                .stores
                .targets
                .get_application(app)
                .await?
                .ok_or_else(|| Error::NotFound {
                    entity: "application",
                    id: app.to_string(),
                })?
                .server_id,
        };
        let orchestrator = self.orchestrator(&target).await?;
        let health = orchestrator.health_check().await?;
        Ok(AdapterHealth {
            server,
            cluster: orchestrator.cluster_type(),
            health,
            capabilities: orchestrator.capabilities().supported(),
        })
    }

    /// Re-probe the cluster type of a server.
    pub async fn detect(&self, server: Option<&ServerId>) -> Result<ClusterType> {
        Ok(self.factory.redetect(server).await?.cluster_type())
    }

    pub async fn detect_capabilities(
        &self,
        server: Option<&ServerId>,
    ) -> Result<ClusterCapabilities> {
        Ok(self.factory.detect_capabilities(server).await?)
    }

    pub async fn rollback(&self, id: &RollbackId) -> Result<RecordHandle> {
        Ok(self.rollbacks.rollback(id).await?)
    }

    pub async fn remove_rollback(&self, id: &RollbackId) -> Result<()> {
        Ok(self.rollbacks.remove_rollback(id).await?)
    }

    pub async fn list_rollbacks(&self, application: &ApplicationId) -> Result<Vec<RollbackRecord>> {
        Ok(self.rollbacks.list_rollbacks(application).await?)
    }

    pub async fn on_pull_request_event(&self, event: &PullRequestEvent) -> Result<PreviewOutcome> {
        Ok(self.previews.on_pull_request_event(event).await?)
    }

    /// Cancel the target's waiting jobs. Returns how many were cancelled.
    pub fn clean_queue(&self, target: &TargetRef) -> usize {
        self.scheduler.clean_queue(target)
    }

    /// Cancel every job still waiting in the queue.
    pub fn cancel_all_waiting(&self) -> usize {
        self.queue.cancel_all_waiting()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.scheduler.status()
    }

    /// Drop the cached adapter of one server, or all of them.
    pub fn clear_orchestrator_cache(&self, server: Option<&ServerId>) {
        self.factory.clear_cache(server);
    }

    /// Forget a target's deployment history: waiting jobs, records, and logs.
    pub async fn remove_target_deployments(&self, target: &TargetRef) -> Result<Diagnostics> {
        let cancelled = self.clean_queue(target);
        let previews = match target.application_id() {
            Some(app) => self
                .stores
                .previews
                .list_previews(app)
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect(),
            None => Vec::new(),
        };
        let diagnostics =
            deploy::remove_target_deployments(&self.stores, self.logs.as_ref(), target, &previews)
                .await;
        tracing::info!(target = %target, cancelled, "removed target deployments");
        Ok(diagnostics)
    }

    /// Drain both schedulers, then drop cached adapters and SSH sessions.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.factory.close();
        if let Some(ssh) = &self.ssh {
            ssh.close().await;
        }
        tracing::info!("control plane stopped");
    }
}
