// ABOUTME: The step that builds a target and starts it on its cluster.
// ABOUTME: Image rollouts for applications, shell commands for stacks, servers, schedules, and backups.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::logs::LogSink;
use crate::orchestrator::{
    ClusterType, DeploymentInfo, DeploymentSpec, Orchestrator, OrchestratorError,
};
use crate::remote::{CommandOutput, ExecTarget, ProcessEvent, RemoteError, RemoteExec};
use crate::store::{
    Application, DeploymentIntent, DeploymentRecord, DeploymentStore, Domain, PreviewDeployment,
    ResolvedTarget,
};
use crate::types::{DeploymentId, ImageRef};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{0} targets need an orchestrator")]
    MissingOrchestrator(String),

    #[error("nothing to run for {0}")]
    NothingToRun(String),

    #[error("command exited with status {exit_code}")]
    CommandFailed { exit_code: u32 },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Records the pid of the process doing the work, so it can be killed.
#[derive(Clone)]
pub struct PidReporter {
    store: Arc<dyn DeploymentStore>,
    deployment: DeploymentId,
}

impl PidReporter {
    pub fn new(store: Arc<dyn DeploymentStore>, deployment: DeploymentId) -> Self {
        Self { store, deployment }
    }

    pub async fn report(&self, pid: u32) {
        if let Err(e) = self.store.set_process_id(&self.deployment, pid).await {
            tracing::warn!(deployment = %self.deployment, pid, "cannot record process id: {}", e);
        }
    }
}

/// Preview being deployed, with its routed domain.
#[derive(Debug, Clone, Copy)]
pub struct PreviewContext<'a> {
    pub deployment: &'a PreviewDeployment,
    pub domain: Option<&'a Domain>,
}

/// Everything a build step may touch for one deployment.
pub struct BuildContext<'a> {
    pub record: &'a DeploymentRecord,
    pub target: &'a ResolvedTarget,
    pub intent: DeploymentIntent,
    pub orchestrator: Option<&'a Orchestrator>,
    pub preview: Option<PreviewContext<'a>>,
    pub logs: &'a dyn LogSink,
    pub remote: &'a dyn RemoteExec,
    pub pid: &'a PidReporter,
}

impl BuildContext<'_> {
    /// Append a line to the deployment log. Write failures are only traced.
    pub async fn log(&self, line: &str) {
        if let Err(e) = self.logs.append_log(&self.record.log_path, line).await {
            tracing::warn!(deployment = %self.record.id, "cannot write deployment log: {}", e);
        }
    }

    /// Run a shell command on the target's host, streaming its output into the log.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, BuildError> {
        let exec_target = ExecTarget::for_server(self.target.server_id());
        tracing::debug!(deployment = %self.record.id, target = %exec_target, "running command");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let spawned = self.remote.spawn(&exec_target, command, tx);
        let relay = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ProcessEvent::Started(pid) => self.pid.report(pid).await,
                    ProcessEvent::Line(line) => self.log(&line).await,
                }
            }
        };
        let (output, ()) = tokio::join!(spawned, relay);
        let output = output?;
        if !output.success() {
            return Err(BuildError::CommandFailed {
                exit_code: output.exit_code,
            });
        }
        Ok(output)
    }

    fn orchestrator(&self) -> Result<&Orchestrator, BuildError> {
        self.orchestrator
            .ok_or_else(|| BuildError::MissingOrchestrator(self.record.target.kind().to_string()))
    }
}

/// What a successful build left running.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Image now serving the target, for application deploys.
    pub image: Option<ImageRef>,
    pub env: BTreeMap<String, String>,
    pub info: Option<DeploymentInfo>,
}

/// Builds a target and starts it.
#[async_trait]
pub trait BuildStep: Send + Sync {
    async fn build_and_start(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput, BuildError>;
}

/// Runs the target's configured command.
///
/// Compose stacks run their deploy command, servers their setup command, and
/// schedules and backups their job command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuildStep;

impl CommandBuildStep {
    fn command_for(target: &ResolvedTarget) -> Option<&str> {
        match target {
            ResolvedTarget::Application(app) => app.build_command.as_deref(),
            ResolvedTarget::Compose(stack) => Some(stack.command.as_str()),
            ResolvedTarget::Server(server) => server.setup_command.as_deref(),
            ResolvedTarget::Schedule(_, t)
            | ResolvedTarget::Backup(_, t)
            | ResolvedTarget::VolumeBackup(_, t) => Some(t.command.as_str()),
        }
    }
}

#[async_trait]
impl BuildStep for CommandBuildStep {
    async fn build_and_start(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput, BuildError> {
        let command = Self::command_for(ctx.target)
            .ok_or_else(|| BuildError::NothingToRun(ctx.target.target_ref().to_string()))?;
        ctx.log(&format!("$ {}", command)).await;
        ctx.run(command).await?;
        Ok(BuildOutput::default())
    }
}

/// Rolls an application's image out through its orchestrator.
///
/// An application with a build command rebuilds its image first, on deploys
/// and redeploys alike. Other target kinds are handed to [`CommandBuildStep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageBuildStep {
    commands: CommandBuildStep,
}

impl ImageBuildStep {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStep for ImageBuildStep {
    async fn build_and_start(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput, BuildError> {
        let app = match ctx.target {
            ResolvedTarget::Application(app) => app,
            _ => return self.commands.build_and_start(ctx).await,
        };
        let orchestrator = ctx.orchestrator()?;

        if let Some(command) = &app.build_command {
            if ctx.intent == DeploymentIntent::Redeploy {
                ctx.log("Rebuilding without new source changes").await;
            }
            ctx.log(&format!("$ {}", command)).await;
            ctx.run(command).await?;
        }

        let spec = application_spec(app, ctx.preview, orchestrator.cluster_type());
        deploy_spec(ctx, orchestrator, spec).await
    }
}

/// Roll out an explicit image and environment for an application.
///
/// Used when replaying a rollback.
pub async fn deploy_image(
    ctx: &BuildContext<'_>,
    app: &Application,
    image: &ImageRef,
    env: &BTreeMap<String, String>,
) -> Result<BuildOutput, BuildError> {
    let orchestrator = ctx.orchestrator()?;
    let mut spec = application_spec(app, None, orchestrator.cluster_type());
    spec.image = image.clone();
    spec.env = env.clone();
    deploy_spec(ctx, orchestrator, spec).await
}

async fn deploy_spec(
    ctx: &BuildContext<'_>,
    orchestrator: &Orchestrator,
    spec: DeploymentSpec,
) -> Result<BuildOutput, BuildError> {
    ctx.log(&format!(
        "Deploying {} as {} on {}",
        spec.image,
        spec.name,
        orchestrator.cluster_type()
    ))
    .await;
    let info = orchestrator.deploy_application(&spec).await?;
    ctx.log(&format!(
        "Service {} is {:?} ({}/{} replicas ready)",
        info.name, info.state, info.replicas.ready, info.replicas.desired
    ))
    .await;

    Ok(BuildOutput {
        image: Some(spec.image),
        env: spec.env,
        info: Some(info),
    })
}

/// Desired workload for an application, or for one of its previews.
pub fn application_spec(
    app: &Application,
    preview: Option<PreviewContext<'_>>,
    cluster: ClusterType,
) -> DeploymentSpec {
    let Some(preview) = preview else {
        let mut spec = DeploymentSpec::new(app.app_name.clone(), app.image.clone());
        spec.replicas = app.replicas;
        spec.env = app.env.clone();
        spec.port = app.port;
        return spec;
    };

    let mut spec = DeploymentSpec::new(preview.deployment.app_name.clone(), app.image.clone());
    spec.env = app.env.clone();
    spec.env.extend(app.preview.env.clone());
    spec.port = Some(app.preview.port);

    if cluster == ClusterType::Swarm
        && let Some(domain) = preview.domain
    {
        let router = preview.deployment.app_name.as_str();
        let entrypoint = if domain.https { "websecure" } else { "web" };
        spec.labels.insert("traefik.enable".into(), "true".into());
        spec.labels.insert(
            format!("traefik.http.routers.{}.rule", router),
            format!("Host(`{}`)", domain.host),
        );
        spec.labels.insert(
            format!("traefik.http.routers.{}.entrypoints", router),
            entrypoint.into(),
        );
        spec.labels.insert(
            format!("traefik.http.services.{}.loadbalancer.server.port", router),
            domain.port.to_string(),
        );
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PreviewSettings, PreviewStatus};
    use crate::types::{AppName, ApplicationId, DomainId, OrganizationId, PreviewId};
    use chrono::Utc;

    fn app() -> Application {
        Application {
            id: ApplicationId::new("app-1"),
            organization_id: OrganizationId::new("org"),
            name: "Web".into(),
            app_name: AppName::new("web").unwrap(),
            server_id: None,
            image: ImageRef::parse("registry.local/web:1.0").unwrap(),
            env: BTreeMap::from([("MODE".into(), "prod".into())]),
            replicas: 3,
            port: Some(8080),
            repository: None,
            owner: None,
            branch: None,
            build_command: None,
            preview: PreviewSettings {
                env: BTreeMap::from([("MODE".into(), "preview".into())]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn previews_run_one_replica_with_layered_env() {
        let app = app();
        let preview = PreviewDeployment {
            id: PreviewId::new("p1"),
            application_id: app.id.clone(),
            branch: "feature".into(),
            pull_request_id: "77".into(),
            pull_request_number: "7".into(),
            pull_request_title: "Add login".into(),
            pull_request_url: "https://git.local/pr/7".into(),
            status: PreviewStatus::Idle,
            app_name: AppName::new("preview-web-abc123").unwrap(),
            domain_id: Some(DomainId::new("d1")),
            created_at: Utc::now(),
            expires_at: None,
        };
        let domain = Domain {
            id: DomainId::new("d1"),
            host: "preview-web-abc123-10-0-0-1.traefik.me".into(),
            https: false,
            port: 3000,
            preview_deployment_id: Some(preview.id.clone()),
        };
        let ctx = PreviewContext {
            deployment: &preview,
            domain: Some(&domain),
        };

        let spec = application_spec(&app, Some(ctx), ClusterType::Swarm);
        assert_eq!(spec.name.as_str(), "preview-web-abc123");
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.env["MODE"], "preview");
        assert_eq!(spec.port, Some(3000));
        assert_eq!(
            spec.labels["traefik.http.routers.preview-web-abc123.rule"],
            "Host(`preview-web-abc123-10-0-0-1.traefik.me`)"
        );

        let spec = application_spec(&app, Some(ctx), ClusterType::Kubernetes);
        assert!(spec.labels.is_empty());
    }

    #[test]
    fn regular_deploys_keep_application_settings() {
        let spec = application_spec(&app(), None, ClusterType::Kubernetes);
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.port, Some(8080));
        assert_eq!(spec.env["MODE"], "prod");
    }
}
