// ABOUTME: Test support utilities.
// ABOUTME: An in-memory control plane with fake clusters, remote hosts, and a gated build step.

#![allow(dead_code)]

use async_trait::async_trait;
use flotilla::build::{BuildContext, BuildError, BuildOutput, BuildStep, ImageBuildStep};
use flotilla::control::{ControlPlane, ControlPlaneBuilder};
use flotilla::notify::RecordingNotifier;
use flotilla::orchestrator::{
    ClusterType, ConnectError, Connector, MemoryCluster, Orchestrator, OrchestratorConfig,
    OrchestratorFactory,
};
use flotilla::preview::{PullRequestAction, PullRequestEvent};
use flotilla::remote::{CommandOutput, ExecTarget, ProcessEvent, RemoteError, RemoteExec};
use flotilla::store::{Application, MemoryStore, PreviewSettings, Server, SshTarget, Stores};
use flotilla::types::{AppName, ApplicationId, ImageRef, OrganizationId, ServerId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("flotilla=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Hands out the same in-memory clusters for every server.
pub struct FixedConnector {
    pub swarm: Arc<MemoryCluster>,
    pub kubernetes: Arc<MemoryCluster>,
    pub connects: AtomicUsize,
}

impl FixedConnector {
    pub fn new(swarm: Arc<MemoryCluster>, kubernetes: Arc<MemoryCluster>) -> Self {
        Self {
            swarm,
            kubernetes,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for FixedConnector {
    async fn connect(
        &self,
        _server: Option<&Server>,
        cluster: ClusterType,
        _config: &OrchestratorConfig,
    ) -> Result<Orchestrator, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(match cluster {
            ClusterType::Swarm => self.swarm.clone().into_orchestrator(),
            ClusterType::Kubernetes => self.kubernetes.clone().into_orchestrator(),
        })
    }
}

/// Records every command and reports success.
#[derive(Default)]
pub struct FakeRemote {
    commands: Mutex<Vec<(ExecTarget, String)>>,
}

impl FakeRemote {
    pub fn commands(&self) -> Vec<(ExecTarget, String)> {
        self.commands.lock().clone()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.commands.lock().iter().any(|(_, c)| c == command)
    }
}

#[async_trait]
impl RemoteExec for FakeRemote {
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        self.commands
            .lock()
            .push((target.clone(), command.to_string()));
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn spawn(
        &self,
        target: &ExecTarget,
        command: &str,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<CommandOutput, RemoteError> {
        let _ = events.send(ProcessEvent::Started(7000));
        let _ = events.send(ProcessEvent::Line(format!("ran {command}")));
        self.execute(target, command).await
    }
}

/// Pid every gated build reports.
pub const BUILD_PID: u32 = 4242;

/// Image rollout that waits for a permit before it starts.
///
/// Tracks how many builds run at once and the order targets started in.
pub struct GatedBuild {
    gate: Option<Arc<Semaphore>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    inner: ImageBuildStep,
}

impl GatedBuild {
    /// Builds run straight through.
    pub fn open() -> Self {
        Self::with_gate(None)
    }

    /// Builds block until [`GatedBuild::release`] hands out permits.
    pub fn closed() -> Self {
        Self::with_gate(Some(Arc::new(Semaphore::new(0))))
    }

    fn with_gate(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            gate,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            inner: ImageBuildStep::new(),
        }
    }

    pub fn release(&self, builds: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(builds);
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl BuildStep for GatedBuild {
    async fn build_and_start(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput, BuildError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started
            .lock()
            .push(ctx.record.target.id_str().to_string());
        ctx.pid.report(BUILD_PID).await;

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        let result = self.inner.build_and_start(ctx).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A control plane over in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub swarm: Arc<MemoryCluster>,
    pub kubernetes: Arc<MemoryCluster>,
    pub connector: Arc<FixedConnector>,
    pub remote: Arc<FakeRemote>,
    pub build: Arc<GatedBuild>,
    pub notifier: Arc<RecordingNotifier>,
    pub control: ControlPlane,
    pub logs_dir: tempfile::TempDir,
}

impl Harness {
    /// Builds run straight through on a local Swarm.
    pub fn new() -> Self {
        Self::with(GatedBuild::open(), |b| b)
    }

    /// Builds wait for [`GatedBuild::release`].
    pub fn gated(configure: impl FnOnce(ControlPlaneBuilder) -> ControlPlaneBuilder) -> Self {
        Self::with(GatedBuild::closed(), configure)
    }

    pub fn with(
        build: GatedBuild,
        configure: impl FnOnce(ControlPlaneBuilder) -> ControlPlaneBuilder,
    ) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::shared(store.clone());
        let swarm = Arc::new(MemoryCluster::swarm());
        let kubernetes = Arc::new(MemoryCluster::kubernetes());
        let connector = Arc::new(FixedConnector::new(swarm.clone(), kubernetes.clone()));
        let factory = Arc::new(OrchestratorFactory::new(
            stores.targets.clone(),
            connector.clone(),
            OrchestratorConfig::swarm(),
        ));
        let remote = Arc::new(FakeRemote::default());
        let build = Arc::new(build);
        let notifier = Arc::new(RecordingNotifier::new());
        let logs_dir = tempfile::tempdir().unwrap();

        let builder = ControlPlaneBuilder::new(stores, factory, remote.clone(), logs_dir.path())
            .build_step(build.clone())
            .notifier(notifier.clone());
        let control = configure(builder).build();

        Self {
            store,
            swarm,
            kubernetes,
            connector,
            remote,
            build,
            notifier,
            control,
            logs_dir,
        }
    }
}

pub const ORGANIZATION: &str = "default";
pub const REPOSITORY: &str = "shop";
pub const OWNER: &str = "acme";
pub const BASE_BRANCH: &str = "main";

/// A local application without previews.
pub fn application(name: &str) -> Application {
    Application {
        id: ApplicationId::new(name),
        organization_id: OrganizationId::new(ORGANIZATION),
        name: name.to_string(),
        app_name: AppName::new(name).unwrap(),
        server_id: None,
        image: ImageRef::parse(&format!("registry.example.com/{name}:v1")).unwrap(),
        env: BTreeMap::from([("RUST_LOG".to_string(), "info".to_string())]),
        replicas: 2,
        port: Some(8080),
        repository: None,
        owner: None,
        branch: None,
        build_command: None,
        preview: PreviewSettings::default(),
    }
}

/// An application that wants previews for pull requests into `main`.
pub fn preview_application(name: &str, limit: usize) -> Application {
    Application {
        repository: Some(REPOSITORY.to_string()),
        owner: Some(OWNER.to_string()),
        branch: Some(BASE_BRANCH.to_string()),
        preview: PreviewSettings {
            enabled: true,
            limit,
            ..Default::default()
        },
        ..application(name)
    }
}

/// A registered Swarm manager.
pub fn server(id: &str, ip: &str) -> Server {
    Server {
        id: ServerId::new(id),
        name: id.to_string(),
        ip: ip.to_string(),
        orchestrator: OrchestratorConfig::swarm(),
        ssh: SshTarget {
            host: ip.to_string(),
            user: "root".to_string(),
            port: 22,
            key_path: None,
            trust_on_first_use: true,
        },
        capabilities: None,
        setup_command: Some("curl -fsSL https://get.docker.com | sh".to_string()),
    }
}

/// A pull request event against the preview repository.
pub fn pull_request(action: PullRequestAction, pr: u32, sha: &str) -> PullRequestEvent {
    PullRequestEvent {
        organization_id: OrganizationId::new(ORGANIZATION),
        action,
        repository: REPOSITORY.to_string(),
        owner: OWNER.to_string(),
        branch: BASE_BRANCH.to_string(),
        head_branch: Some(format!("feature-{pr}")),
        pull_request_id: format!("pr-{pr}"),
        pull_request_number: pr.to_string(),
        title: format!("Feature {pr}"),
        url: format!("https://git.example.com/{OWNER}/{REPOSITORY}/pull/{pr}"),
        head_sha: sha.to_string(),
        labels: Vec::new(),
    }
}
