// ABOUTME: Hands out one orchestrator adapter per server and caches it.
// ABOUTME: Cache entries are keyed by server and dropped when the server's settings change.

use parking_lot::Mutex;
use snafu::Snafu;
use std::collections::HashMap;
use std::sync::Arc;

use super::capabilities::Orchestrator;
use super::config::{ClusterSelection, OrchestratorConfig};
use super::detection::{ConnectError, Connector, detect};
use super::error::OrchestratorError;
use super::types::{ClusterCapabilities, ClusterType};
use crate::store::{Server, StoreError, TargetStore};
use crate::types::{ApplicationId, ServerId};

/// Cache key for the control node itself.
const LOCAL_KEY: &str = "local";

/// Error while resolving an orchestrator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FactoryError {
    #[snafu(display("server {server} is not registered"))]
    UnknownServer { server: ServerId },

    #[snafu(display("application {application} is not registered"))]
    UnknownApplication { application: ApplicationId },

    #[snafu(display("server lookup failed: {source}"))]
    Lookup { source: StoreError },

    #[snafu(display("orchestrator connection failed: {source}"))]
    Connection { source: ConnectError },

    #[snafu(display("orchestrator request failed: {source}"))]
    Orchestrator { source: OrchestratorError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryErrorKind {
    /// Server or application row is missing.
    NotFound,
    /// Persistence failed.
    Store,
    /// SSH tunnel to the server failed.
    SshError,
    /// The cluster API could not be reached or refused the request.
    ConnectionFailed,
}

impl FactoryError {
    pub fn kind(&self) -> FactoryErrorKind {
        match self {
            FactoryError::UnknownServer { .. } | FactoryError::UnknownApplication { .. } => {
                FactoryErrorKind::NotFound
            }
            FactoryError::Lookup { .. } => FactoryErrorKind::Store,
            FactoryError::Connection { source } => match source {
                ConnectError::Ssh(_) => FactoryErrorKind::SshError,
                ConnectError::Orchestrator(_) => FactoryErrorKind::ConnectionFailed,
            },
            FactoryError::Orchestrator { .. } => FactoryErrorKind::ConnectionFailed,
        }
    }
}

impl From<StoreError> for FactoryError {
    fn from(source: StoreError) -> Self {
        FactoryError::Lookup { source }
    }
}

impl From<ConnectError> for FactoryError {
    fn from(source: ConnectError) -> Self {
        FactoryError::Connection { source }
    }
}

impl From<OrchestratorError> for FactoryError {
    fn from(source: OrchestratorError) -> Self {
        FactoryError::Orchestrator { source }
    }
}

struct CachedEntry {
    /// Settings the adapter was built from.
    config: OrchestratorConfig,
    orchestrator: Orchestrator,
}

/// Produces the adapter for a server.
///
/// At most one adapter is cached per server. A cached adapter is reused while
/// the server's orchestrator settings are unchanged; a changed fingerprint
/// rebuilds it. Invalidation swaps the map entry out, so callers holding an
/// adapter keep using it undisturbed.
pub struct OrchestratorFactory {
    targets: Arc<dyn TargetStore>,
    connector: Arc<dyn Connector>,
    local: OrchestratorConfig,
    cache: Mutex<HashMap<String, CachedEntry>>,
}

impl std::fmt::Debug for OrchestratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorFactory")
            .field("local", &self.local)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl OrchestratorFactory {
    /// `local` configures the adapter for targets not pinned to a server.
    pub fn new(
        targets: Arc<dyn TargetStore>,
        connector: Arc<dyn Connector>,
        local: OrchestratorConfig,
    ) -> Self {
        Self {
            targets,
            connector,
            local,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Adapter for a server, or for the control node when `server` is `None`.
    pub async fn for_server(
        &self,
        server: Option<&ServerId>,
    ) -> Result<Orchestrator, FactoryError> {
        let record = match server {
            Some(id) => Some(self.server(id).await?),
            None => None,
        };
        let key = server
            .map(|s| s.to_string())
            .unwrap_or_else(|| LOCAL_KEY.to_string());
        let config = record
            .as_ref()
            .map(|s| s.orchestrator.clone())
            .unwrap_or_else(|| self.local.clone());

        if let Some(entry) = self.cache.lock().get(&key)
            && entry.config == config
        {
            return Ok(entry.orchestrator.clone());
        }

        let orchestrator = self.build(record.as_ref(), &config, false).await?;
        let fingerprint = if self.persists_detection(record.as_ref(), &config) {
            config.with_cluster(ClusterSelection::from(orchestrator.cluster_type()))
        } else {
            config
        };

        tracing::debug!(
            server = %key,
            cluster = %orchestrator.cluster_type(),
            "caching orchestrator"
        );
        self.cache.lock().insert(
            key,
            CachedEntry {
                config: fingerprint,
                orchestrator: orchestrator.clone(),
            },
        );
        Ok(orchestrator)
    }

    /// Adapter for the server an application is pinned to.
    pub async fn for_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Orchestrator, FactoryError> {
        let app = self
            .targets
            .get_application(application)
            .await?
            .ok_or_else(|| FactoryError::UnknownApplication {
                application: application.clone(),
            })?;
        self.for_server(app.server_id.as_ref()).await
    }

    /// Build an uncached adapter for the control node from explicit settings.
    ///
    /// `force_detect` probes the cluster even when the type is pinned.
    pub async fn create(
        &self,
        config: &OrchestratorConfig,
        force_detect: bool,
    ) -> Result<Orchestrator, FactoryError> {
        self.build(None, config, force_detect).await
    }

    /// Re-probe a server's cluster type and store the result.
    ///
    /// The server's cached adapter is dropped; the next lookup rebuilds it.
    pub async fn redetect(
        &self,
        server: Option<&ServerId>,
    ) -> Result<Orchestrator, FactoryError> {
        let record = match server {
            Some(id) => Some(self.server(id).await?),
            None => None,
        };
        let config = record
            .as_ref()
            .map(|s| s.orchestrator.clone())
            .unwrap_or_else(|| self.local.clone());
        let key = server.map(|s| s.as_str()).unwrap_or(LOCAL_KEY);
        self.cache.lock().remove(key);
        let orchestrator = self.build(record.as_ref(), &config, true).await?;
        if let Some(server) = &record {
            self.targets
                .update_server_cluster(&server.id, orchestrator.cluster_type())
                .await?;
        }
        Ok(orchestrator)
    }

    /// Drop one server's cached adapter, or every cached adapter.
    pub fn clear_cache(&self, server: Option<&ServerId>) {
        let mut cache = self.cache.lock();
        match server {
            Some(id) => {
                if cache.remove(id.as_str()).is_some() {
                    tracing::debug!(server = %id, "cleared cached orchestrator");
                }
            }
            None => {
                tracing::debug!(entries = cache.len(), "cleared orchestrator cache");
                cache.clear();
            }
        }
    }

    /// The cached adapter for a server, without building one.
    pub fn cached(&self, server: Option<&ServerId>) -> Option<Orchestrator> {
        let key = server.map(|s| s.as_str()).unwrap_or(LOCAL_KEY);
        self.cache.lock().get(key).map(|e| e.orchestrator.clone())
    }

    /// Number of cached adapters.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Probe a server's optional cluster features and store them on the server row.
    pub async fn detect_capabilities(
        &self,
        server: Option<&ServerId>,
    ) -> Result<ClusterCapabilities, FactoryError> {
        let orchestrator = self.for_server(server).await?;
        let capabilities = orchestrator.cluster_capabilities().await?;
        if let Some(id) = server {
            self.targets
                .update_server_capabilities(id, capabilities.clone())
                .await?;
        }
        Ok(capabilities)
    }

    /// Drop every cached adapter.
    pub fn close(&self) {
        self.clear_cache(None);
    }

    async fn server(&self, id: &ServerId) -> Result<Server, FactoryError> {
        self.targets
            .get_server(id)
            .await?
            .ok_or_else(|| FactoryError::UnknownServer { server: id.clone() })
    }

    fn persists_detection(&self, server: Option<&Server>, config: &OrchestratorConfig) -> bool {
        server.is_some() && config.cluster == ClusterSelection::Auto
    }

    async fn build(
        &self,
        server: Option<&Server>,
        config: &OrchestratorConfig,
        force_detect: bool,
    ) -> Result<Orchestrator, FactoryError> {
        let pinned = match config.cluster {
            ClusterSelection::Swarm => Some(ClusterType::Swarm),
            ClusterSelection::Kubernetes => Some(ClusterType::Kubernetes),
            ClusterSelection::Auto => None,
        };

        let orchestrator = match pinned {
            Some(cluster) if !force_detect => {
                self.connector.connect(server, cluster, config).await?
            }
            _ => detect(self.connector.as_ref(), server, config).await?,
        };

        if let Some(server) = server
            && self.persists_detection(Some(server), config)
        {
            self.targets
                .update_server_cluster(&server.id, orchestrator.cluster_type())
                .await?;
        }
        Ok(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::memory::MemoryCluster;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl Connector for Counting {
        async fn connect(
            &self,
            _server: Option<&Server>,
            cluster: ClusterType,
            _config: &OrchestratorConfig,
        ) -> Result<Orchestrator, ConnectError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryCluster::new(cluster)).into_orchestrator())
        }
    }

    fn factory() -> (OrchestratorFactory, Arc<Counting>) {
        let connector = Arc::new(Counting {
            builds: AtomicUsize::new(0),
        });
        let store = Arc::new(crate::store::MemoryStore::new());
        let factory = OrchestratorFactory::new(store, connector.clone(), OrchestratorConfig::swarm());
        (factory, connector)
    }

    #[tokio::test]
    async fn local_adapter_is_cached() {
        let (factory, connector) = factory();
        let first = factory.for_server(None).await.unwrap();
        let second = factory.for_server(None).await.unwrap();
        assert!(first.same_instance(&second));
        assert_eq!(connector.builds.load(Ordering::SeqCst), 1);
        assert!(factory.cached(None).unwrap().same_instance(&first));
    }

    #[tokio::test]
    async fn clearing_keeps_handed_out_adapters_usable() {
        let (factory, _) = factory();
        let held = factory.for_server(None).await.unwrap();
        factory.clear_cache(None);
        assert_eq!(factory.cache_len(), 0);
        assert!(held.health_check().await.unwrap().healthy);

        let rebuilt = factory.for_server(None).await.unwrap();
        assert!(!held.same_instance(&rebuilt));
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let (factory, _) = factory();
        let err = factory
            .for_server(Some(&ServerId::new("missing")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FactoryErrorKind::NotFound);
    }
}
