// ABOUTME: Configuration types and parsing for flotilla.yml.
// ABOUTME: Handles discovery, YAML parsing, env var interpolation, and seeding the target store.

mod application;
mod deserialize;
mod env_value;
mod init;
mod server;

pub use application::{ApplicationConfig, ComposeConfig};
pub use env_value::EnvValue;
pub use init::init_config;
pub use server::ServerConfig;

use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::{DEFAULT_CONCURRENCY, DEFAULT_JOB_TIMEOUT, DispatchMode};
use crate::error::{Error, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::store::MemoryStore;
use crate::types::OrganizationId;
use deserialize::{deserialize_applications, deserialize_servers};

pub const CONFIG_FILENAME: &str = "flotilla.yml";
pub const CONFIG_FILENAME_ALT: &str = "flotilla.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".flotilla/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default)]
    pub mode: DispatchMode,

    #[serde(default = "default_organization")]
    pub organization: String,

    /// Address of the control node, used in preview hosts of local apps.
    #[serde(default)]
    pub local_ip: Option<String>,

    /// Orchestrator of the control node itself.
    #[serde(default)]
    pub local: OrchestratorConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default, deserialize_with = "deserialize_servers")]
    pub servers: BTreeMap<String, ServerConfig>,

    #[serde(deserialize_with = "deserialize_applications")]
    pub applications: NonEmpty<ApplicationConfig>,

    #[serde(default)]
    pub compose: Vec<ComposeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_timeout: default_job_timeout(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("/var/lib/flotilla/logs")
}

fn default_organization() -> String {
    "default".to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_job_timeout() -> Duration {
    DEFAULT_JOB_TIMEOUT
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "queue.concurrency must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        let servers = self
            .applications
            .iter()
            .map(|a| (a.name.as_str(), a.server.as_deref()))
            .chain(
                self.compose
                    .iter()
                    .map(|c| (c.name.as_str(), c.server.as_deref())),
            );
        for (name, server) in servers {
            if !names.insert(name) {
                return Err(Error::InvalidConfig(format!("duplicate name: {}", name)));
            }
            if let Some(server) = server
                && !self.servers.contains_key(server)
            {
                return Err(Error::InvalidConfig(format!(
                    "{} refers to unknown server {}",
                    name, server
                )));
            }
        }
        Ok(())
    }

    pub fn organization_id(&self) -> OrganizationId {
        OrganizationId::new(self.organization.as_str())
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name.as_str() == name)
    }

    /// Load every server, application, and compose stack into `store`.
    pub fn seed(&self, store: &MemoryStore) -> Result<()> {
        let organization = self.organization_id();
        for (id, server) in &self.servers {
            store.insert_server(server.to_server(id));
        }
        for app in self.applications.iter() {
            store.insert_application(app.to_application(&organization)?);
        }
        for compose in &self.compose {
            store.insert_compose(compose.to_compose(&organization));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
applications:
  - name: web
    image: nginx:1.27
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.mode, DispatchMode::SelfHosted);
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.queue.job_timeout, Duration::from_secs(1800));
        assert!(config.servers.is_empty());
        assert_eq!(config.applications.len(), 1);
    }

    #[test]
    fn rejects_unknown_server_reference() {
        let yaml = r#"
applications:
  - name: web
    image: nginx:1.27
    server: edge
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_application_list() {
        assert!(Config::from_yaml("applications: []\n").is_err());
    }
}
