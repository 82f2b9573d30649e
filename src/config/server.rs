// ABOUTME: Server entries of flotilla.yml.
// ABOUTME: Parses "host", "user@host", "host:port", "user@host:port", or a detailed mapping.

use serde::Deserialize;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::store::{Server, SshTarget};
use crate::types::ServerId;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
    /// Address used in preview hosts; defaults to `host`.
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Command run by server setup deploys.
    #[serde(default)]
    pub setup_command: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_trust_first_connection() -> bool {
    true
}

impl ServerConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, default_port()),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(ServerConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            key_path: None,
            trust_first_connection: default_trust_first_connection(),
            ip: None,
            orchestrator: OrchestratorConfig::default(),
            setup_command: None,
        })
    }

    /// Server row for the id it is registered under.
    pub fn to_server(&self, id: &str) -> Server {
        Server {
            id: ServerId::new(id),
            name: id.to_string(),
            ip: self.ip.clone().unwrap_or_else(|| self.host.clone()),
            orchestrator: self.orchestrator.clone(),
            ssh: SshTarget {
                host: self.host.clone(),
                user: self.user.clone().unwrap_or_else(|| "root".to_string()),
                port: self.port,
                key_path: self.key_path.clone(),
                trust_on_first_use: self.trust_first_connection,
            },
            capabilities: None,
            setup_command: self.setup_command.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_shorthand() {
        let server = ServerConfig::parse("deploy@10.0.0.5:2222").unwrap();
        assert_eq!(server.host, "10.0.0.5");
        assert_eq!(server.port, 2222);
        assert_eq!(server.user.as_deref(), Some("deploy"));
    }

    #[test]
    fn bare_host_gets_defaults() {
        let server = ServerConfig::parse("edge.example.com").unwrap();
        assert_eq!(server.port, 22);
        assert!(server.user.is_none());

        let row = server.to_server("edge");
        assert_eq!(row.ssh.user, "root");
        assert_eq!(row.ip, "edge.example.com");
    }

    #[test]
    fn rejects_bad_port_and_empty_host() {
        assert!(ServerConfig::parse("host:ssh").is_err());
        assert!(ServerConfig::parse("deploy@:22").is_err());
        assert!(ServerConfig::parse("   ").is_err());
    }
}
