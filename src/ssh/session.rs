// ABOUTME: One authenticated russh connection to a managed server.
// ABOUTME: Host key policy, agent or key login, and command channels with streamed output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{check_known_hosts, learn_known_hosts};
use russh::keys::ssh_key::{self, PrivateKey};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use super::error::SshError;
use crate::store::Server;
use crate::types::ServerId;

/// Keys tried in order when neither a key path nor an agent is available.
const FALLBACK_KEYS: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// How to reach one server.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub server: ServerId,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    /// Accept and remember hosts missing from known_hosts.
    pub trust_on_first_use: bool,
    pub command_timeout: Duration,
}

impl SessionConfig {
    pub fn for_server(server: &Server, command_timeout: Duration) -> Self {
        Self {
            server: server.id.clone(),
            host: server.ssh.host.clone(),
            port: server.ssh.port,
            user: server.ssh.user.clone(),
            key_path: server.ssh.key_path.clone(),
            trust_on_first_use: server.ssh.trust_on_first_use,
            command_timeout,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Collected result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Checks server keys against the user's known_hosts.
pub(crate) struct HostKeyPolicy {
    server: ServerId,
    host: String,
    port: u16,
    trust_on_first_use: bool,
}

impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match check_known_hosts(&self.host, self.port, key) {
            Ok(true) => Ok(true),
            Ok(_) if self.trust_on_first_use => {
                tracing::warn!(
                    server = %self.server,
                    "Learning host key of {}:{} on first use",
                    self.host,
                    self.port
                );
                if let Err(e) = learn_known_hosts(&self.host, self.port, key) {
                    tracing::warn!(server = %self.server, "Cannot record host key: {}", e);
                }
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => {
                tracing::warn!(server = %self.server, "Host key check failed: {}", e);
                Ok(false)
            }
        }
    }
}

enum Credentials {
    Agent(AgentClient<UnixStream>),
    Key(Arc<PrivateKey>),
}

impl Credentials {
    /// The configured key, then the agent, then the usual key files.
    async fn resolve(config: &SessionConfig) -> Result<Self, SshError> {
        if let Some(path) = &config.key_path {
            let key = load_secret_key(path, None).map_err(|e| SshError::KeyLoad {
                server: config.server.clone(),
                path: path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(Credentials::Key(Arc::new(key)));
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(Credentials::Agent(agent));
        }

        let home = std::env::var_os("HOME").ok_or_else(|| SshError::NoCredentials {
            server: config.server.clone(),
            reason: "no agent and HOME is unset".into(),
        })?;
        let ssh_dir = PathBuf::from(home).join(".ssh");
        FALLBACK_KEYS
            .iter()
            .find_map(|name| load_secret_key(ssh_dir.join(name), None).ok())
            .map(|key| Credentials::Key(Arc::new(key)))
            .ok_or_else(|| SshError::NoCredentials {
                server: config.server.clone(),
                reason: format!("no agent and no key in {}", ssh_dir.display()),
            })
    }

    async fn login(
        self,
        handle: &mut Handle<HostKeyPolicy>,
        config: &SessionConfig,
    ) -> Result<bool, SshError> {
        let channel_error = |source: russh::Error| SshError::Channel {
            server: config.server.clone(),
            operation: "authentication",
            source,
        };
        match self {
            Credentials::Agent(mut agent) => {
                let identities =
                    agent
                        .request_identities()
                        .await
                        .map_err(|e| SshError::NoCredentials {
                            server: config.server.clone(),
                            reason: format!("agent refused to list keys: {}", e),
                        })?;
                for identity in identities {
                    let accepted = handle
                        .authenticate_publickey_with(&config.user, identity, None, &mut agent)
                        .await
                        .map(|result| result.success())
                        .unwrap_or(false);
                    if accepted {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Credentials::Key(key) => {
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(channel_error)?
                    .flatten();
                let result = handle
                    .authenticate_publickey(&config.user, PrivateKeyWithHashAlg::new(key, hash))
                    .await
                    .map_err(channel_error)?;
                Ok(result.success())
            }
        }
    }
}

/// An authenticated connection to one server.
pub struct Session {
    config: SessionConfig,
    handle: Handle<HostKeyPolicy>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.config.server)
            .field("address", &self.config.address())
            .finish()
    }
}

impl Session {
    pub async fn connect(config: SessionConfig) -> Result<Self, SshError> {
        let credentials = Credentials::resolve(&config).await?;
        let policy = HostKeyPolicy {
            server: config.server.clone(),
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
        };
        let client_config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let mut handle = client::connect(
            Arc::new(client_config),
            (config.host.as_str(), config.port),
            policy,
        )
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => SshError::HostKeyRejected {
                server: config.server.clone(),
                address: config.address(),
            },
            other => SshError::Connect {
                server: config.server.clone(),
                address: config.address(),
                reason: other.to_string(),
            },
        })?;

        if !credentials.login(&mut handle, &config).await? {
            return Err(SshError::AuthenticationRejected {
                server: config.server.clone(),
                user: config.user.clone(),
            });
        }
        tracing::debug!(server = %config.server, "SSH session established");
        Ok(Self { config, handle })
    }

    pub fn server(&self) -> &ServerId {
        &self.config.server
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    fn channel_error(&self, operation: &'static str) -> impl FnOnce(russh::Error) -> SshError {
        let server = self.config.server.clone();
        move |source| SshError::Channel {
            server,
            operation,
            source,
        }
    }

    /// Run a command and collect its output, bounded by the command timeout.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.bounded(self.run(command, None)).await
    }

    /// Like [`Session::exec`], also sending each output line as it arrives.
    pub async fn exec_streaming(
        &self,
        command: &str,
        lines: &mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, SshError> {
        self.bounded(self.run(command, Some(lines))).await
    }

    async fn bounded(
        &self,
        run: impl Future<Output = Result<CommandOutput, SshError>>,
    ) -> Result<CommandOutput, SshError> {
        let after = self.config.command_timeout;
        tokio::time::timeout(after, run)
            .await
            .unwrap_or_else(|_| {
                Err(SshError::Timeout {
                    server: self.config.server.clone(),
                    after,
                })
            })
    }

    async fn run(
        &self,
        command: &str,
        lines: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<CommandOutput, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(self.channel_error("opening a session channel"))?;
        channel
            .exec(true, command)
            .await
            .map_err(self.channel_error("starting a command"))?;

        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();
        let mut exit_code = None;
        let mut eof = false;

        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { data } => stdout.push(&data, lines),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.push(&data, lines),
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                    if eof {
                        break;
                    }
                }
                ChannelMsg::Eof => {
                    eof = true;
                    if exit_code.is_some() {
                        break;
                    }
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let exit_code = exit_code.ok_or_else(|| SshError::Dropped {
            server: self.config.server.clone(),
        })?;
        Ok(CommandOutput {
            exit_code,
            stdout: stdout.finish(lines),
            stderr: stderr.finish(lines),
        })
    }

    /// Open a channel to a Unix socket on the server.
    pub async fn open_streamlocal(
        &self,
        socket: &str,
    ) -> Result<russh::ChannelStream<client::Msg>, SshError> {
        let channel = self
            .handle
            .channel_open_direct_streamlocal(socket)
            .await
            .map_err(self.channel_error("opening a socket channel"))?;
        Ok(channel.into_stream())
    }

    pub async fn disconnect(&self) -> Result<(), SshError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(self.channel_error("disconnecting"))
    }
}

/// Accumulates one output stream and splits it into lines for followers.
#[derive(Default)]
struct LineBuffer {
    text: String,
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8], lines: Option<&mpsc::UnboundedSender<String>>) {
        self.pending.extend_from_slice(data);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.emit(&line, lines);
        }
    }

    fn emit(&mut self, raw: &[u8], lines: Option<&mpsc::UnboundedSender<String>>) {
        let line = String::from_utf8_lossy(raw);
        self.text.push_str(&line);
        if let Some(tx) = lines {
            let _ = tx.send(line.trim_end_matches(['\n', '\r']).to_string());
        }
    }

    fn finish(mut self, lines: Option<&mpsc::UnboundedSender<String>>) -> String {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest, lines);
        }
        self.text
    }
}
