// ABOUTME: Keeps one SSH session per managed server, with the socket forwards riding on it.
// ABOUTME: Sessions that fail at the transport level are dropped and reopened on next use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use super::error::SshError;
use super::forward::SocketForward;
use super::session::{CommandOutput, Session, SessionConfig};
use crate::store::TargetStore;
use crate::types::ServerId;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

struct Slot {
    session: Arc<Session>,
    forwards: Vec<SocketForward>,
}

/// Sessions to registered servers, looked up through the target store.
pub struct SessionPool {
    targets: Arc<dyn TargetStore>,
    slots: Mutex<HashMap<ServerId, Slot>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    pub fn new(targets: Arc<dyn TargetStore>) -> Self {
        Self {
            targets,
            slots: Mutex::new(HashMap::new()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Live session for a server, connecting if there is none.
    pub async fn session(&self, server: &ServerId) -> Result<Arc<Session>, SshError> {
        let mut slots = self.slots.lock().await;
        self.live_slot(&mut slots, server)
            .await
            .map(|slot| slot.session.clone())
    }

    async fn live_slot<'a>(
        &self,
        slots: &'a mut HashMap<ServerId, Slot>,
        server: &ServerId,
    ) -> Result<&'a mut Slot, SshError> {
        if slots.get(server).is_some_and(|slot| slot.session.is_closed()) {
            tracing::info!(server = %server, "SSH session closed, reconnecting");
            slots.remove(server);
        }
        if !slots.contains_key(server) {
            let record = self
                .targets
                .get_server(server)
                .await
                .map_err(|source| SshError::Lookup {
                    server: server.clone(),
                    source,
                })?
                .ok_or_else(|| SshError::Unregistered {
                    server: server.clone(),
                })?;
            let config = SessionConfig::for_server(&record, self.command_timeout);
            tracing::info!(server = %server, host = %config.host, "Opening SSH session");
            let session = Arc::new(Session::connect(config).await?);
            slots.insert(
                server.clone(),
                Slot {
                    session,
                    forwards: Vec::new(),
                },
            );
        }
        slots.get_mut(server).ok_or_else(|| SshError::Dropped {
            server: server.clone(),
        })
    }

    pub async fn exec(&self, server: &ServerId, command: &str) -> Result<CommandOutput, SshError> {
        let session = self.session(server).await?;
        let result = session.exec(command).await;
        self.settle(server, result).await
    }

    pub async fn exec_streaming(
        &self,
        server: &ServerId,
        command: &str,
        lines: &mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, SshError> {
        let session = self.session(server).await?;
        let result = session.exec_streaming(command, lines).await;
        self.settle(server, result).await
    }

    /// Local path relaying to `remote_socket` on the server.
    ///
    /// A forward stays up as long as its session and is reused by later calls.
    pub async fn forward(&self, server: &ServerId, remote_socket: &str) -> Result<PathBuf, SshError> {
        let mut slots = self.slots.lock().await;
        let slot = self.live_slot(&mut slots, server).await?;
        slot.forwards.retain(SocketForward::is_running);
        if let Some(existing) = slot
            .forwards
            .iter()
            .find(|f| f.remote_socket() == remote_socket)
        {
            return Ok(existing.local_path().to_path_buf());
        }
        let forward = SocketForward::start(slot.session.clone(), remote_socket)?;
        let path = forward.local_path().to_path_buf();
        slot.forwards.push(forward);
        Ok(path)
    }

    async fn settle<T>(&self, server: &ServerId, result: Result<T, SshError>) -> Result<T, SshError> {
        if let Err(e) = &result
            && e.is_transport()
        {
            tracing::warn!(server = %server, "Dropping SSH session: {}", e);
            self.invalidate(server).await;
        }
        result
    }

    async fn invalidate(&self, server: &ServerId) {
        let slot = self.slots.lock().await.remove(server);
        if let Some(slot) = slot {
            shut(server, slot).await;
        }
    }

    /// Stop every forward and disconnect every session.
    pub async fn close(&self) {
        let slots: Vec<_> = self.slots.lock().await.drain().collect();
        for (server, slot) in slots {
            shut(&server, slot).await;
        }
    }
}

async fn shut(server: &ServerId, slot: Slot) {
    drop(slot.forwards);
    if let Err(e) = slot.session.disconnect().await {
        tracing::debug!(server = %server, "Error closing SSH session: {}", e);
    }
}
