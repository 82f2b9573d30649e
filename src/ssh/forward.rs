// ABOUTME: Exposes a server's Docker socket as a Unix socket on the control node.
// ABOUTME: Each accepted local connection is relayed over its own streamlocal channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::error::SshError;
use super::session::Session;
use crate::types::ServerId;

/// A running relay from a local socket to a socket on a server.
///
/// Dropping it stops accepting connections and removes the local socket.
#[derive(Debug)]
pub struct SocketForward {
    server: ServerId,
    remote_socket: String,
    local_path: PathBuf,
    task: JoinHandle<()>,
}

impl SocketForward {
    pub fn start(session: Arc<Session>, remote_socket: &str) -> Result<Self, SshError> {
        let server = session.server().clone();
        let local_path = local_socket_path(&server, remote_socket);
        let forward_error = |reason: String| SshError::Forward {
            server: server.clone(),
            socket: remote_socket.to_string(),
            reason,
        };

        if let Some(dir) = local_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| forward_error(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        match std::fs::remove_file(&local_path) {
            Ok(()) => tracing::debug!(server = %server, "Removed stale socket {}", local_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(forward_error(format!("cannot clear stale socket: {}", e))),
        }
        let listener = UnixListener::bind(&local_path)
            .map_err(|e| forward_error(format!("cannot bind {}: {}", local_path.display(), e)))?;

        let task = tokio::spawn(accept_loop(listener, session, remote_socket.to_string()));
        tracing::debug!(
            server = %server,
            "Forwarding {} to {}",
            local_path.display(),
            remote_socket
        );
        Ok(Self {
            server,
            remote_socket: remote_socket.to_string(),
            local_path,
            task,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_socket(&self) -> &str {
        &self.remote_socket
    }

    /// The relay is still accepting connections.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SocketForward {
    fn drop(&mut self) {
        self.task.abort();
        if let Err(e) = std::fs::remove_file(&self.local_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(server = %self.server, "Cannot remove forwarded socket: {}", e);
        }
    }
}

/// Local socket for a server's remote socket, unique per process.
pub(crate) fn local_socket_path(server: &ServerId, remote_socket: &str) -> PathBuf {
    let remote: String = remote_socket
        .trim_start_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    std::env::temp_dir()
        .join(format!("flotilla-{}", std::process::id()))
        .join(format!("{}-{}", server, remote))
}

async fn accept_loop(listener: UnixListener, session: Arc<Session>, remote_socket: String) {
    loop {
        let local = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(server = %session.server(), "Forwarded socket stopped accepting: {}", e);
                return;
            }
        };
        if session.is_closed() {
            tracing::debug!(server = %session.server(), "Session closed, dropping forward");
            return;
        }
        let session = session.clone();
        let remote_socket = remote_socket.clone();
        tokio::spawn(async move {
            if let Err(e) = relay(local, &session, &remote_socket).await {
                tracing::debug!(server = %session.server(), "Forwarded connection ended: {}", e);
            }
        });
    }
}

async fn relay(mut local: UnixStream, session: &Session, remote_socket: &str) -> Result<(), SshError> {
    let mut remote = session.open_streamlocal(remote_socket).await?;
    tokio::io::copy_bidirectional(&mut local, &mut remote)
        .await
        .map_err(|e| SshError::Forward {
            server: session.server().clone(),
            socket: remote_socket.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_names_server_and_socket() {
        let path = local_socket_path(&ServerId::new("edge-1"), "/var/run/docker.sock");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "edge-1-var-run-docker-sock");

        let dir = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(dir, format!("flotilla-{}", std::process::id()));
    }

    #[test]
    fn different_servers_get_different_sockets() {
        let a = local_socket_path(&ServerId::new("edge-1"), "/var/run/docker.sock");
        let b = local_socket_path(&ServerId::new("edge-2"), "/var/run/docker.sock");
        assert_ne!(a, b);
    }
}
