// ABOUTME: Errors of the SSH transport to managed servers.
// ABOUTME: Every error names its server, and transport failures mark the pooled session as dead.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreError;
use crate::types::ServerId;

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("server {server} is not registered")]
    Unregistered { server: ServerId },

    #[error("cannot look up server {server}: {source}")]
    Lookup {
        server: ServerId,
        #[source]
        source: StoreError,
    },

    #[error("server {server}: cannot connect to {address}: {reason}")]
    Connect {
        server: ServerId,
        address: String,
        reason: String,
    },

    #[error("server {server}: host key of {address} is unknown or has changed")]
    HostKeyRejected { server: ServerId, address: String },

    #[error("server {server}: no key was accepted for user {user}")]
    AuthenticationRejected { server: ServerId, user: String },

    #[error("server {server}: no SSH credentials available: {reason}")]
    NoCredentials { server: ServerId, reason: String },

    #[error("server {server}: cannot load key {}: {reason}", .path.display())]
    KeyLoad {
        server: ServerId,
        path: PathBuf,
        reason: String,
    },

    #[error("server {server}: {operation} failed: {source}")]
    Channel {
        server: ServerId,
        operation: &'static str,
        #[source]
        source: russh::Error,
    },

    #[error("server {server}: command timed out after {}", humantime_serde::re::humantime::format_duration(*.after))]
    Timeout { server: ServerId, after: Duration },

    #[error("server {server}: channel closed without an exit status")]
    Dropped { server: ServerId },

    #[error("server {server}: cannot forward {socket}: {reason}")]
    Forward {
        server: ServerId,
        socket: String,
        reason: String,
    },
}

impl SshError {
    pub fn server(&self) -> &ServerId {
        match self {
            SshError::Unregistered { server }
            | SshError::Lookup { server, .. }
            | SshError::Connect { server, .. }
            | SshError::HostKeyRejected { server, .. }
            | SshError::AuthenticationRejected { server, .. }
            | SshError::NoCredentials { server, .. }
            | SshError::KeyLoad { server, .. }
            | SshError::Channel { server, .. }
            | SshError::Timeout { server, .. }
            | SshError::Dropped { server }
            | SshError::Forward { server, .. } => server,
        }
    }

    /// Whether the session that produced this error can be reused.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SshError::Connect { .. } | SshError::Channel { .. } | SshError::Dropped { .. }
        )
    }
}
