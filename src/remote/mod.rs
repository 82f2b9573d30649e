// ABOUTME: Command execution on the control node or a managed server.
// ABOUTME: RemoteExec trait with a local process backend and a pooled SSH backend.

mod local;
mod ssh;

pub use local::LocalExec;
pub use ssh::SshExec;

pub use crate::ssh::CommandOutput;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::ssh::SshError;
use crate::types::ServerId;

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecTarget {
    Local,
    Server(ServerId),
}

impl ExecTarget {
    pub fn for_server(server: Option<&ServerId>) -> Self {
        match server {
            Some(id) => ExecTarget::Server(id.clone()),
            None => ExecTarget::Local,
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecTarget::Local => f.write_str("local"),
            ExecTarget::Server(id) => write!(f, "server {}", id),
        }
    }
}

/// Progress of a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The process is running under this pid on its host.
    Started(u32),
    /// One line of stdout or stderr.
    Line(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{0} is not reachable from this executor")]
    Unreachable(ExecTarget),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("failed to run local process: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs shell commands on a host.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run to completion and collect output.
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
    ) -> Result<CommandOutput, RemoteError>;

    /// Run to completion, reporting the pid first and then each output line.
    async fn spawn(
        &self,
        target: &ExecTarget,
        command: &str,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Prefix of the line a wrapped remote command prints with its own pid.
const PID_MARKER: &str = "__flotilla_pid=";

/// Wrap a command so it runs as the leader of a new process group.
///
/// The leader prints its pid, which is also the group id, before replacing
/// itself with the command. Killing the group reaches every child the
/// command starts.
fn with_pid_marker(command: &str) -> String {
    format!(
        "setsid -w sh -c {} flotilla {}",
        shell_quote(&format!("echo {}$$; exec sh -c \"$1\"", PID_MARKER)),
        shell_quote(command)
    )
}

/// Quote a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Parse the marker line printed by [`with_pid_marker`].
fn parse_pid_marker(line: &str) -> Option<u32> {
    line.strip_prefix(PID_MARKER)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_marker_round_trips_through_the_wrapper() {
        let wrapped = with_pid_marker("docker build -t 'api:v1' .");
        assert!(wrapped.starts_with("setsid -w sh -c '"));
        assert!(wrapped.contains(PID_MARKER));
        assert!(wrapped.ends_with(r"flotilla 'docker build -t '\''api:v1'\'' .'"));
        assert_eq!(parse_pid_marker("__flotilla_pid=4242"), Some(4242));
        assert_eq!(parse_pid_marker("building..."), None);
    }

    #[test]
    fn shell_quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("api:v1"), "api:v1");
        assert_eq!(shell_quote("registry.example.com/api:v1"), "registry.example.com/api:v1");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn exec_target_for_no_server_is_local() {
        assert_eq!(ExecTarget::for_server(None), ExecTarget::Local);
        let id = ServerId::new("srv");
        assert_eq!(
            ExecTarget::for_server(Some(&id)),
            ExecTarget::Server(ServerId::new("srv"))
        );
    }
}
