// ABOUTME: Runs shell commands as local child processes.
// ABOUTME: Streams stdout and stderr line by line and reports the child's pid.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{CommandOutput, ExecTarget, ProcessEvent, RemoteError, RemoteExec};

/// Executes on the machine flotilla runs on.
///
/// Server targets are rejected; use [`super::SshExec`] for those.
#[derive(Debug, Clone, Default)]
pub struct LocalExec;

impl LocalExec {
    pub fn new() -> Self {
        Self
    }

    /// A shell running `command` as the leader of its own process group.
    fn command(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = Self::command(command).output().await?;
        Ok(CommandOutput {
            exit_code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    pub async fn run_streaming(
        &self,
        command: &str,
        events: &mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<CommandOutput, RemoteError> {
        let mut child = Self::command(command).spawn()?;
        if let Some(pid) = child.id() {
            let _ = events.send(ProcessEvent::Started(pid));
        }

        let mut stdout_reader = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr_reader = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut stdout_done = stdout_reader.is_none();
        let mut stderr_done = stderr_reader.is_none();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while !stdout_done || !stderr_done {
            tokio::select! {
                line = async {
                    match stdout_reader.as_mut() {
                        Some(r) => r.next_line().await,
                        None => Ok(None),
                    }
                }, if !stdout_done => match line {
                    Ok(Some(line)) => {
                        let _ = events.send(ProcessEvent::Line(line.clone()));
                        stdout.push(line);
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading stdout");
                        stdout_done = true;
                    }
                },
                line = async {
                    match stderr_reader.as_mut() {
                        Some(r) => r.next_line().await,
                        None => Ok(None),
                    }
                }, if !stderr_done => match line {
                    Ok(Some(line)) => {
                        let _ = events.send(ProcessEvent::Line(line.clone()));
                        stderr.push(line);
                    }
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading stderr");
                        stderr_done = true;
                    }
                },
            }
        }

        let status = child.wait().await?;
        Ok(CommandOutput {
            exit_code: exit_code(status),
            stdout: stdout.join("\n"),
            stderr: stderr.join("\n"),
        })
    }
}

/// Exit code, with death by signal reported shell-style as 128 + signal.
fn exit_code(status: ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => u32::try_from(code).unwrap_or(1),
        (None, Some(signal)) => 128 + u32::try_from(signal).unwrap_or(0),
        (None, None) => 1,
    }
}

#[async_trait]
impl RemoteExec for LocalExec {
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        match target {
            ExecTarget::Local => self.run(command).await,
            ExecTarget::Server(_) => Err(RemoteError::Unreachable(target.clone())),
        }
    }

    async fn spawn(
        &self,
        target: &ExecTarget,
        command: &str,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<CommandOutput, RemoteError> {
        match target {
            ExecTarget::Local => self.run_streaming(command, &events).await,
            ExecTarget::Server(_) => Err(RemoteError::Unreachable(target.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let output = LocalExec::new()
            .execute(&ExecTarget::Local, "echo hello; echo oops >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn streaming_reports_pid_before_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = LocalExec::new()
            .spawn(&ExecTarget::Local, "echo one; echo two", tx)
            .await
            .unwrap();
        assert!(output.success());

        assert!(matches!(rx.recv().await, Some(ProcessEvent::Started(_))));
        assert_eq!(rx.recv().await, Some(ProcessEvent::Line("one".into())));
        assert_eq!(rx.recv().await, Some(ProcessEvent::Line("two".into())));
    }
}
