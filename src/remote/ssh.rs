// ABOUTME: RemoteExec over the SSH session pool, with local targets run in-process.
// ABOUTME: Spawned remote commands report their process group before any output.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::local::LocalExec;
use super::{
    CommandOutput, ExecTarget, ProcessEvent, RemoteError, RemoteExec, parse_pid_marker,
    with_pid_marker,
};
use crate::ssh::SessionPool;

/// Runs commands on managed servers through pooled sessions.
#[derive(Debug)]
pub struct SshExec {
    pool: Arc<SessionPool>,
    local: LocalExec,
}

impl SshExec {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            local: LocalExec::new(),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

#[async_trait]
impl RemoteExec for SshExec {
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        match target {
            ExecTarget::Local => self.local.run(command).await,
            ExecTarget::Server(server) => Ok(self.pool.exec(server, command).await?),
        }
    }

    async fn spawn(
        &self,
        target: &ExecTarget,
        command: &str,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<CommandOutput, RemoteError> {
        let server = match target {
            ExecTarget::Local => return self.local.run_streaming(command, &events).await,
            ExecTarget::Server(server) => server,
        };

        let wrapped = with_pid_marker(command);
        let (lines_tx, mut lines) = mpsc::unbounded_channel::<String>();
        let run = async move { self.pool.exec_streaming(server, &wrapped, &lines_tx).await };
        let relay = async {
            let mut started = false;
            while let Some(line) = lines.recv().await {
                if !started && let Some(pid) = parse_pid_marker(&line) {
                    started = true;
                    let _ = events.send(ProcessEvent::Started(pid));
                    continue;
                }
                let _ = events.send(ProcessEvent::Line(line));
            }
        };

        let (result, ()) = tokio::join!(run, relay);
        let mut output = result?;
        if let Some((first, rest)) = output.stdout.split_once('\n')
            && parse_pid_marker(first).is_some()
        {
            output.stdout = rest.to_string();
        }
        Ok(output)
    }
}
