// ABOUTME: Handle returned to whoever submitted a deployment job.
// ABOUTME: Observes the job through a watch channel from queued to finished.

use tokio::sync::watch;

use super::error::DeployError;
use crate::store::DeploymentRecord;
use crate::types::JobId;

/// Where a submitted job is.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    Queued,
    /// A worker created the record, now `running`.
    Claimed(DeploymentRecord),
    /// The record reached `done` or `error`.
    Finished {
        claimed: DeploymentRecord,
        record: DeploymentRecord,
    },
    /// Removed from the queue before it started.
    Cancelled,
    /// The job failed before any record could be written.
    Rejected(String),
}

impl JobProgress {
    fn is_settled(&self) -> bool {
        !matches!(self, JobProgress::Queued)
    }
}

/// Observer side of one job.
#[derive(Debug, Clone)]
pub struct RecordHandle {
    job: JobId,
    rx: watch::Receiver<JobProgress>,
}

impl RecordHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job
    }

    pub fn progress(&self) -> JobProgress {
        self.rx.borrow().clone()
    }

    /// Wait until a worker claims the job and return the `running` record.
    pub async fn claimed(&self) -> Result<DeploymentRecord, DeployError> {
        let mut rx = self.rx.clone();
        let progress = rx
            .wait_for(JobProgress::is_settled)
            .await
            .map_err(|_| DeployError::QueueClosed)?
            .clone();
        match progress {
            JobProgress::Claimed(record) | JobProgress::Finished { claimed: record, .. } => {
                Ok(record)
            }
            other => Err(self.unclaimed(other)),
        }
    }

    /// Wait until the job's record reaches a terminal status.
    pub async fn finished(&self) -> Result<DeploymentRecord, DeployError> {
        let mut rx = self.rx.clone();
        let progress = rx
            .wait_for(|p| !matches!(p, JobProgress::Queued | JobProgress::Claimed(_)))
            .await
            .map_err(|_| DeployError::QueueClosed)?
            .clone();
        match progress {
            JobProgress::Finished { record, .. } => Ok(record),
            other => Err(self.unclaimed(other)),
        }
    }

    fn unclaimed(&self, progress: JobProgress) -> DeployError {
        match progress {
            JobProgress::Rejected(reason) => DeployError::Rejected(reason),
            _ => DeployError::Cancelled(self.job.clone()),
        }
    }
}

/// Sender side, owned by whoever runs the job.
#[derive(Debug)]
pub struct ProgressTx {
    tx: watch::Sender<JobProgress>,
    claimed: Option<DeploymentRecord>,
}

/// A new job's progress channel.
pub fn progress_channel(job: JobId) -> (ProgressTx, RecordHandle) {
    let (tx, rx) = watch::channel(JobProgress::Queued);
    (
        ProgressTx { tx, claimed: None },
        RecordHandle { job, rx },
    )
}

impl ProgressTx {
    pub fn claimed(&mut self, record: &DeploymentRecord) {
        self.claimed = Some(record.clone());
        self.tx.send_replace(JobProgress::Claimed(record.clone()));
    }

    pub fn finished(&mut self, record: &DeploymentRecord) {
        let claimed = self.claimed.take().unwrap_or_else(|| record.clone());
        self.tx.send_replace(JobProgress::Finished {
            claimed,
            record: record.clone(),
        });
    }

    pub fn cancelled(&self) {
        self.tx.send_replace(JobProgress::Cancelled);
    }

    pub fn rejected(&self, reason: impl Into<String>) {
        self.tx.send_replace(JobProgress::Rejected(reason.into()));
    }

    /// Whether the job already settled as cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.tx.borrow(), JobProgress::Cancelled)
    }
}
