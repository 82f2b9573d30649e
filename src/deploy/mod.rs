// ABOUTME: Deployment jobs, the worker that runs them, and the schedulers that feed it.
// ABOUTME: Exports the type state lifecycle, both scheduler backends, kill, and retention.

mod direct;
mod error;
mod handle;
mod job;
mod kill;
mod lifecycle;
mod locks;
mod queue;
mod retention;
mod routed;
mod state;
mod worker;

pub use direct::DirectDispatch;
pub use error::{DeployError, DeployErrorKind};
pub use handle::{JobProgress, ProgressTx, RecordHandle, progress_channel};
pub use job::{DeploymentJob, default_title, preview_lane};
pub use kill::{KILLED_MESSAGE, kill_deployment, signal_process};
pub use lifecycle::{ActiveDeployment, INITIAL_LOG_LINE, TransitionResult};
pub use locks::{LockHolder, TargetGuard, TargetLocks};
pub use queue::{DEFAULT_CONCURRENCY, InProcessQueue, JobStatus, QueueStatus, TargetQueueStatus};
pub use retention::{apply_retention, remove_preview_deployments, remove_target_deployments};
pub use routed::{DispatchMode, RoutedScheduler};
pub use state::{Built, Claimed, Prepared};
pub use worker::{DEFAULT_JOB_TIMEOUT, Worker, log_path};

use async_trait::async_trait;

use crate::store::TargetRef;
use crate::types::PreviewId;

/// Accepts deployment jobs and runs them on a [`Worker`].
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Hand over a job. The handle reports the record once a worker claims it.
    async fn submit(&self, job: DeploymentJob) -> Result<RecordHandle, DeployError>;

    /// Cancel a target's jobs that have not started. Running jobs are untouched.
    fn clean_queue(&self, target: &TargetRef) -> usize;

    /// Cancel a preview's jobs that have not started.
    fn clean_preview(&self, preview: &PreviewId) -> usize;

    fn status(&self) -> QueueStatus;

    /// Stop accepting jobs, drop waiting ones, and wait for running ones.
    async fn shutdown(&self);
}
