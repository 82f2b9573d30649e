// ABOUTME: Scheduler backend that runs each job immediately, without queueing.
// ABOUTME: A job whose lane is already busy is refused instead of waiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;

use super::Scheduler;
use super::error::DeployError;
use super::handle::{RecordHandle, progress_channel};
use super::job::DeploymentJob;
use super::locks::TargetLocks;
use super::queue::{JobStatus, JobTable, QueueStatus, settled_status};
use super::worker::Worker;
use crate::store::TargetRef;
use crate::types::PreviewId;

struct Inner {
    worker: Arc<Worker>,
    locks: TargetLocks,
    jobs: Mutex<JobTable>,
    tasks: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

/// Runs each job on its own task as soon as it is submitted.
///
/// Shares [`TargetLocks`] with the queue, so a lane never runs two jobs
/// even when both backends are in use.
#[derive(Clone)]
pub struct DirectDispatch {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DirectDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDispatch")
            .field("accepting", &self.inner.accepting.load(Ordering::SeqCst))
            .finish()
    }
}

impl DirectDispatch {
    pub fn new(worker: Arc<Worker>, locks: TargetLocks) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker,
                locks,
                jobs: Mutex::new(JobTable::default()),
                tasks: Mutex::new(JoinSet::new()),
                accepting: AtomicBool::new(true),
            }),
        }
    }
}

#[async_trait]
impl Scheduler for DirectDispatch {
    async fn submit(&self, job: DeploymentJob) -> Result<RecordHandle, DeployError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(DeployError::QueueClosed);
        }
        let lane = job.lane();
        let Some(guard) = self.inner.locks.try_lock(&lane, &job.id) else {
            let target = match &job.preview_deployment_id {
                Some(preview) => format!("preview {}", preview),
                None => job.target.to_string(),
            };
            return Err(DeployError::AlreadyInProgress {
                target,
                holder: self.inner.locks.holder(&lane),
            });
        };

        let (mut progress, handle) = progress_channel(job.id.clone());
        // Running jobs cannot be cancelled, so the cancel receiver is unused.
        let _ = self.inner.jobs.lock().insert(&job, JobStatus::Processing);
        tracing::info!(job = %job.id, target = %job.target, title = %job.title, "job dispatched");

        let inner = self.inner.clone();
        let mut tasks = self.inner.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let record = inner.worker.execute(&job, &mut progress).await;
            drop(guard);
            inner
                .jobs
                .lock()
                .settle(&job.id, settled_status(record.as_ref()));
        });
        Ok(handle)
    }

    fn clean_queue(&self, _target: &TargetRef) -> usize {
        0
    }

    fn clean_preview(&self, _preview: &PreviewId) -> usize {
        0
    }

    fn status(&self) -> QueueStatus {
        self.inner.jobs.lock().snapshot()
    }

    async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!("job task failed: {}", e);
            }
        }
    }
}
