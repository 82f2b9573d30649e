// ABOUTME: In-process deployment queue with a bounded worker pool.
// ABOUTME: Jobs wait for their target's lane, then for a global permit, then run on the worker.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;

use super::Scheduler;
use super::error::DeployError;
use super::handle::{ProgressTx, RecordHandle, progress_channel};
use super::job::DeploymentJob;
use super::locks::TargetLocks;
use super::worker::Worker;
use crate::store::TargetRef;
use crate::types::{JobId, PreviewId};

/// Default number of jobs running at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Jobs of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetQueueStatus {
    pub waiting: usize,
    pub processing: usize,
}

/// Snapshot of a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Live jobs by lane.
    pub targets: BTreeMap<String, TargetQueueStatus>,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStatus {
    pub fn waiting(&self) -> usize {
        self.targets.values().map(|t| t.waiting).sum()
    }

    pub fn processing(&self) -> usize {
        self.targets.values().map(|t| t.processing).sum()
    }
}

struct Entry {
    target: TargetRef,
    lane: String,
    preview: Option<PreviewId>,
    status: JobStatus,
    cancel: Option<oneshot::Sender<()>>,
}

/// Live jobs plus counters for finished ones.
#[derive(Default)]
pub(super) struct JobTable {
    live: HashMap<JobId, Entry>,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl JobTable {
    pub(super) fn insert(
        &mut self,
        job: &DeploymentJob,
        status: JobStatus,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.live.insert(
            job.id.clone(),
            Entry {
                target: job.target.clone(),
                lane: job.lane(),
                preview: job.preview_deployment_id.clone(),
                status,
                cancel: Some(tx),
            },
        );
        rx
    }

    /// Move a waiting job to processing. False if it was cancelled meanwhile.
    fn start(&mut self, job: &JobId) -> bool {
        match self.live.get_mut(job) {
            Some(entry) if entry.status == JobStatus::Waiting => {
                entry.status = JobStatus::Processing;
                entry.cancel = None;
                true
            }
            _ => false,
        }
    }

    pub(super) fn settle(&mut self, job: &JobId, status: JobStatus) {
        self.live.remove(job);
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Waiting | JobStatus::Processing => {}
        }
    }

    /// Cancel the waiting jobs `selected` picks.
    fn cancel_waiting(&mut self, selected: impl Fn(&Entry) -> bool) -> usize {
        let ids: Vec<JobId> = self
            .live
            .iter()
            .filter(|(_, e)| e.status == JobStatus::Waiting && selected(e))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(mut entry) = self.live.remove(id)
                && let Some(cancel) = entry.cancel.take()
            {
                let _ = cancel.send(());
            }
            self.cancelled += 1;
        }
        ids.len()
    }

    pub(super) fn snapshot(&self) -> QueueStatus {
        let mut targets: BTreeMap<String, TargetQueueStatus> = BTreeMap::new();
        for entry in self.live.values() {
            let slot = targets.entry(entry.lane.clone()).or_default();
            match entry.status {
                JobStatus::Waiting => slot.waiting += 1,
                JobStatus::Processing => slot.processing += 1,
                _ => {}
            }
        }
        QueueStatus {
            targets,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
        }
    }
}

/// Outcome status of a job the worker ran.
pub(super) fn settled_status(record: Option<&crate::store::DeploymentRecord>) -> JobStatus {
    match record.map(|r| r.status) {
        Some(crate::store::DeploymentStatus::Done) => JobStatus::Completed,
        _ => JobStatus::Failed,
    }
}

struct Inner {
    worker: Arc<Worker>,
    locks: TargetLocks,
    permits: Arc<Semaphore>,
    jobs: Mutex<JobTable>,
    tasks: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

/// Queue backend for the control plane.
///
/// At most `concurrency` jobs run at once, and at most one per lane. Jobs
/// on one lane start in submission order.
#[derive(Clone)]
pub struct InProcessQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InProcessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessQueue")
            .field("available_permits", &self.inner.permits.available_permits())
            .field("accepting", &self.inner.accepting.load(Ordering::SeqCst))
            .finish()
    }
}

impl InProcessQueue {
    pub fn new(worker: Arc<Worker>, locks: TargetLocks, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker,
                locks,
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
                jobs: Mutex::new(JobTable::default()),
                tasks: Mutex::new(JoinSet::new()),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Cancel every waiting job.
    pub fn cancel_all_waiting(&self) -> usize {
        let cancelled = self.inner.jobs.lock().cancel_waiting(|_| true);
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled waiting jobs");
        }
        cancelled
    }

    async fn run(
        inner: Arc<Inner>,
        job: DeploymentJob,
        mut progress: ProgressTx,
        cancel: oneshot::Receiver<()>,
    ) {
        let acquire = async {
            let guard = inner.locks.lock(&job.lane(), &job.id).await;
            let permit = inner.permits.clone().acquire_owned().await;
            (guard, permit)
        };

        let (guard, permit) = tokio::select! {
            held = acquire => held,
            _ = cancel => {
                tracing::debug!(job = %job.id, target = %job.target, "job cancelled while waiting");
                progress.cancelled();
                return;
            }
        };
        let Ok(permit) = permit else {
            progress.cancelled();
            return;
        };
        if !inner.jobs.lock().start(&job.id) {
            progress.cancelled();
            return;
        }

        let record = inner.worker.execute(&job, &mut progress).await;
        drop(permit);
        drop(guard);
        inner
            .jobs
            .lock()
            .settle(&job.id, settled_status(record.as_ref()));
    }
}

#[async_trait]
impl Scheduler for InProcessQueue {
    async fn submit(&self, job: DeploymentJob) -> Result<RecordHandle, DeployError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(DeployError::QueueClosed);
        }
        let (progress, handle) = progress_channel(job.id.clone());
        let cancel = self.inner.jobs.lock().insert(&job, JobStatus::Waiting);
        tracing::info!(job = %job.id, target = %job.target, title = %job.title, "job queued");

        let mut tasks = self.inner.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(Self::run(self.inner.clone(), job, progress, cancel));
        Ok(handle)
    }

    fn clean_queue(&self, target: &TargetRef) -> usize {
        let cancelled = self.inner.jobs.lock().cancel_waiting(|e| &e.target == target);
        tracing::info!(target = %target, cancelled, "cleaned queue");
        cancelled
    }

    fn clean_preview(&self, preview: &PreviewId) -> usize {
        let cancelled = self
            .inner
            .jobs
            .lock()
            .cancel_waiting(|e| e.preview.as_ref() == Some(preview));
        if cancelled > 0 {
            tracing::info!(preview = %preview, cancelled, "cancelled waiting preview jobs");
        }
        cancelled
    }

    fn status(&self) -> QueueStatus {
        self.inner.jobs.lock().snapshot()
    }

    async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.cancel_all_waiting();
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let running = tasks.len();
        if running > 0 {
            tracing::info!(running, "waiting for running jobs");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!("job task failed: {}", e);
            }
        }
    }
}
