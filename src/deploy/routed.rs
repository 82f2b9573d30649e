// ABOUTME: Scheduler that picks the queue or direct dispatch per job from the control plane mode.
// ABOUTME: Hosted installs run server-pinned jobs immediately; everything else is queued.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Scheduler;
use super::error::DeployError;
use super::handle::RecordHandle;
use super::job::DeploymentJob;
use super::queue::QueueStatus;
use crate::store::TargetRef;
use crate::types::PreviewId;

/// How the control plane is installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Every job goes through the local queue.
    #[default]
    SelfHosted,
    /// Jobs for remote servers bypass the queue.
    Hosted,
}

/// One [`Scheduler`] in front of both backends.
pub struct RoutedScheduler {
    mode: DispatchMode,
    queue: Arc<dyn Scheduler>,
    direct: Arc<dyn Scheduler>,
}

impl std::fmt::Debug for RoutedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedScheduler")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RoutedScheduler {
    pub fn new(mode: DispatchMode, queue: Arc<dyn Scheduler>, direct: Arc<dyn Scheduler>) -> Self {
        Self {
            mode,
            queue,
            direct,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn backend_for(&self, job: &DeploymentJob) -> &dyn Scheduler {
        match (self.mode, &job.remote) {
            (DispatchMode::Hosted, Some(_)) => self.direct.as_ref(),
            _ => self.queue.as_ref(),
        }
    }
}

#[async_trait]
impl Scheduler for RoutedScheduler {
    async fn submit(&self, job: DeploymentJob) -> Result<RecordHandle, DeployError> {
        self.backend_for(&job).submit(job).await
    }

    fn clean_queue(&self, target: &TargetRef) -> usize {
        self.queue.clean_queue(target) + self.direct.clean_queue(target)
    }

    fn clean_preview(&self, preview: &PreviewId) -> usize {
        self.queue.clean_preview(preview) + self.direct.clean_preview(preview)
    }

    fn status(&self) -> QueueStatus {
        let mut status = self.queue.status();
        let direct = self.direct.status();
        for (key, counts) in direct.targets {
            let slot = status.targets.entry(key).or_default();
            slot.waiting += counts.waiting;
            slot.processing += counts.processing;
        }
        status.completed += direct.completed;
        status.failed += direct.failed;
        status.cancelled += direct.cancelled;
        status
    }

    async fn shutdown(&self) {
        tokio::join!(self.queue.shutdown(), self.direct.shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::progress_channel;
    use crate::types::{ApplicationId, ServerId};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        submitted: Mutex<Vec<DeploymentJob>>,
    }

    #[async_trait]
    impl Scheduler for Recording {
        async fn submit(&self, job: DeploymentJob) -> Result<RecordHandle, DeployError> {
            let (_tx, handle) = progress_channel(job.id.clone());
            self.submitted.lock().push(job);
            Ok(handle)
        }

        fn clean_queue(&self, _target: &TargetRef) -> usize {
            1
        }

        fn clean_preview(&self, _preview: &PreviewId) -> usize {
            1
        }

        fn status(&self) -> QueueStatus {
            QueueStatus {
                completed: 1,
                ..QueueStatus::default()
            }
        }

        async fn shutdown(&self) {}
    }

    fn job(server: Option<&str>) -> DeploymentJob {
        DeploymentJob::deploy(
            TargetRef::Application(ApplicationId::new("app")),
            "Manual deployment",
        )
        .on_server(server.map(ServerId::new))
    }

    #[tokio::test]
    async fn hosted_mode_sends_pinned_jobs_direct() {
        let queue = Arc::new(Recording::default());
        let direct = Arc::new(Recording::default());
        let routed = RoutedScheduler::new(DispatchMode::Hosted, queue.clone(), direct.clone());

        routed.submit(job(Some("srv"))).await.unwrap();
        routed.submit(job(None)).await.unwrap();

        assert_eq!(direct.submitted.lock().len(), 1);
        assert_eq!(queue.submitted.lock().len(), 1);
    }

    #[tokio::test]
    async fn self_hosted_mode_queues_everything() {
        let queue = Arc::new(Recording::default());
        let direct = Arc::new(Recording::default());
        let routed = RoutedScheduler::new(DispatchMode::SelfHosted, queue.clone(), direct.clone());

        routed.submit(job(Some("srv"))).await.unwrap();

        assert!(direct.submitted.lock().is_empty());
        assert_eq!(queue.submitted.lock().len(), 1);
    }

    #[test]
    fn status_merges_both_backends() {
        let routed = RoutedScheduler::new(
            DispatchMode::Hosted,
            Arc::new(Recording::default()),
            Arc::new(Recording::default()),
        );
        assert_eq!(routed.status().completed, 2);
        assert_eq!(
            routed.clean_queue(&TargetRef::Application(ApplicationId::new("app"))),
            2
        );
        assert_eq!(routed.clean_preview(&PreviewId::new("p1")), 2);
    }
}
