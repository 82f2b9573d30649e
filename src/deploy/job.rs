// ABOUTME: A unit of deployment work waiting for a worker.
// ABOUTME: Built by the control plane, the rollback engine, and the preview controller.

use serde::{Deserialize, Serialize};

use crate::store::{DeploymentIntent, TargetRef};
use crate::types::{JobId, PreviewId, RollbackId, ServerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: JobId,
    pub target: TargetRef,
    pub title: String,
    pub description: Option<String>,
    pub intent: DeploymentIntent,
    /// Server the submitter expects the job to run against.
    pub remote: Option<ServerId>,
    pub preview_deployment_id: Option<PreviewId>,
    /// Triggered by a source provider rather than a user.
    pub is_external: bool,
    /// Rollback being replayed; set only by the rollback engine.
    pub replay: Option<RollbackId>,
}

impl DeploymentJob {
    pub fn new(target: TargetRef, intent: DeploymentIntent, title: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            target,
            title: title.into(),
            description: None,
            intent,
            remote: None,
            preview_deployment_id: None,
            is_external: false,
            replay: None,
        }
    }

    pub fn deploy(target: TargetRef, title: impl Into<String>) -> Self {
        Self::new(target, DeploymentIntent::Deploy, title)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn on_server(mut self, server: Option<ServerId>) -> Self {
        self.remote = server;
        self
    }

    pub fn for_preview(mut self, preview: PreviewId) -> Self {
        self.preview_deployment_id = Some(preview);
        self.is_external = true;
        self
    }

    pub fn replaying(mut self, rollback: RollbackId) -> Self {
        self.replay = Some(rollback);
        self
    }

    pub fn is_preview(&self) -> bool {
        self.preview_deployment_id.is_some()
    }

    /// Lane the job is serialized on.
    ///
    /// Preview jobs run on their preview's own lane, everything else on its target's.
    pub fn lane(&self) -> String {
        match &self.preview_deployment_id {
            Some(preview) => preview_lane(preview),
            None => self.target.lock_key(),
        }
    }
}

/// Lane shared by a preview's deploys and its teardown.
pub fn preview_lane(preview: &PreviewId) -> String {
    format!("preview:{}", preview)
}

/// Default record title for an intent.
pub fn default_title(intent: DeploymentIntent) -> &'static str {
    match intent {
        DeploymentIntent::Deploy => "Manual deployment",
        DeploymentIntent::Redeploy => "Rebuild deployment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApplicationId;

    #[test]
    fn previews_get_their_own_lane() {
        let target = TargetRef::Application(ApplicationId::new("api"));
        let job = DeploymentJob::deploy(target.clone(), "Manual deployment");
        assert_eq!(job.lane(), "application:api");

        let preview = job.for_preview(PreviewId::new("p1"));
        assert_eq!(preview.lane(), "preview:p1");
        assert_eq!(preview.target, target);
    }
}
