// ABOUTME: Pull request events as delivered by a source provider webhook.
// ABOUTME: Authentication and payload parsing happen upstream; this is the normalized form.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::OrganizationId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Synchronize,
    Reopened,
    Labeled,
    Unlabeled,
    Closed,
    #[serde(untagged)]
    Other(String),
}

impl PullRequestAction {
    /// Whether the action (re)deploys the pull request's previews.
    pub fn deploys(&self) -> bool {
        matches!(
            self,
            PullRequestAction::Opened
                | PullRequestAction::Synchronize
                | PullRequestAction::Reopened
                | PullRequestAction::Labeled
                | PullRequestAction::Unlabeled
        )
    }
}

impl fmt::Display for PullRequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PullRequestAction::Opened => "opened",
            PullRequestAction::Synchronize => "synchronize",
            PullRequestAction::Reopened => "reopened",
            PullRequestAction::Labeled => "labeled",
            PullRequestAction::Unlabeled => "unlabeled",
            PullRequestAction::Closed => "closed",
            PullRequestAction::Other(other) => other,
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub organization_id: OrganizationId,
    pub action: PullRequestAction,
    pub repository: String,
    pub owner: String,
    /// Base branch the pull request merges into. Applications match on it.
    pub branch: String,
    /// Branch the pull request was opened from.
    #[serde(default)]
    pub head_branch: Option<String>,
    /// Provider-wide pull request id, not the per-repository number.
    pub pull_request_id: String,
    pub pull_request_number: String,
    pub title: String,
    pub url: String,
    pub head_sha: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl PullRequestEvent {
    /// Branch whose code the preview runs.
    pub fn source_branch(&self) -> &str {
        self.head_branch.as_deref().unwrap_or(&self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_actions_are_kept_verbatim() {
        let action: PullRequestAction = serde_json::from_str("\"edited\"").unwrap();
        assert_eq!(action, PullRequestAction::Other("edited".into()));
        assert_eq!(action.to_string(), "edited");
        assert!(!action.deploys());
    }

    #[test]
    fn known_actions_parse() {
        let action: PullRequestAction = serde_json::from_str("\"synchronize\"").unwrap();
        assert_eq!(action, PullRequestAction::Synchronize);
        assert!(action.deploys());
        assert!(!PullRequestAction::Closed.deploys());
    }
}
