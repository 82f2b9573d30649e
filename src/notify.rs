// ABOUTME: Outbound notifications about finished deployments.
// ABOUTME: Delivery is fire-and-forget; the default notifier emits structured log events.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    DeploymentSucceeded,
    DeploymentFailed,
    PreviewRemoved,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::DeploymentSucceeded => write!(f, "deployment succeeded"),
            NotificationEvent::DeploymentFailed => write!(f, "deployment failed"),
            NotificationEvent::PreviewRemoved => write!(f, "preview removed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notifications. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Emits each notification as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        match event {
            NotificationEvent::DeploymentFailed => {
                tracing::warn!(event = %event, payload = %payload, "notification")
            }
            _ => tracing::info!(event = %event, payload = %payload, "notification"),
        }
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationEvent, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotificationEvent, serde_json::Value)> {
        self.sent.lock().clone()
    }

    pub fn count(&self, event: NotificationEvent) -> usize {
        self.sent.lock().iter().filter(|(e, _)| *e == event).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.sent.lock().push((event, payload));
        Ok(())
    }
}
