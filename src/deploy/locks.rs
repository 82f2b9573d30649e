// ABOUTME: Per-lane mutual exclusion shared by every scheduler backend and preview teardown.
// ABOUTME: One FIFO async mutex per lane key, with the current holder recorded.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::types::JobId;

/// Who holds a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Hostname of the machine running the job.
    pub worker: String,
    /// Process ID of the control plane.
    pub pid: u32,
    pub job: JobId,
    pub since: DateTime<Utc>,
}

impl LockHolder {
    pub fn new(job: JobId) -> Self {
        Self {
            worker: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            job,
            since: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    holders: Mutex<HashMap<String, LockHolder>>,
}

/// Serializes jobs per lane.
///
/// A lane is a target's lock key, or `preview:{id}` for a preview. Waiters
/// are admitted in arrival order. Cloning shares the lock table, so a
/// queue and a direct dispatcher built from clones exclude each other.
#[derive(Clone, Default)]
pub struct TargetLocks {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TargetLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetLocks")
            .field("held", &self.inner.holders.lock().len())
            .finish()
    }
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lanes
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Wait for the lane and hold it until the guard drops.
    pub async fn lock(&self, lane: &str, job: &JobId) -> TargetGuard {
        let guard = self.lane(lane).lock_owned().await;
        self.held(lane.to_string(), guard, job)
    }

    /// Take the lane only if nobody holds it.
    pub fn try_lock(&self, lane: &str, job: &JobId) -> Option<TargetGuard> {
        let guard = self.lane(lane).try_lock_owned().ok()?;
        Some(self.held(lane.to_string(), guard, job))
    }

    /// Current holder of a lane, if any.
    pub fn holder(&self, lane: &str) -> Option<LockHolder> {
        self.inner.holders.lock().get(lane).cloned()
    }

    fn held(&self, key: String, guard: OwnedMutexGuard<()>, job: &JobId) -> TargetGuard {
        self.inner
            .holders
            .lock()
            .insert(key.clone(), LockHolder::new(job.clone()));
        TargetGuard {
            inner: self.inner.clone(),
            key,
            _guard: guard,
        }
    }
}

/// Exclusive hold on one lane.
pub struct TargetGuard {
    inner: Arc<Inner>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for TargetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetGuard").field("key", &self.key).finish()
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.inner.holders.lock().remove(&self.key);
    }
}
