// ABOUTME: Deployment state marker types for the type state pattern.
// ABOUTME: Each state carries the data that exists once the deployment reaches it.

use crate::build::BuildOutput;
use crate::orchestrator::Orchestrator;

/// Record created in `running`, log initialized.
/// Available actions: `prepare()`, `fail()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Claimed;

/// Orchestrator resolved for targets that need one.
/// Available actions: `build()`, `replay()`, `fail()`
#[derive(Debug, Clone)]
pub struct Prepared {
    pub(crate) orchestrator: Option<Orchestrator>,
}

impl Prepared {
    pub fn orchestrator(&self) -> Option<&Orchestrator> {
        self.orchestrator.as_ref()
    }
}

/// Build step finished and the workload is starting.
/// Available actions: `complete()`
#[derive(Debug, Clone)]
pub struct Built {
    pub(crate) output: BuildOutput,
}

impl Built {
    pub fn output(&self) -> &BuildOutput {
        &self.output
    }
}
