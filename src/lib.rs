// ABOUTME: Library root for flotilla - the deployment control plane.
// ABOUTME: The flotilla binary in main.rs is a thin CLI over ControlPlane.

pub mod build;
pub mod config;
pub mod control;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod logs;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod preview;
pub mod remote;
pub mod rollback;
pub mod ssh;
pub mod store;
pub mod types;
