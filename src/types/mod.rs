// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to keep record, target, and server IDs apart at compile time.

mod app_name;
mod id;
mod image_ref;

pub use app_name::{AppName, AppNameError};
pub use id::{
    ApplicationId, BackupId, ComposeId, DeploymentId, DomainId, Id, JobId, OrganizationId,
    PreviewId, RollbackId, ScheduleId, ServerId, VolumeBackupId,
};
pub use image_ref::{ImageRef, ParseImageRefError};
