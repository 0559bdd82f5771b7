//! Admission webhooks for InnoDBCluster and MySQLBackup validation
//!
//! Requests are checked against the same rules the reconcilers apply, plus
//! update-only rules for fields that cannot change after creation.

pub mod policies;
mod server;

pub use policies::{BackupValidationContext, ValidationContext, ValidationResult};
pub use server::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH,
    WebhookError, run_webhook_server,
};
