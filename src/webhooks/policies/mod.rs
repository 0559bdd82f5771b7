//! Admission webhook policies
//!
//! Each policy module exports `validate_*` functions returning a
//! [`ValidationResult`]; the first denial wins.

pub mod backup;
pub mod cluster;
pub mod immutability;

pub use backup::{validate_backup_immutability, validate_backup_spec, validate_profile_reference};
pub use cluster::validate_cluster;
pub use immutability::validate_immutability;

use crate::controller::Error;
use crate::crd::{InnoDBCluster, MySQLBackup};

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }

    /// Deny with the message of a validation error
    pub fn from_error(reason: &str, error: &Error) -> Self {
        match error {
            Error::ValidationError(message) => Self::denied(reason, message),
            other => Self::denied(reason, &other.to_string()),
        }
    }
}

/// Cluster under admission, with the stored object on UPDATE
pub struct ValidationContext<'a> {
    pub cluster: &'a InnoDBCluster,
    pub old_cluster: Option<&'a InnoDBCluster>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(cluster: &'a InnoDBCluster, old_cluster: Option<&'a InnoDBCluster>) -> Self {
        Self {
            cluster,
            old_cluster,
        }
    }
}

pub struct BackupValidationContext<'a> {
    pub backup: &'a MySQLBackup,
    pub old_backup: Option<&'a MySQLBackup>,
}

impl<'a> BackupValidationContext<'a> {
    pub fn new(backup: &'a MySQLBackup, old_backup: Option<&'a MySQLBackup>) -> Self {
        Self { backup, old_backup }
    }
}

fn first_denial<C>(ctx: &C, policies: &[fn(&C) -> ValidationResult]) -> ValidationResult {
    policies
        .iter()
        .map(|policy| policy(ctx))
        .find(|result| !result.allowed)
        .unwrap_or_else(ValidationResult::allowed)
}

/// Run all cluster policies and return the first failure
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    first_denial(ctx, &[validate_cluster, validate_immutability as fn(&_) -> _])
}

/// Run all backup policies and return the first failure
pub fn validate_backup_all(ctx: &BackupValidationContext) -> ValidationResult {
    first_denial(ctx, &[validate_backup_spec, validate_backup_immutability as fn(&_) -> _])
}
