//! MySQLBackup policies
//!
//! A backup names its profile or carries one inline, never both, and the
//! cluster and profile it was created with cannot be swapped afterwards.

use super::{BackupValidationContext, ValidationResult};
use crate::controller::validation;
use crate::crd::{InnoDBCluster, MySQLBackup};

pub fn validate_backup_spec(ctx: &BackupValidationContext) -> ValidationResult {
    match validation::validate_backup_spec(&ctx.backup.spec) {
        Ok(()) => ValidationResult::allowed(),
        Err(e) => ValidationResult::from_error("InvalidSpec", &e),
    }
}

/// Only applies to UPDATE requests
pub fn validate_backup_immutability(ctx: &BackupValidationContext) -> ValidationResult {
    let Some(old) = ctx.old_backup else {
        return ValidationResult::allowed();
    };
    let new = &ctx.backup.spec;
    if old.spec.cluster_name != new.cluster_name {
        return ValidationResult::denied(
            "ClusterNameImmutable",
            "spec.clusterName cannot be changed after creation",
        );
    }
    if old.spec.backup_profile_name != new.backup_profile_name
        || old.spec.backup_profile != new.backup_profile
    {
        return ValidationResult::denied(
            "ProfileImmutable",
            "spec.backupProfileName and spec.backupProfile cannot be changed after creation",
        );
    }
    ValidationResult::allowed()
}

/// A named profile must exist on the cluster, when the cluster is known
pub fn validate_profile_reference(
    backup: &MySQLBackup,
    cluster: Option<&InnoDBCluster>,
) -> ValidationResult {
    let (Some(cluster), Some(name)) = (cluster, backup.spec.backup_profile_name.as_deref()) else {
        return ValidationResult::allowed();
    };
    if cluster.profile(name).is_none() {
        return ValidationResult::denied(
            "ProfileNotFound",
            &format!(
                "cluster {} has no backup profile {:?}",
                backup.spec.cluster_name, name
            ),
        );
    }
    ValidationResult::allowed()
}
