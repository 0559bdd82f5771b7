//! Cluster spec policy
//!
//! Name length, instance bounds, version syntax, backup profiles and
//! schedules. The reconciler repeats all but the backup checks before
//! creating anything.

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::{validate_backup_config, validate_cluster_spec};

pub fn validate_cluster(ctx: &ValidationContext) -> ValidationResult {
    let checked =
        validate_cluster_spec(ctx.cluster).and_then(|()| validate_backup_config(ctx.cluster));
    match checked {
        Ok(()) => ValidationResult::allowed(),
        Err(e) => ValidationResult::from_error("InvalidSpec", &e),
    }
}
