//! Immutability policies
//!
//! - The data directory volume template cannot change after creation
//! - The server edition cannot change after creation

use super::{ValidationContext, ValidationResult};

/// Only applies to UPDATE requests
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    let Some(old_cluster) = ctx.old_cluster else {
        return ValidationResult::allowed();
    };

    if old_cluster.spec.datadir_volume_claim_template
        != ctx.cluster.spec.datadir_volume_claim_template
    {
        return ValidationResult::denied(
            "DatadirImmutable",
            "spec.datadirVolumeClaimTemplate cannot be changed after creation. Delete and recreate the cluster to use different storage.",
        );
    }

    if old_cluster.spec.edition != ctx.cluster.spec.edition {
        return ValidationResult::denied(
            "EditionImmutable",
            &format!(
                "spec.edition cannot be changed after creation: {} -> {}",
                old_cluster.spec.edition, ctx.cluster.spec.edition
            ),
        );
    }

    ValidationResult::allowed()
}
