//! Status and conditions management for InnoDBCluster and MySQLBackup resources
//!
//! Status is computed as a pure projection of the observation and written
//! through the status subresource with a merge patch conditioned on the
//! object's resourceVersion. A lost race surfaces as a 409 and the pass is
//! retried against fresh state.

use std::collections::BTreeMap;

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use crate::controller::Context;
use crate::controller::error::{Result, with_timeout};
use crate::crd::{
    ClusterPhase, Condition, FailedHandler, InnoDBCluster, InnoDBClusterStatus, MemberStatus,
    MySQLBackup, MySQLBackupStatus, RejectedVersion,
};
use crate::resources::FIELD_MANAGER;

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Cluster accepts client connections
    pub const READY: &str = "Ready";
    /// Cluster is moving towards its desired state
    pub const PROGRESSING: &str = "Progressing";
    /// Cluster is running below its desired state
    pub const DEGRADED: &str = "Degraded";
    /// Spec passed validation and the version gate
    pub const CONFIG_VALID: &str = "ConfigurationValid";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

fn bool_status(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition; the transition time only moves when the status does
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::READY, bool_status(is_ready), reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            bool_status(is_progressing),
            reason,
            message,
        )
    }

    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::DEGRADED,
            bool_status(is_degraded),
            reason,
            message,
        )
    }

    pub fn config_valid(self, is_valid: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::CONFIG_VALID,
            bool_status(is_valid),
            reason,
            message,
        )
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Observed facts a cluster status is projected from
#[derive(Clone, Debug, Default)]
pub struct ClusterStatusInput {
    pub phase: ClusterPhase,
    pub members: Vec<MemberStatus>,
    pub online: i32,
    pub primary: Option<String>,
    /// Version the cluster is accepted to run
    pub version: Option<String>,
    pub rejected_version: Option<RejectedVersion>,
    pub handled_fields: BTreeMap<String, String>,
    pub failed_handlers: Vec<FailedHandler>,
    pub last_error: Option<String>,
}

fn conditions_for(
    existing: Vec<Condition>,
    generation: Option<i64>,
    input: &ClusterStatusInput,
) -> Vec<Condition> {
    let builder = ConditionBuilder::from_existing(existing, generation);
    let error = input.last_error.as_deref().unwrap_or("unknown error");
    let members = format!("{} members ONLINE", input.online);
    match input.phase {
        ClusterPhase::Online => builder
            .ready(true, "ClusterOnline", &members)
            .progressing(false, "Stable", "Cluster is stable")
            .degraded(false, "Healthy", "All members are ONLINE")
            .config_valid(true, "Accepted", "Spec accepted"),
        ClusterPhase::OnlinePartial => builder
            .ready(true, "QuorumIntact", &members)
            .progressing(true, "Recovering", "Waiting for members to come ONLINE")
            .degraded(true, "MembersMissing", &members)
            .config_valid(true, "Accepted", "Spec accepted"),
        ClusterPhase::OnlineUncertain => builder
            .ready(false, "QuorumUncertain", "No member can confirm a majority")
            .progressing(true, "Recovering", "Waiting for a majority of members")
            .degraded(true, "QuorumUncertain", &members),
        ClusterPhase::Pending => builder
            .ready(false, "Pending", "No server pods yet")
            .progressing(true, "CreatingResources", "Creating cluster resources"),
        ClusterPhase::Initializing => builder
            .ready(false, "Initializing", "Server pods starting")
            .progressing(true, "Bootstrapping", "Bootstrapping Group Replication"),
        ClusterPhase::Error => builder
            .ready(false, "Error", error)
            .progressing(false, "Failed", error)
            .degraded(true, "Error", error),
        ClusterPhase::Invalid => builder
            .ready(false, "Invalid", error)
            .progressing(false, "Rejected", error)
            .config_valid(false, "Rejected", error),
    }
    .build()
}

/// Project the cluster status for this pass
pub fn project_cluster_status(cluster: &InnoDBCluster, input: ClusterStatusInput) -> InnoDBClusterStatus {
    let previous = cluster.status.as_ref();
    let generation = cluster.metadata.generation;
    let conditions = conditions_for(
        previous.map(|s| s.conditions.clone()).unwrap_or_default(),
        generation,
        &input,
    );

    let phase_started_at = match previous {
        Some(prev) if prev.phase == input.phase && prev.phase_started_at.is_some() => {
            prev.phase_started_at.clone()
        }
        _ => Some(Utc::now().to_rfc3339()),
    };
    let last_error_time = match (&input.last_error, previous) {
        (None, _) => None,
        (Some(err), Some(prev)) if prev.last_error.as_ref() == Some(err) => {
            prev.last_error_time.clone()
        }
        (Some(_), _) => Some(Utc::now().to_rfc3339()),
    };

    InnoDBClusterStatus {
        phase: input.phase,
        online_instances: input.online,
        instances: cluster.spec.instances,
        primary: input.primary,
        members: input.members,
        version: input.version,
        rejected_version: input.rejected_version,
        handled_fields: input.handled_fields,
        failed_handlers: input.failed_handlers,
        last_error: input.last_error,
        last_error_time,
        phase_started_at,
        last_probe_time: Some(Utc::now().to_rfc3339()),
        observed_generation: generation,
        conditions,
    }
}

/// Merge patch body turning `old` into `new`. Fields present before and
/// absent now are sent as null so the merge removes them, at any depth:
/// a key dropped from `handledFields` must leave the stored map too.
pub fn status_patch<T: Serialize>(old: Option<&T>, new: &T) -> Result<Value> {
    let mut patch = serde_json::to_value(new)?;
    if let Some(old) = old {
        null_removed_keys(&serde_json::to_value(old)?, &mut patch);
    }
    Ok(patch)
}

fn null_removed_keys(old: &Value, new: &mut Value) {
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        return;
    };
    for (key, old_value) in old_map {
        match new_map.get_mut(key) {
            None => {
                new_map.insert(key.clone(), Value::Null);
            }
            Some(new_value) => null_removed_keys(old_value, new_value),
        }
    }
}

fn conditioned_patch(resource_version: Option<String>, status: Value) -> Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

/// Status writer for InnoDBCluster resources
pub struct ClusterStatusManager<'a> {
    cluster: &'a InnoDBCluster,
    ctx: &'a Context,
}

impl<'a> ClusterStatusManager<'a> {
    pub fn new(cluster: &'a InnoDBCluster, ctx: &'a Context) -> Self {
        Self { cluster, ctx }
    }

    /// Write the status if it differs from the stored one in anything but timestamps
    pub async fn update(&self, status: &InnoDBClusterStatus) -> Result<bool> {
        if let Some(previous) = &self.cluster.status {
            if same_cluster_status(previous, status) {
                return Ok(false);
            }
        }

        let ns = self.cluster.namespace().unwrap_or_default();
        let api: Api<InnoDBCluster> = Api::namespaced(self.ctx.client.clone(), &ns);
        let patch = conditioned_patch(
            self.cluster.resource_version(),
            status_patch(self.cluster.status.as_ref(), status)?,
        );
        with_timeout(
            self.ctx.config.api_timeout,
            "patch cluster status",
            api.patch_status(
                &self.cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            ),
        )
        .await?;
        Ok(true)
    }
}

/// Equal apart from probe time and condition timestamps
fn same_cluster_status(a: &InnoDBClusterStatus, b: &InnoDBClusterStatus) -> bool {
    let strip = |s: &InnoDBClusterStatus| InnoDBClusterStatus {
        last_probe_time: None,
        conditions: s
            .conditions
            .iter()
            .map(|c| Condition {
                last_transition_time: String::new(),
                ..c.clone()
            })
            .collect(),
        ..s.clone()
    };
    strip(a) == strip(b)
}

/// Status writer for MySQLBackup resources
pub struct BackupStatusManager<'a> {
    backup: &'a MySQLBackup,
    ctx: &'a Context,
}

impl<'a> BackupStatusManager<'a> {
    pub fn new(backup: &'a MySQLBackup, ctx: &'a Context) -> Self {
        Self { backup, ctx }
    }

    pub async fn update(&self, status: &MySQLBackupStatus) -> Result<()> {
        if self.backup.status.as_ref() == Some(status) {
            return Ok(());
        }
        let ns = self.backup.namespace().unwrap_or_default();
        let api: Api<MySQLBackup> = Api::namespaced(self.ctx.client.clone(), &ns);
        let patch = conditioned_patch(
            self.backup.resource_version(),
            status_patch(self.backup.status.as_ref(), status)?,
        );
        with_timeout(
            self.ctx.config.api_timeout,
            "patch backup status",
            api.patch_status(
                &self.backup.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            ),
        )
        .await?;
        Ok(())
    }
}
