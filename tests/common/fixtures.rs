//! Builders for InnoDBCluster and MySQLBackup resources and for the
//! observations the planner works from
//!
//! ```rust,ignore
//! let cluster = InnoDBClusterBuilder::new("mycluster", "db")
//!     .with_instances(3)
//!     .with_phase(ClusterPhase::Online)
//!     .build();
//! let observation = ObservationBuilder::new("mycluster", "db")
//!     .group(&[(0, GroupMemberState::Online), (1, GroupMemberState::Online)])
//!     .build();
//! ```

use std::collections::BTreeMap;

use kube::core::ObjectMeta;
use mysql_operator::controller::observe::{ChildKey, ObservedPod, Observation, Probe};
use mysql_operator::crd::{
    BackupProfile, BackupSchedule, ClusterPhase, InnoDBCluster, InnoDBClusterSpec,
    InnoDBClusterStatus, MySQLBackup, MySQLBackupSpec,
};
use mysql_operator::mysql::{GroupMember, GroupMemberRole, GroupMemberState};
use serde_json::json;

pub const TEST_NAMESPACE: &str = "db";

// =============================================================================
// InnoDBCluster
// =============================================================================

pub fn create_test_cluster(name: &str, namespace: &str, instances: i32) -> InnoDBCluster {
    InnoDBClusterBuilder::new(name, namespace)
        .with_instances(instances)
        .build()
}

pub fn volume_profile(name: &str, claim: &str) -> BackupProfile {
    serde_json::from_value(json!({
        "name": name,
        "dumpInstance": {"storage": {"persistentVolumeClaim": {"claimName": claim}}}
    }))
    .unwrap()
}

pub fn s3_profile(name: &str, bucket: &str) -> BackupProfile {
    serde_json::from_value(json!({
        "name": name,
        "dumpInstance": {"storage": {"s3": {
            "bucketName": bucket,
            "prefix": "/backups",
            "config": "s3-credentials"
        }}}
    }))
    .unwrap()
}

pub fn schedule(name: &str, profile: &str, enabled: bool) -> BackupSchedule {
    serde_json::from_value(json!({
        "name": name,
        "schedule": "*/30 * * * *",
        "enabled": enabled,
        "backupProfileName": profile
    }))
    .unwrap()
}

#[allow(dead_code)]
pub struct InnoDBClusterBuilder {
    name: String,
    namespace: String,
    uid: String,
    generation: i64,
    spec: serde_json::Value,
    status: Option<InnoDBClusterStatus>,
}

#[allow(dead_code)]
impl InnoDBClusterBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: "test-uid-12345".to_string(),
            generation: 1,
            spec: json!({"secretName": "mypwds", "instances": 3}),
            status: None,
        }
    }

    pub fn with_instances(mut self, instances: i32) -> Self {
        self.spec["instances"] = json!(instances);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.spec["version"] = json!(version);
        self
    }

    pub fn with_router_instances(mut self, instances: i32) -> Self {
        self.spec["router"]["instances"] = json!(instances);
        self
    }

    pub fn with_routing_options(mut self, options: serde_json::Value) -> Self {
        self.spec["router"]["routingOptions"] = options;
        self
    }

    pub fn with_bootstrap_options(mut self, options: &[&str]) -> Self {
        self.spec["router"]["bootstrapOptions"] = json!(options);
        self
    }

    pub fn with_profile(mut self, profile: BackupProfile) -> Self {
        let mut profiles = self.spec["backupProfiles"].as_array().cloned().unwrap_or_default();
        profiles.push(serde_json::to_value(profile).unwrap());
        self.spec["backupProfiles"] = json!(profiles);
        self
    }

    pub fn with_schedule(mut self, schedule: BackupSchedule) -> Self {
        let mut schedules = self.spec["backupSchedules"].as_array().cloned().unwrap_or_default();
        schedules.push(serde_json::to_value(schedule).unwrap());
        self.spec["backupSchedules"] = json!(schedules);
        self
    }

    pub fn with_spec_field(mut self, field: &str, value: serde_json::Value) -> Self {
        self.spec[field] = value;
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_status(mut self, status: InnoDBClusterStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_phase(mut self, phase: ClusterPhase) -> Self {
        let mut status = self.status.take().unwrap_or_default();
        status.phase = phase;
        self.status = Some(status);
        self
    }

    /// Status of a cluster that already runs `version`
    pub fn running(mut self, version: &str) -> Self {
        let mut status = self.status.take().unwrap_or_default();
        status.version = Some(version.to_string());
        self.status = Some(status);
        self
    }

    pub fn build(self) -> InnoDBCluster {
        let spec: InnoDBClusterSpec = serde_json::from_value(self.spec).unwrap();
        InnoDBCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: Some(self.uid),
                generation: Some(self.generation),
                ..Default::default()
            },
            spec,
            status: self.status,
        }
    }
}

// =============================================================================
// MySQLBackup
// =============================================================================

pub fn create_test_backup(name: &str, cluster: &str, profile: &str) -> MySQLBackup {
    MySQLBackup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: MySQLBackupSpec {
            cluster_name: cluster.to_string(),
            backup_profile_name: Some(profile.to_string()),
            backup_profile: None,
            delete_backup_data: false,
            add_timestamp_to_backup_directory: true,
        },
        status: None,
    }
}

// =============================================================================
// Status writes
// =============================================================================

/// Apply a JSON merge patch (RFC 7386) the way the API server does for
/// `application/merge-patch+json`
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let Some(target_map) = target.as_object_mut() else {
        return;
    };
    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
        } else {
            merge_patch(
                target_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                value,
            );
        }
    }
}

// =============================================================================
// Observations
// =============================================================================

pub fn member_host(cluster: &str, namespace: &str, ordinal: i32) -> String {
    format!("{}-{}.{}-instances.{}.svc.cluster.local", cluster, ordinal, cluster, namespace)
}

/// Builder for the planner's view of pods and child objects
#[allow(dead_code)]
pub struct ObservationBuilder {
    cluster: String,
    namespace: String,
    pods: BTreeMap<i32, ObservedPod>,
    children: Vec<(ChildKey, Option<String>)>,
}

#[allow(dead_code)]
impl ObservationBuilder {
    pub fn new(cluster: &str, namespace: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            pods: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    fn group_member(&self, ordinal: i32, state: GroupMemberState, primary: bool) -> GroupMember {
        GroupMember {
            member_id: format!("uuid-{}", ordinal),
            host: member_host(&self.cluster, &self.namespace, ordinal),
            port: 3306,
            state,
            role: (state == GroupMemberState::Online).then_some(if primary {
                GroupMemberRole::Primary
            } else {
                GroupMemberRole::Secondary
            }),
            version: Some("8.4.3".to_string()),
        }
    }

    /// A group whose members all report the same view; the first ONLINE
    /// member is the primary
    pub fn group(mut self, members: &[(i32, GroupMemberState)]) -> Self {
        let primary = members
            .iter()
            .find(|(_, s)| *s == GroupMemberState::Online)
            .map(|(o, _)| *o);
        let view: Vec<GroupMember> = members
            .iter()
            .map(|(o, s)| self.group_member(*o, *s, Some(*o) == primary))
            .collect();
        for (ordinal, _) in members {
            self = self.reachable(*ordinal, view.clone(), "uuid-g:1-10");
        }
        self
    }

    /// A running pod that answers over SQL with the given view
    pub fn reachable(mut self, ordinal: i32, members: Vec<GroupMember>, gtids: &str) -> Self {
        self.pods.insert(
            ordinal,
            ObservedPod {
                ordinal,
                name: format!("{}-{}", self.cluster, ordinal),
                running: true,
                deleting: false,
                waiting_reason: None,
                probe: Probe::Reachable {
                    members,
                    gtid_executed: gtids.to_string(),
                    version: Some("8.4.3".to_string()),
                },
            },
        );
        self
    }

    /// A running pod outside any group
    pub fn standalone(self, ordinal: i32, gtids: &str) -> Self {
        let own = self.group_member(ordinal, GroupMemberState::Offline, false);
        self.reachable(ordinal, vec![own], gtids)
    }

    pub fn unreachable(mut self, ordinal: i32) -> Self {
        self.pods.insert(
            ordinal,
            ObservedPod {
                ordinal,
                name: format!("{}-{}", self.cluster, ordinal),
                running: true,
                deleting: false,
                waiting_reason: None,
                probe: Probe::Unreachable("connection refused".to_string()),
            },
        );
        self
    }

    pub fn waiting(mut self, ordinal: i32, reason: &str) -> Self {
        self.pods.insert(
            ordinal,
            ObservedPod {
                ordinal,
                name: format!("{}-{}", self.cluster, ordinal),
                running: false,
                deleting: false,
                waiting_reason: Some(reason.to_string()),
                probe: Probe::NotProbed,
            },
        );
        self
    }

    pub fn with_child(mut self, key: ChildKey, hash: Option<&str>) -> Self {
        self.children.push((key, hash.map(String::from)));
        self
    }

    pub fn build(self) -> Observation {
        let mut observation = Observation::new(&self.cluster, &self.namespace);
        observation.pods = self.pods.into_values().collect();
        observation.children = self.children.into_iter().collect();
        observation
    }
}
