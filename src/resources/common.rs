//! Common utilities for Kubernetes resource generation
//!
//! Naming, labels, owner references and the spec-hash annotation shared by
//! every generator, so child objects of one cluster stay consistent.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::OperatorConfig;
use crate::crd::{InnoDBCluster, MySQLBackup};

/// API version for the operator's CRDs
pub const API_VERSION: &str = "mysql.oracle.com/v2";

pub const CLUSTER_KIND: &str = "InnoDBCluster";

pub const BACKUP_KIND: &str = "MySQLBackup";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "mysql-operator";

/// Label carrying the owning cluster name on every child object
pub const CLUSTER_LABEL: &str = "mysql.oracle.com/cluster";

/// Label on backups generated by a schedule
pub const SCHEDULE_LABEL: &str = "mysql.oracle.com/schedule";

/// Annotation holding the hash of a generated object's content
pub const SPEC_HASH_ANNOTATION: &str = "mysql.oracle.com/spec-hash";

/// Component label values
pub const COMPONENT_DATABASE: &str = "database";
pub const COMPONENT_ROUTER: &str = "router";
pub const COMPONENT_BACKUP: &str = "backup";

/// Group Replication communication port
pub const GR_PORT: i32 = 33061;
/// X protocol port
pub const MYSQLX_PORT: i32 = 33060;

/// Generate a controller owner reference for an InnoDBCluster
///
/// All child objects are garbage collected with the cluster.
pub fn owner_reference(cluster: &InnoDBCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: CLUSTER_KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Owner reference from a backup to its cluster. Not a controller reference,
/// so a user-created backup keeps its own lifecycle but is removed with the cluster.
pub fn cluster_backup_owner_reference(cluster: &InnoDBCluster) -> OwnerReference {
    OwnerReference {
        controller: Some(false),
        block_owner_deletion: Some(false),
        ..owner_reference(cluster)
    }
}

/// Controller owner reference for objects belonging to a MySQLBackup
pub fn backup_owner_reference(backup: &MySQLBackup) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: BACKUP_KIND.to_string(),
        name: backup.name_any(),
        uid: backup.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate standard labels for all resources belonging to an InnoDBCluster
pub fn standard_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "mysql-innodbcluster".to_string()),
        ("app.kubernetes.io/instance".to_string(), cluster_name.to_string()),
        ("app.kubernetes.io/component".to_string(), component.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), FIELD_MANAGER.to_string()),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Minimal label set used in selectors. Selectors are immutable on
/// StatefulSets and Deployments, so user labels never go in here.
pub fn selector_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/instance".to_string(), cluster_name.to_string()),
        ("app.kubernetes.io/component".to_string(), component.to_string()),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Standard labels merged with user labels. User labels cannot override the
/// cluster identifier or the selector labels.
pub fn merged_labels(
    cluster_name: &str,
    component: &str,
    user: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let protected = selector_labels(cluster_name, component);
    let mut labels = standard_labels(cluster_name, component);
    for (key, value) in user {
        if !protected.contains_key(key) {
            labels.insert(key.clone(), value.clone());
        }
    }
    labels
}

pub fn headless_service_name(cluster_name: &str) -> String {
    format!("{}-instances", cluster_name)
}

pub fn router_name(cluster_name: &str) -> String {
    format!("{}-router", cluster_name)
}

pub fn pdb_name(cluster_name: &str) -> String {
    format!("{}-pdb", cluster_name)
}

pub fn config_map_name(cluster_name: &str) -> String {
    format!("{}-mycnf", cluster_name)
}

pub fn cronjob_name(cluster_name: &str, schedule_name: &str) -> String {
    format!("{}-{}-cb", cluster_name, schedule_name)
}

pub fn backup_job_name(backup_name: &str) -> String {
    format!("{}-job", backup_name)
}

pub fn purge_job_name(backup_name: &str) -> String {
    format!("{}-purge", backup_name)
}

pub fn pod_name(cluster_name: &str, ordinal: i32) -> String {
    format!("{}-{}", cluster_name, ordinal)
}

/// Stable DNS name of a server pod, also used as its `report_host`
pub fn pod_fqdn(cluster_name: &str, ordinal: i32, namespace: &str) -> String {
    format!(
        "{}.{}.{}.svc.cluster.local",
        pod_name(cluster_name, ordinal),
        headless_service_name(cluster_name),
        namespace
    )
}

/// Ordinal encoded in a pod name or member host (`<cluster>-<n>[.…]`)
pub fn ordinal_from_host(cluster_name: &str, host: &str) -> Option<i32> {
    let pod = host.split('.').next()?;
    let suffix = pod.strip_prefix(cluster_name)?.strip_prefix('-')?;
    suffix.parse().ok()
}

/// Group Replication seed addresses for the first `instances` ordinals
pub fn group_seeds(cluster_name: &str, namespace: &str, instances: i32) -> Vec<String> {
    (0..instances.max(1))
        .map(|i| format!("{}:{}", pod_fqdn(cluster_name, i, namespace), GR_PORT))
        .collect()
}

/// Server version the cluster asks for
pub fn requested_version(cluster: &InnoDBCluster, config: &OperatorConfig) -> String {
    cluster
        .spec
        .version
        .clone()
        .unwrap_or_else(|| config.default_version.clone())
}

fn image_repository<'a>(cluster: &'a InnoDBCluster, config: &'a OperatorConfig) -> &'a str {
    cluster
        .spec
        .image_repository
        .as_deref()
        .unwrap_or(&config.image_repository)
        .trim_end_matches('/')
}

/// Server image for a given version
pub fn server_image(cluster: &InnoDBCluster, config: &OperatorConfig, version: &str) -> String {
    format!(
        "{}/{}-server:{}",
        image_repository(cluster, config),
        cluster.spec.edition,
        version
    )
}

/// Router image, defaulting to the server version
pub fn router_image(cluster: &InnoDBCluster, config: &OperatorConfig, server_version: &str) -> String {
    let version = cluster.spec.router.version.as_deref().unwrap_or(server_version);
    format!(
        "{}/{}-router:{}",
        image_repository(cluster, config),
        cluster.spec.edition,
        version
    )
}

pub fn image_pull_policy(cluster: &InnoDBCluster, config: &OperatorConfig) -> String {
    cluster
        .spec
        .image_pull_policy
        .clone()
        .unwrap_or_else(|| config.image_pull_policy.clone())
}

/// Hex SHA-256 of an object's JSON form
pub fn spec_hash<T: Serialize>(object: &T) -> String {
    let bytes = serde_json::to_vec(object).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}

/// Stamp the content hash onto generated metadata
pub fn with_spec_hash<T>(mut object: T) -> T
where
    T: kube::Resource + Serialize,
{
    let hash = spec_hash(&object);
    object
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash);
    object
}

/// Content hash previously stamped on an object
pub fn stamped_hash<T: kube::Resource>(object: &T) -> Option<String> {
    object
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(SPEC_HASH_ANNOTATION).cloned())
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    use serde_json::Value;

    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_json(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
