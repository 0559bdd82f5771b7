//! Server configuration ConfigMap
//!
//! Holds the part of `my.cnf` shared by every instance. Per-instance values
//! (`server_id`, `report_host`, the Group Replication local address) are
//! appended by the pod startup script, and the group seeds are set at runtime
//! before an instance bootstraps or joins.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use super::common::{
    COMPONENT_DATABASE, config_map_name, owner_reference, standard_labels,
    with_spec_hash,
};
use crate::crd::InnoDBCluster;

/// Key of the generated configuration inside the ConfigMap
pub const MYCNF_KEY: &str = "my.cnf";

/// Mount points shared with the StatefulSet
pub const TLS_MOUNT_PATH: &str = "/etc/mysql-tls";
pub const CA_MOUNT_PATH: &str = "/etc/mysql-ca";
pub const KEYRING_MOUNT_PATH: &str = "/keyring";

/// Render the shared `my.cnf`
pub fn render_mycnf(cluster: &InnoDBCluster) -> String {
    let group_name = cluster.metadata.uid.clone().unwrap_or_default();
    let mut cnf = String::from("[mysqld]\n");

    cnf.push_str("gtid_mode=ON\n");
    cnf.push_str("enforce_gtid_consistency=ON\n");
    cnf.push_str("skip_replica_start=ON\n");
    cnf.push_str("plugin_load_add=group_replication.so\n");
    let _ = writeln!(cnf, "loose_group_replication_group_name={}", group_name);
    cnf.push_str("loose_group_replication_start_on_boot=OFF\n");
    cnf.push_str("loose_group_replication_single_primary_mode=ON\n");
    cnf.push_str("loose_group_replication_ssl_mode=REQUIRED\n");
    cnf.push_str("loose_group_replication_recovery_use_ssl=ON\n");
    cnf.push_str("loose_group_replication_ip_allowlist=AUTOMATIC\n");

    if cluster.spec.tls_secret_name.is_some() {
        let _ = writeln!(cnf, "ssl_cert={}/tls.crt", TLS_MOUNT_PATH);
        let _ = writeln!(cnf, "ssl_key={}/tls.key", TLS_MOUNT_PATH);
    }
    if cluster.spec.tls_ca_secret_name.is_some() {
        let _ = writeln!(cnf, "ssl_ca={}/ca.pem", CA_MOUNT_PATH);
    }

    if let Some(keyring) = &cluster.spec.keyring {
        cnf.push_str("early_plugin_load=keyring_file.so\n");
        let _ = writeln!(
            cnf,
            "keyring_file_data={}/{}",
            KEYRING_MOUNT_PATH,
            keyring.file.file_name.trim_start_matches('/')
        );
        if keyring.file.read_only {
            cnf.push_str("loose_keyring_operations=OFF\n");
        }
    }

    if let Some(extra) = cluster.spec.mycnf.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        cnf.push('\n');
        cnf.push_str(extra);
        cnf.push('\n');
    }

    cnf
}

/// Generate the `<cluster>-mycnf` ConfigMap
pub fn generate_config_map(cluster: &InnoDBCluster) -> ConfigMap {
    let name = cluster.name_any();

    with_spec_hash(ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(&name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&name, COMPONENT_DATABASE)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(MYCNF_KEY.to_string(), render_mycnf(cluster))])),
        ..Default::default()
    })
}
