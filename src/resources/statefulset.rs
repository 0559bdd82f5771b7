//! Server StatefulSet
//!
//! One StatefulSet runs every MySQL instance of a cluster. Pods get stable
//! names (`<cluster>-<n>`) and DNS entries through the headless service, which
//! the startup script turns into `server_id`, `report_host` and the Group
//! Replication local address before handing over to the image entrypoint.
//!
//! Group membership is not decided here: instances boot with Group
//! Replication stopped and the topology manager starts it over SQL.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ExecAction, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector, SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde_json::Value;

use super::common::{
    CLUSTER_LABEL, COMPONENT_DATABASE, GR_PORT, MYSQLX_PORT, config_map_name,
    headless_service_name, image_pull_policy, merge_json, merged_labels, owner_reference,
    selector_labels, server_image, with_spec_hash,
};
use super::mycnf::{CA_MOUNT_PATH, KEYRING_MOUNT_PATH, MYCNF_KEY, TLS_MOUNT_PATH};
use super::secret::{ROOT_HOST_KEY, ROOT_PASSWORD_KEY, ROOT_USER_KEY};
use crate::config::OperatorConfig;
use crate::controller::{Error, Result};
use crate::crd::InnoDBCluster;
use crate::mysql::MYSQL_PORT;

/// Name of the server container
pub const MYSQL_CONTAINER: &str = "mysql";

/// Name of the metadata adoption sidecar
pub const SIDECAR_CONTAINER: &str = "sidecar";

const DATADIR_VOLUME: &str = "datadir";
const DEFAULT_DATADIR_SIZE: &str = "2Gi";
const GENERATED_CONF_DIR: &str = "/var/run/mysql-conf";
const BASE_CONF_DIR: &str = "/etc/mysql-base";
const INITDB_DIR: &str = "/docker-entrypoint-initdb.d";

/// Lists in the pod spec that are merged element-wise by `name`
const NAMED_LISTS: &[&str] = &["containers", "initContainers", "volumes"];

/// Composes the per-instance my.cnf and starts the server
const STARTUP_SCRIPT: &str = r#"set -e
ordinal="${HOSTNAME##*-}"
fqdn="${HOSTNAME}.${HEADLESS_SERVICE}.${POD_NAMESPACE}.svc.cluster.local"
cat "${BASE_CONF_DIR}/my.cnf" > "${CONF_DIR}/my.cnf"
cat >> "${CONF_DIR}/my.cnf" <<EOF

[mysqld]
server_id=$((BASE_SERVER_ID + ordinal))
report_host=${fqdn}
loose_group_replication_local_address=${fqdn}:${GR_PORT}
EOF
if [ "${ROOT_USER}" != "root" ]; then
  esc() { printf '%s' "$1" | sed "s/'/''/g"; }
  cat > "${INITDB_DIR}/00-admin-user.sql" <<EOF
CREATE USER IF NOT EXISTS '$(esc "${ROOT_USER}")'@'$(esc "${ROOT_HOST}")' IDENTIFIED BY '$(esc "${MYSQL_ROOT_PASSWORD}")';
GRANT ALL ON *.* TO '$(esc "${ROOT_USER}")'@'$(esc "${ROOT_HOST}")' WITH GRANT OPTION;
EOF
fi
exec /entrypoint.sh mysqld --defaults-extra-file="${CONF_DIR}/my.cnf"
"#;

/// Registers a running group in the InnoDB Cluster metadata so routers can
/// bootstrap against it. Only the primary acts, and only once.
const SIDECAR_SCRIPT: &str = r#"while sleep 15; do
  mysqlsh --no-wizard --js -u "${ROOT_USER}" --password="${MYSQL_ROOT_PASSWORD}" -h 127.0.0.1 -P 3306 -e "
    var r = session.runSql(\"SELECT COUNT(*) FROM performance_schema.replication_group_members WHERE MEMBER_ROLE = 'PRIMARY' AND MEMBER_STATE = 'ONLINE' AND MEMBER_HOST = @@report_host\").fetchOne();
    if (r[0] == 1) {
      try { dba.getCluster(); } catch (e) { dba.createCluster('${CLUSTER_NAME}', {adoptFromGR: true}); }
    }
  " >/dev/null 2>&1 || true
done
"#;

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret_name: &str, key: &str, optional: bool) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(optional),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Credential environment shared by the server and sidecar containers
fn credential_env(secret_name: &str) -> Vec<EnvVar> {
    vec![
        secret_env("MYSQL_ROOT_PASSWORD", secret_name, ROOT_PASSWORD_KEY, false),
        secret_env("ROOT_USER", secret_name, ROOT_USER_KEY, true),
        secret_env("ROOT_HOST", secret_name, ROOT_HOST_KEY, true),
        secret_env("MYSQL_ROOT_HOST", secret_name, ROOT_HOST_KEY, true),
    ]
}

/// Spread instances across nodes, then zones
fn generate_anti_affinity(cluster_name: &str) -> Affinity {
    let term = |weight: i32, topology_key: &str| WeightedPodAffinityTerm {
        weight,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: CLUSTER_LABEL.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![cluster_name.to_string()]),
                }]),
                ..Default::default()
            }),
            topology_key: topology_key.to_string(),
            ..Default::default()
        },
    };

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                term(100, "kubernetes.io/hostname"),
                term(50, "topology.kubernetes.io/zone"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ping_probe(initial_delay: i32, failure_threshold: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "mysqladmin".to_string(),
                "ping".to_string(),
                "-h".to_string(),
                "127.0.0.1".to_string(),
                "--silent".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(0o400),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Overlay the user pod spec fragment. Containers, init containers and
/// volumes are matched by name; everything else follows JSON merge patch.
pub fn merge_pod_spec(base: &mut Value, overlay: &Value) {
    let Value::Object(overlay_map) = overlay else {
        return;
    };
    let Value::Object(base_map) = base else {
        return;
    };

    for (key, value) in overlay_map {
        if value.is_null() {
            base_map.remove(key);
            continue;
        }
        let named = NAMED_LISTS.contains(&key.as_str())
            && value.is_array()
            && base_map.get(key).is_some_and(Value::is_array);
        if !named {
            merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
            continue;
        }

        let (Some(Value::Array(existing)), Value::Array(items)) = (base_map.get_mut(key), value)
        else {
            continue;
        };
        for item in items {
            let name = item.get("name").and_then(Value::as_str);
            let slot = name.and_then(|n| {
                existing
                    .iter_mut()
                    .find(|e| e.get("name").and_then(Value::as_str) == Some(n))
            });
            match slot {
                Some(slot) => merge_json(slot, item),
                None => existing.push(item.clone()),
            }
        }
    }
}

/// Generate the server StatefulSet for the given effective version
pub fn generate_statefulset(
    cluster: &InnoDBCluster,
    config: &OperatorConfig,
    version: &str,
) -> Result<StatefulSet> {
    let name = cluster.name_any();
    let spec = &cluster.spec;
    let headless = headless_service_name(&name);
    let pull_policy = image_pull_policy(cluster, config);

    let mut server_env = vec![
        field_env("POD_NAMESPACE", "metadata.namespace"),
        plain_env("HEADLESS_SERVICE", headless.clone()),
        plain_env("BASE_SERVER_ID", spec.base_server_id.to_string()),
        plain_env("GR_PORT", GR_PORT.to_string()),
        plain_env("CONF_DIR", GENERATED_CONF_DIR),
        plain_env("BASE_CONF_DIR", BASE_CONF_DIR),
        plain_env("INITDB_DIR", INITDB_DIR),
    ];
    server_env.extend(credential_env(&spec.secret_name));

    let mut server_mounts = vec![
        volume_mount(DATADIR_VOLUME, "/var/lib/mysql", false),
        volume_mount("mycnf", BASE_CONF_DIR, true),
        volume_mount("rundir", GENERATED_CONF_DIR, false),
        volume_mount("initdb", INITDB_DIR, false),
    ];
    let mut volumes = vec![
        Volume {
            name: "mycnf".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(&name),
                items: Some(vec![k8s_openapi::api::core::v1::KeyToPath {
                    key: MYCNF_KEY.to_string(),
                    path: "my.cnf".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
        empty_dir("rundir"),
        empty_dir("initdb"),
    ];

    if let Some(tls) = &spec.tls_secret_name {
        server_mounts.push(volume_mount("tls", TLS_MOUNT_PATH, true));
        volumes.push(secret_volume("tls", tls));
    }
    if let Some(ca) = &spec.tls_ca_secret_name {
        server_mounts.push(volume_mount("tls-ca", CA_MOUNT_PATH, true));
        volumes.push(secret_volume("tls-ca", ca));
    }
    if let Some(keyring) = &spec.keyring {
        server_mounts.push(volume_mount(
            "keyring",
            KEYRING_MOUNT_PATH,
            keyring.file.read_only,
        ));
        volumes.push(secret_volume("keyring", &keyring.file.secret_name));
    }

    let server = Container {
        name: MYSQL_CONTAINER.to_string(),
        image: Some(server_image(cluster, config, version)),
        image_pull_policy: Some(pull_policy.clone()),
        command: Some(vec!["bash".to_string(), "-c".to_string(), STARTUP_SCRIPT.to_string()]),
        ports: Some(vec![
            ContainerPort {
                container_port: i32::from(MYSQL_PORT),
                name: Some("mysql".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: MYSQLX_PORT,
                name: Some("mysqlx".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: GR_PORT,
                name: Some("gr-xcom".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(server_env),
        volume_mounts: Some(server_mounts),
        // initialization of a fresh datadir can take minutes
        startup_probe: Some(ping_probe(10, 60)),
        readiness_probe: Some(ping_probe(5, 3)),
        liveness_probe: Some(ping_probe(30, 6)),
        ..Default::default()
    };

    let mut sidecar_env = vec![plain_env("CLUSTER_NAME", name.clone())];
    sidecar_env.extend(credential_env(&spec.secret_name));
    let sidecar = Container {
        name: SIDECAR_CONTAINER.to_string(),
        image: Some(config.operator_image.clone()),
        image_pull_policy: Some(pull_policy),
        command: Some(vec!["bash".to_string(), "-c".to_string(), SIDECAR_SCRIPT.to_string()]),
        env: Some(sidecar_env),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![server, sidecar],
        volumes: Some(volumes),
        subdomain: Some(headless.clone()),
        termination_grace_period_seconds: Some(120),
        affinity: Some(generate_anti_affinity(&name)),
        security_context: Some(k8s_openapi::api::core::v1::PodSecurityContext {
            fs_group: Some(27),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pod_spec = match &spec.pod_spec {
        Some(overlay) => {
            let mut value = serde_json::to_value(&pod_spec)?;
            merge_pod_spec(&mut value, overlay);
            serde_json::from_value(value)
                .map_err(|e| Error::InvalidConfig(format!("spec.podSpec: {}", e)))?
        }
        None => pod_spec,
    };

    let datadir = spec.datadir_volume_claim_template.as_ref();
    let pvc_template = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATADIR_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: datadir.and_then(|d| d.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(
                        datadir
                            .map(|d| d.size.clone())
                            .unwrap_or_else(|| DEFAULT_DATADIR_SIZE.to_string()),
                    ),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let labels = merged_labels(&name, COMPONENT_DATABASE, &spec.pod_labels);

    Ok(with_spec_hash(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(merged_labels(&name, COMPONENT_DATABASE, &BTreeMap::new())),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(headless),
            replicas: Some(spec.instances),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name, COMPONENT_DATABASE)),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            pod_management_policy: Some("Parallel".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: (!spec.pod_annotations.is_empty())
                        .then(|| spec.pod_annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates: Some(vec![pvc_template]),
            persistent_volume_claim_retention_policy: Some(
                k8s_openapi::api::apps::v1::StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Retain".to_string()),
                    when_scaled: Some("Retain".to_string()),
                },
            ),
            ..Default::default()
        }),
        ..Default::default()
    }))
}
