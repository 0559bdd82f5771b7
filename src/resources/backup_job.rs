//! Backup and purge Jobs
//!
//! A backup Job runs MySQL Shell `util.dumpInstance` against one cluster
//! member and reports what it wrote through its container termination
//! message. Purge Jobs remove the data of volume and blob container backups,
//! which the operator cannot reach directly.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::common::{
    COMPONENT_BACKUP, backup_job_name, backup_owner_reference, owner_reference, purge_job_name,
    standard_labels,
};
use super::secret::{ROOT_PASSWORD_KEY, ROOT_USER_KEY};
use crate::config::OperatorConfig;
use crate::crd::{BackupProfile, BackupStorage, InnoDBCluster, MySQLBackup};
use crate::mysql::MYSQL_PORT;

/// Mount point of a volume backup target
pub const STORAGE_MOUNT_PATH: &str = "/mnt/storage";

/// Seconds a finished purge Job is kept
const PURGE_TTL_SECONDS: i32 = 600;

/// Runs the dump and writes the termination message
const DUMP_SCRIPT: &str = r#"set -u
report() {
  printf '{"output":"%s","size":"%s","spaceAvailable":"%s","source":"%s","message":"%s"}' \
    "${OUTPUT}" "$1" "$2" "${MYSQL_USER}@${SOURCE_HOST}:${SOURCE_PORT}" "$3" > /dev/termination-log
}
if mysqlsh --no-wizard --js -u "${MYSQL_USER}" --password="${MYSQL_PASSWORD}" \
    -h "${SOURCE_HOST}" -P "${SOURCE_PORT}" \
    -e "util.dumpInstance(os.getenv('DUMP_TARGET'), JSON.parse(os.getenv('DUMP_OPTIONS')))"; then
  if [ -d "${DUMP_TARGET}" ]; then
    report "$(du -sh "${DUMP_TARGET}" | cut -f1)" "$(df -h "${DUMP_TARGET}" | awk 'NR==2 {print $4}')" ""
  else
    report "n/a" "n/a" ""
  fi
else
  report "n/a" "n/a" "util.dumpInstance failed"
  exit 1
fi
"#;

/// What the dump container reports on exit
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminationReport {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub space_available: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse a termination message. Anything that is not the JSON report is
/// returned as a plain message.
pub fn parse_termination_message(raw: &str) -> TerminationReport {
    let trimmed = raw.trim();
    serde_json::from_str::<TerminationReport>(trimmed)
        .map(|mut report| {
            report.message = report.message.filter(|m| !m.is_empty());
            report
        })
        .unwrap_or_else(|_| TerminationReport {
            message: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            ..Default::default()
        })
}

/// Dump location passed to `util.dumpInstance`: a path on the mounted volume
/// or an object prefix
pub fn dump_target(storage: &BackupStorage, output: &str) -> String {
    if storage.persistent_volume_claim.is_some() {
        return format!("{}/{}", STORAGE_MOUNT_PATH, output);
    }
    let prefix = storage
        .s3
        .as_ref()
        .and_then(|s| s.prefix.as_deref())
        .or_else(|| storage.azure.as_ref().and_then(|a| a.prefix.as_deref()))
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());
    match prefix {
        Some(prefix) => format!("{}/{}", prefix, output),
        None => output.to_string(),
    }
}

/// `util.dumpInstance` options: the profile's options plus the storage
/// specific ones
pub fn dump_options(profile: &BackupProfile) -> Value {
    let dump = &profile.dump_instance;
    let mut options: Map<String, Value> = dump
        .dump_options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if !dump.exclude_schemas.is_empty() {
        options.insert("excludeSchemas".to_string(), dump.exclude_schemas.clone().into());
    }
    if !dump.exclude_tables.is_empty() {
        options.insert("excludeTables".to_string(), dump.exclude_tables.clone().into());
    }
    if let Some(s3) = &dump.storage.s3 {
        options.insert("s3BucketName".to_string(), s3.bucket_name.clone().into());
        if let Some(endpoint) = &s3.endpoint {
            options.insert("s3EndpointOverride".to_string(), endpoint.clone().into());
        }
    }
    if let Some(azure) = &dump.storage.azure {
        options.insert(
            "azureContainerName".to_string(),
            azure.container_name.clone().into(),
        );
    }

    Value::Object(options)
}

fn env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
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

/// Credential environment for the storage target
fn storage_env(storage: &BackupStorage) -> Vec<EnvVar> {
    let mut vars = Vec::new();
    if let Some(s3) = &storage.s3 {
        vars.push(secret_env("AWS_ACCESS_KEY_ID", &s3.config, "accessKeyId", false));
        vars.push(secret_env("AWS_SECRET_ACCESS_KEY", &s3.config, "secretAccessKey", false));
        vars.push(secret_env("AWS_REGION", &s3.config, "region", true));
    }
    if let Some(azure) = &storage.azure {
        vars.push(secret_env(
            "AZURE_STORAGE_CONNECTION_STRING",
            &azure.config,
            "connectionString",
            false,
        ));
    }
    vars
}

fn storage_volume(storage: &BackupStorage) -> Option<(Volume, VolumeMount)> {
    storage.persistent_volume_claim.as_ref().map(|pvc| {
        (
            Volume {
                name: "storage".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pvc.claim_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            VolumeMount {
                name: "storage".to_string(),
                mount_path: STORAGE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
        )
    })
}

fn backup_labels(cluster_name: &str, backup_name: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(cluster_name, COMPONENT_BACKUP);
    labels.insert("mysql.oracle.com/backup".to_string(), backup_name.to_string());
    labels
}

/// Generate the `<backup>-job` Job
///
/// `source_host` is the member the dump is taken from and `output` the
/// backup directory name recorded in the backup status.
pub fn generate_backup_job(
    backup: &MySQLBackup,
    cluster: &InnoDBCluster,
    profile: &BackupProfile,
    source_host: &str,
    output: &str,
    config: &OperatorConfig,
) -> Job {
    let backup_name = backup.name_any();
    let cluster_name = cluster.name_any();
    let storage = &profile.dump_instance.storage;
    let labels = backup_labels(&cluster_name, &backup_name);

    let mut env_vars = vec![
        secret_env("MYSQL_USER", &cluster.spec.secret_name, ROOT_USER_KEY, false),
        secret_env("MYSQL_PASSWORD", &cluster.spec.secret_name, ROOT_PASSWORD_KEY, false),
        env("SOURCE_HOST", source_host.to_string()),
        env("SOURCE_PORT", MYSQL_PORT.to_string()),
        env("OUTPUT", output.to_string()),
        env("DUMP_TARGET", dump_target(storage, output)),
        env("DUMP_OPTIONS", dump_options(profile).to_string()),
    ];
    env_vars.extend(storage_env(storage));

    let (volumes, mounts) = match storage_volume(storage) {
        Some((volume, mount)) => (Some(vec![volume]), Some(vec![mount])),
        None => (None, None),
    };

    Job {
        metadata: ObjectMeta {
            name: Some(backup_job_name(&backup_name)),
            namespace: backup.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![backup_owner_reference(backup)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.backup_service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "dump".to_string(),
                        image: Some(config.operator_image.clone()),
                        image_pull_policy: Some(config.image_pull_policy.clone()),
                        command: Some(vec![
                            "bash".to_string(),
                            "-c".to_string(),
                            DUMP_SCRIPT.to_string(),
                        ]),
                        env: Some(env_vars),
                        volume_mounts: mounts,
                        termination_message_policy: Some("File".to_string()),
                        ..Default::default()
                    }],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the `<backup>-purge` Job removing a volume or blob container
/// backup. Bucket backups are removed directly and get no Job.
///
/// The Job is owned by the cluster since the backup object is on its way out.
pub fn generate_purge_job(
    backup: &MySQLBackup,
    cluster: &InnoDBCluster,
    storage: &BackupStorage,
    output: &str,
    config: &OperatorConfig,
) -> Option<Job> {
    let backup_name = backup.name_any();
    let target = dump_target(storage, output);

    let (image, command, env_vars) = if storage.persistent_volume_claim.is_some() {
        (
            config.operator_image.clone(),
            vec!["rm".to_string(), "-rf".to_string(), target],
            Vec::new(),
        )
    } else if let Some(azure) = &storage.azure {
        (
            config.azure_cli_image.clone(),
            vec![
                "az".to_string(),
                "storage".to_string(),
                "blob".to_string(),
                "delete-batch".to_string(),
                "--source".to_string(),
                azure.container_name.clone(),
                "--pattern".to_string(),
                format!("{}/*", target),
            ],
            storage_env(storage),
        )
    } else {
        return None;
    };

    let (volumes, mounts) = match storage_volume(storage) {
        Some((volume, mount)) => (Some(vec![volume]), Some(vec![mount])),
        None => (None, None),
    };
    let labels = backup_labels(&cluster.name_any(), &backup_name);

    Some(Job {
        metadata: ObjectMeta {
            name: Some(purge_job_name(&backup_name)),
            namespace: backup.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            ttl_seconds_after_finished: Some(PURGE_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.backup_service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "purge".to_string(),
                        image: Some(image),
                        image_pull_policy: Some(config.image_pull_policy.clone()),
                        command: Some(command),
                        env: (!env_vars.is_empty()).then_some(env_vars),
                        volume_mounts: mounts,
                        ..Default::default()
                    }],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
