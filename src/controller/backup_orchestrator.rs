//! Backup orchestration
//!
//! Profiles are resolved and validated here, schedule triggers are turned
//! into MySQLBackup objects, and stored data is removed when a backup that
//! asked for it is deleted. Schedule CronJobs themselves are planned with
//! the rest of the cluster's children.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::core::ObjectMeta;
use kube::{Api, Client, ResourceExt};
use tracing::{info, warn};

use crate::config::OperatorConfig;
use crate::controller::Context;
use crate::controller::apply::apply_resource;
use crate::controller::error::{Error, Result, with_timeout};
use crate::controller::validation::validate_profile;
use crate::crd::{
    BackupMethod, BackupProfile, BackupStorage, InnoDBCluster, MySQLBackup, MySQLBackupSpec,
};
use crate::resources::backup_job::generate_purge_job;
use crate::resources::common::{
    COMPONENT_BACKUP, SCHEDULE_LABEL, cluster_backup_owner_reference, standard_labels,
};
use crate::storage::{ObjectStorage, S3ObjectStorage, object_prefix};

/// Check a profile has exactly one storage target
pub fn apply_profile(profile: &BackupProfile) -> Result<()> {
    validate_profile(profile).map_err(|e| match e {
        Error::ValidationError(msg) => Error::ValidationError(format!("InvalidArgument: {}", msg)),
        other => other,
    })
}

/// Resolve a profile reference against the cluster's named profiles
pub fn resolve_profile(
    cluster: &InnoDBCluster,
    name: Option<&str>,
    inline: Option<&BackupProfile>,
) -> Result<BackupProfile> {
    let profile = match (name, inline) {
        (Some(name), None) => cluster.profile(name).cloned().ok_or_else(|| {
            Error::ValidationError(format!(
                "backup profile {} not found in cluster {}",
                name,
                cluster.name_any()
            ))
        })?,
        (None, Some(inline)) => inline.clone(),
        _ => {
            return Err(Error::ValidationError(
                "exactly one of backupProfileName and backupProfile must be set".to_string(),
            ));
        }
    };
    apply_profile(&profile)?;
    Ok(profile)
}

/// How the data of a storage target is written
pub fn backup_method(storage: &BackupStorage) -> BackupMethod {
    if storage.s3.is_some() {
        BackupMethod::ObjectStorage
    } else if storage.azure.is_some() {
        BackupMethod::BlobStorage
    } else {
        BackupMethod::Volume
    }
}

/// Directory the backup is written to
pub fn backup_output(backup: &MySQLBackup, now: DateTime<Utc>) -> String {
    let name = backup.name_any();
    if backup.spec.add_timestamp_to_backup_directory {
        format!("{}-{}", name, now.format("%Y%m%d-%H%M%S"))
    } else {
        name
    }
}

/// Name of a backup created by a schedule trigger
pub fn scheduled_backup_name(cluster_name: &str, schedule_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}{}",
        cluster_name,
        schedule_name,
        now.format("%Y%m%d%H%M%S")
    )
}

/// Outcome of a schedule trigger
#[derive(Clone, Debug)]
pub enum TriggerDecision {
    Create(Box<MySQLBackup>),
    Skip(String),
}

/// Decide what a firing schedule trigger does
///
/// `enabled` is checked here, when the trigger fires, so a disabled schedule
/// never produces a backup even if its CronJob fired before the suspension
/// reached it.
pub fn evaluate_trigger(
    cluster: &InnoDBCluster,
    schedule_name: &str,
    now: DateTime<Utc>,
) -> TriggerDecision {
    let Some(schedule) = cluster.schedule(schedule_name) else {
        return TriggerDecision::Skip(format!("schedule {} no longer exists", schedule_name));
    };
    if !schedule.enabled {
        return TriggerDecision::Skip(format!("schedule {} is disabled", schedule_name));
    }
    let phase = cluster.phase();
    if !phase.is_online() {
        return TriggerDecision::Skip(format!("cluster is {}", phase));
    }

    let cluster_name = cluster.name_any();
    let mut labels = standard_labels(&cluster_name, COMPONENT_BACKUP);
    labels.insert(SCHEDULE_LABEL.to_string(), schedule.name.clone());

    let backup = MySQLBackup {
        metadata: ObjectMeta {
            name: Some(scheduled_backup_name(&cluster_name, &schedule.name, now)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![cluster_backup_owner_reference(cluster)]),
            ..Default::default()
        },
        spec: MySQLBackupSpec {
            cluster_name,
            backup_profile_name: schedule.backup_profile_name.clone(),
            backup_profile: schedule.backup_profile.clone(),
            delete_backup_data: schedule.delete_backup_data,
            add_timestamp_to_backup_directory: true,
        },
        status: None,
    };
    TriggerDecision::Create(Box::new(backup))
}

/// Schedule that generated a backup, if any
pub fn schedule_of(backup: &MySQLBackup) -> Option<&str> {
    backup.labels().get(SCHEDULE_LABEL).map(String::as_str)
}

/// Reason a schedule generated backup must not run, checked on every pass
/// until it finishes
pub fn schedule_block(cluster: &InnoDBCluster, backup: &MySQLBackup) -> Option<String> {
    let schedule_name = schedule_of(backup)?;
    match cluster.schedule(schedule_name) {
        None => Some(format!("schedule {} no longer exists", schedule_name)),
        Some(schedule) if !schedule.enabled => {
            Some(format!("schedule {} is disabled", schedule_name))
        }
        Some(_) => None,
    }
}

/// Create a backup object. A backup that already exists counts as created,
/// so a retried trigger does not fail.
pub async fn create_backup(
    client: Client,
    backup: &MySQLBackup,
    config: &OperatorConfig,
) -> Result<bool> {
    let ns = backup.namespace().unwrap_or_default();
    let api: Api<MySQLBackup> = Api::namespaced(client, &ns);
    match with_timeout(
        config.api_timeout,
        "create backup",
        api.create(&PostParams::default(), backup),
    )
    .await
    {
        Ok(_) => {
            info!(backup = %backup.name_any(), namespace = %ns, "Created MySQLBackup");
            Ok(true)
        }
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove the stored data of a backup
///
/// Best effort: failures are logged and never block the deletion of the
/// backup object.
pub async fn delete_backup_data(ctx: &Context, backup: &MySQLBackup, cluster: Option<&InnoDBCluster>) {
    let Some(status) = backup.status.as_ref() else {
        return;
    };
    let (Some(profile), Some(output)) = (status.profile.as_ref(), status.output.as_deref()) else {
        return;
    };
    let storage = &profile.dump_instance.storage;

    let result = if let Some(s3) = &storage.s3 {
        delete_bucket_data(ctx, backup, s3, output).await
    } else {
        start_purge_job(ctx, backup, cluster, storage, output).await
    };

    if let Err(e) = result {
        warn!(backup = %backup.name_any(), output, "Failed to delete backup data: {}", e);
    }
}

async fn start_purge_job(
    ctx: &Context,
    backup: &MySQLBackup,
    cluster: Option<&InnoDBCluster>,
    storage: &BackupStorage,
    output: &str,
) -> Result<()> {
    let cluster = cluster.ok_or_else(|| {
        Error::NotFound(format!("cluster {} for purge job", backup.spec.cluster_name))
    })?;
    if let Some(job) = generate_purge_job(backup, cluster, storage, output, &ctx.config) {
        apply_resource::<Job>(ctx, &backup.namespace().unwrap_or_default(), &job).await?;
        info!(backup = %backup.name_any(), "Started purge job");
    }
    Ok(())
}

async fn delete_bucket_data(
    ctx: &Context,
    backup: &MySQLBackup,
    s3: &crate::crd::S3Storage,
    output: &str,
) -> Result<()> {
    let ns = backup.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = with_timeout(ctx.config.api_timeout, "get storage secret", secrets.get(&s3.config))
        .await?;
    let storage = S3ObjectStorage::from_secret(s3, &secret).await?;
    let prefix = object_prefix(s3.prefix.as_deref(), output);
    let removed = storage.delete_prefix(&s3.bucket_name, &prefix).await?;
    info!(bucket = %s3.bucket_name, prefix = %prefix, removed, "Deleted backup objects");
    Ok(())
}
