//! Validation of InnoDBCluster and MySQLBackup specs
//!
//! The cluster checks run in the admission webhook and at the start of every
//! reconciliation, so a cluster created while the webhook was unavailable is
//! still refused before any object is created. Backup profiles and schedules
//! are only refused at admission; at runtime their handlers record the
//! failure and the rest of the cluster keeps reconciling.

use std::collections::BTreeSet;

use crate::controller::error::{Error, Result};
use crate::controller::version_gate::parse_version;
use crate::crd::{BackupProfile, BackupSchedule, InnoDBCluster, MySQLBackupSpec};

/// Minimum number of server instances
pub const MIN_INSTANCES: i32 = 1;

/// Maximum number of server instances; Group Replication supports nine members
pub const MAX_INSTANCES: i32 = 9;

/// Cluster names end up in pod host names and replication account names
pub const MAX_CLUSTER_NAME_LEN: usize = 40;

/// Validate the cluster spec
pub fn validate_cluster_spec(cluster: &InnoDBCluster) -> Result<()> {
    let name = cluster.metadata.name.as_deref().unwrap_or_default();
    validate_cluster_name(name)?;
    validate_instances(cluster.spec.instances)?;
    if cluster.spec.router.instances < 0 {
        return Err(Error::ValidationError(format!(
            "spec.router.instances must not be negative: {}",
            cluster.spec.router.instances
        )));
    }
    if cluster.spec.secret_name.trim().is_empty() {
        return Err(Error::ValidationError(
            "spec.secretName must be set".to_string(),
        ));
    }
    if let Some(version) = &cluster.spec.version {
        if parse_version(version).is_none() {
            return Err(Error::ValidationError(format!(
                "spec.version {:?} is not a valid version",
                version
            )));
        }
    }
    if let Some(datadir) = &cluster.spec.datadir_volume_claim_template {
        validate_storage_size(&datadir.size)?;
    }
    Ok(())
}

/// Validate `spec.backupProfiles` and `spec.backupSchedules` together
pub fn validate_backup_config(cluster: &InnoDBCluster) -> Result<()> {
    validate_profiles(&cluster.spec.backup_profiles)?;
    validate_schedules(cluster)
}

pub fn validate_cluster_name(name: &str) -> Result<()> {
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(Error::ValidationError(format!(
            "cluster name {:?} is longer than {} characters",
            name, MAX_CLUSTER_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_instances(instances: i32) -> Result<()> {
    if instances < MIN_INSTANCES {
        return Err(Error::ValidationError(format!(
            "instance count {} is below minimum {}",
            instances, MIN_INSTANCES
        )));
    }
    if instances > MAX_INSTANCES {
        return Err(Error::ValidationError(format!(
            "instance count {} exceeds maximum {}",
            instances, MAX_INSTANCES
        )));
    }
    Ok(())
}

fn validate_storage_size(size: &str) -> Result<()> {
    let digits = size.trim_end_matches(char::is_alphabetic);
    let unit = size.strip_prefix(digits).unwrap_or_default();
    if !matches!(unit, "Mi" | "Gi" | "Ti") || digits.parse::<u64>().is_err() {
        return Err(Error::ValidationError(format!(
            "datadir size must be a whole number of Mi, Gi or Ti: {}",
            size
        )));
    }
    Ok(())
}

/// A profile needs exactly one storage target
pub fn validate_profile(profile: &BackupProfile) -> Result<()> {
    let targets = profile.dump_instance.storage.target_count();
    if targets != 1 {
        return Err(Error::ValidationError(format!(
            "backup profile {:?} must set exactly one storage target, found {}",
            profile.name, targets
        )));
    }
    Ok(())
}

pub fn validate_profiles(profiles: &[BackupProfile]) -> Result<()> {
    let mut names = BTreeSet::new();
    for profile in profiles {
        if profile.name.is_empty() {
            return Err(Error::ValidationError(
                "spec.backupProfiles entries need a name".to_string(),
            ));
        }
        if !names.insert(profile.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "duplicate backup profile {:?}",
                profile.name
            )));
        }
        validate_profile(profile)?;
    }
    Ok(())
}

/// Check one schedule against the cluster's profiles
pub fn validate_schedule(cluster: &InnoDBCluster, schedule: &BackupSchedule) -> Result<()> {
    validate_cron(&schedule.schedule).map_err(|e| match e {
        Error::ValidationError(msg) => {
            Error::ValidationError(format!("schedule {:?}: {}", schedule.name, msg))
        }
        other => other,
    })?;

    match (&schedule.backup_profile_name, &schedule.backup_profile) {
        (Some(name), None) => {
            if cluster.profile(name).is_none() {
                return Err(Error::ValidationError(format!(
                    "schedule {:?} references unknown backup profile {:?}",
                    schedule.name, name
                )));
            }
        }
        (None, Some(profile)) => validate_profile(profile)?,
        _ => {
            return Err(Error::ValidationError(format!(
                "schedule {:?} must set exactly one of backupProfileName and backupProfile",
                schedule.name
            )));
        }
    }
    Ok(())
}

pub fn validate_schedules(cluster: &InnoDBCluster) -> Result<()> {
    let mut names = BTreeSet::new();
    for schedule in &cluster.spec.backup_schedules {
        if schedule.name.is_empty() {
            return Err(Error::ValidationError(
                "spec.backupSchedules entries need a name".to_string(),
            ));
        }
        if !names.insert(schedule.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "duplicate backup schedule {:?}",
                schedule.name
            )));
        }
        validate_schedule(cluster, schedule)?;
    }
    Ok(())
}

const CRON_FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day of month", 1, 31),
    ("month", 1, 12),
    ("day of week", 0, 7),
];

const CRON_MACROS: [&str; 7] = [
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Validate a cron expression the way the CronJob controller accepts it:
/// five fields of numbers, ranges, lists and steps, or a macro.
pub fn validate_cron(expression: &str) -> Result<()> {
    let expression = expression.trim();
    if CRON_MACROS.contains(&expression) {
        return Ok(());
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != CRON_FIELDS.len() {
        return Err(Error::ValidationError(format!(
            "cron expression {:?} must have 5 fields, found {}",
            expression,
            fields.len()
        )));
    }

    for (field, (label, min, max)) in fields.iter().zip(CRON_FIELDS) {
        for item in field.split(',') {
            if !cron_item_valid(item, min, max) {
                return Err(Error::ValidationError(format!(
                    "invalid {} field {:?} in cron expression {:?}",
                    label, field, expression
                )));
            }
        }
    }
    Ok(())
}

fn cron_item_valid(item: &str, min: u32, max: u32) -> bool {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    if let Some(step) = step {
        match step.parse::<u32>() {
            Ok(n) if n > 0 => {}
            _ => return false,
        }
    }
    let in_range = |v: &str| v.parse::<u32>().is_ok_and(|n| n >= min && n <= max);
    match range {
        "*" => true,
        _ => match range.split_once('-') {
            Some((lo, hi)) => {
                in_range(lo) && in_range(hi) && lo.parse::<u32>().ok() <= hi.parse::<u32>().ok()
            }
            None => in_range(range),
        },
    }
}

/// Validate a MySQLBackup spec on its own; profile names are resolved later
/// against the cluster.
pub fn validate_backup_spec(spec: &MySQLBackupSpec) -> Result<()> {
    if spec.cluster_name.trim().is_empty() {
        return Err(Error::ValidationError(
            "spec.clusterName must be set".to_string(),
        ));
    }
    match (&spec.backup_profile_name, &spec.backup_profile) {
        (Some(_), None) => Ok(()),
        (None, Some(profile)) => validate_profile(profile),
        _ => Err(Error::ValidationError(
            "exactly one of spec.backupProfileName and spec.backupProfile must be set"
                .to_string(),
        )),
    }
}
