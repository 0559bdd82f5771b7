//! Backup schedule CronJobs
//!
//! Each schedule gets a `<cluster>-<schedule>-cb`
//! CronJob. The job does not take the backup itself: it runs the trigger
//! binary, which creates a MySQLBackup object that the backup controller
//! then carries out.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use super::common::{
    COMPONENT_BACKUP, SCHEDULE_LABEL, cronjob_name, owner_reference, standard_labels,
    with_spec_hash,
};
use crate::config::OperatorConfig;
use crate::crd::{BackupSchedule, InnoDBCluster};

/// Binary shipped in the operator image that creates scheduled backups
pub const TRIGGER_BINARY: &str = "mysql-operator-backup-trigger";

fn env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

/// Generate the CronJob for one schedule
///
/// A disabled schedule keeps its CronJob, suspended.
pub fn generate_schedule_cronjob(
    cluster: &InnoDBCluster,
    schedule: &BackupSchedule,
    config: &OperatorConfig,
) -> CronJob {
    let cluster_name = cluster.name_any();
    let mut labels = standard_labels(&cluster_name, COMPONENT_BACKUP);
    labels.insert(SCHEDULE_LABEL.to_string(), schedule.name.clone());

    let container = Container {
        name: "trigger".to_string(),
        image: Some(config.operator_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        command: Some(vec![TRIGGER_BINARY.to_string()]),
        env: Some(vec![
            env("CLUSTER_NAME", cluster_name.clone()),
            env("CLUSTER_NAMESPACE", cluster.namespace().unwrap_or_default()),
            env("SCHEDULE_NAME", schedule.name.clone()),
            env("RUST_LOG", "info".to_string()),
        ]),
        ..Default::default()
    };

    with_spec_hash(CronJob {
        metadata: ObjectMeta {
            name: Some(cronjob_name(&cluster_name, &schedule.name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.schedule.clone(),
            time_zone: schedule.time_zone.clone(),
            suspend: Some(!schedule.enabled),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(3),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(2),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            service_account_name: Some(config.backup_service_account.clone()),
                            containers: vec![container],
                            restart_policy: Some("Never".to_string()),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Names of the CronJobs the cluster's schedules call for
pub fn desired_cronjob_names(cluster: &InnoDBCluster) -> BTreeMap<String, String> {
    let cluster_name = cluster.name_any();
    cluster
        .spec
        .backup_schedules
        .iter()
        .map(|s| (cronjob_name(&cluster_name, &s.name), s.name.clone()))
        .collect()
}
