//! Reconciliation logic for MySQLBackup resources
//!
//! A pending backup snapshots its profile and output location into status
//! before its Job is created, so later edits to the cluster's profiles do not
//! reach a backup that already started. Finished backups are never touched
//! again apart from deletion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::Context;
use crate::controller::apply::{add_finalizer, apply_resource, has_finalizer, remove_finalizer};
use crate::controller::backup_orchestrator::{
    backup_method, backup_output, delete_backup_data, resolve_profile, schedule_block, schedule_of,
};
use crate::controller::backup_state_machine::{BackupEvent, JobProgress, job_progress, transition};
use crate::controller::error::{Error, Result, with_timeout};
use crate::controller::events::{self, EventRecord, reasons};
use crate::controller::status::BackupStatusManager;
use crate::controller::validation::validate_backup_spec;
use crate::crd::{
    BackupProfile, BackupState, InnoDBCluster, MemberRole, MemberState, MemberStatus, MySQLBackup,
    MySQLBackupStatus,
};
use crate::resources::backup_job::{TerminationReport, generate_backup_job, parse_termination_message};
use crate::resources::common::{backup_job_name, pod_fqdn};

/// Finalizer held by backups whose data is removed on deletion
pub const BACKUP_FINALIZER: &str = "mysql.oracle.com/backup-finalizer";

const CONTROLLER: &str = "backup";
const BACKUP_KIND: &str = "MySQLBackup";

fn retry_key(backup: &MySQLBackup) -> String {
    format!(
        "{}/{}/{}",
        CONTROLLER,
        backup.namespace().unwrap_or_default(),
        backup.name_any()
    )
}

#[instrument(skip(backup, ctx), fields(name = %backup.name_any(), namespace = backup.namespace().unwrap_or_default()))]
pub async fn reconcile_backup(backup: Arc<MySQLBackup>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = backup.namespace().unwrap_or_default();
    let name = backup.name_any();

    if backup.metadata.deletion_timestamp.is_some() {
        return finalize_backup(&backup, &ctx, &ns).await;
    }

    let holds = has_finalizer(backup.as_ref(), BACKUP_FINALIZER);
    if backup.spec.delete_backup_data && !holds {
        add_finalizer(&ctx, backup.as_ref(), BACKUP_FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }
    if !backup.spec.delete_backup_data && holds {
        remove_finalizer(&ctx, backup.as_ref(), BACKUP_FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if backup.state().is_terminal() {
        return Ok(Action::await_change());
    }

    let result = progress_backup(&backup, &ctx, &ns).await;
    if let Some(health) = &ctx.health_state {
        match &result {
            Ok(_) => health.metrics.record_reconcile(
                CONTROLLER,
                &ns,
                &name,
                started.elapsed().as_secs_f64(),
            ),
            Err(_) => health.metrics.record_error(CONTROLLER, &ns, &name),
        }
    }
    if result.is_ok() {
        ctx.reset_retries(&retry_key(&backup));
    }
    result
}

pub fn backup_error_policy(backup: Arc<MySQLBackup>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempt = ctx.next_retry(&retry_key(&backup));
    let delay = ctx
        .config
        .backoff
        .delay_for_error(error, attempt.saturating_sub(1));
    if error.is_retryable() {
        warn!(name = %backup.name_any(), attempt, "Retryable error: {}, requeuing in {:?}", error, delay);
    } else {
        error!(name = %backup.name_any(), "Non-retryable error: {}, requeuing in {:?}", error, delay);
    }
    Action::requeue(delay)
}

/// Delete stored data if asked to, then release the object
async fn finalize_backup(backup: &MySQLBackup, ctx: &Context, ns: &str) -> Result<Action> {
    if !has_finalizer(backup, BACKUP_FINALIZER) {
        return Ok(Action::await_change());
    }
    if backup.spec.delete_backup_data {
        let clusters: Api<InnoDBCluster> = Api::namespaced(ctx.client.clone(), ns);
        let cluster = with_timeout(
            ctx.config.api_timeout,
            "get cluster",
            clusters.get_opt(&backup.spec.cluster_name),
        )
        .await
        .unwrap_or_else(|e| {
            warn!("Cannot read cluster for data removal: {}", e);
            None
        });
        delete_backup_data(ctx, backup, cluster.as_ref()).await;
    }
    remove_finalizer(ctx, backup, BACKUP_FINALIZER).await?;
    info!("Released MySQLBackup");
    Ok(Action::await_change())
}

async fn progress_backup(backup: &MySQLBackup, ctx: &Context, ns: &str) -> Result<Action> {
    let state = backup.state();
    let mut status = backup.status.clone().unwrap_or_default();

    let clusters: Api<InnoDBCluster> = Api::namespaced(ctx.client.clone(), ns);
    let cluster = with_timeout(
        ctx.config.api_timeout,
        "get cluster",
        clusters.get_opt(&backup.spec.cluster_name),
    )
    .await?;
    let Some(cluster) = cluster else {
        let message = format!("cluster {} not found", backup.spec.cluster_name);
        return settle(backup, ctx, status, BackupEvent::Rejected, Some(message)).await;
    };
    // Re-checked until the backup finishes
    if let Some(reason) = schedule_block(&cluster, backup) {
        return settle(backup, ctx, status, BackupEvent::Rejected, Some(reason)).await;
    }

    if status.profile.is_none() {
        if let Err(e) = validate_backup_spec(&backup.spec) {
            return settle(backup, ctx, status, BackupEvent::Rejected, Some(e.to_string())).await;
        }
        if !cluster.phase().is_online() {
            debug!(phase = %cluster.phase(), "Waiting for the cluster to come online");
            return Ok(Action::requeue(ctx.config.progress_interval));
        }
        let profile = match resolve_profile(
            &cluster,
            backup.spec.backup_profile_name.as_deref(),
            backup.spec.backup_profile.as_ref(),
        ) {
            Ok(profile) => profile,
            Err(e) => {
                return settle(backup, ctx, status, BackupEvent::Rejected, Some(e.to_string())).await;
            }
        };
        snapshot(&mut status, backup, profile, Utc::now());
        BackupStatusManager::new(backup, ctx).update(&status).await?;
        info!(output = ?status.output, method = ?status.method, "Accepted backup");
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let job_name = status
        .job_name
        .clone()
        .unwrap_or_else(|| backup_job_name(&backup.name_any()));
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let job = with_timeout(ctx.config.api_timeout, "get backup job", jobs.get_opt(&job_name)).await?;

    let Some(job) = job else {
        if state == BackupState::Running {
            let message = format!("backup job {} disappeared", job_name);
            return settle(backup, ctx, status, BackupEvent::JobFailed, Some(message)).await;
        }
        let Some(source) = dump_source(&cluster) else {
            debug!("No online member to take the dump from");
            return Ok(Action::requeue(ctx.config.progress_interval));
        };
        let (Some(profile), Some(output)) = (status.profile.as_ref(), status.output.as_deref())
        else {
            return Err(Error::PermanentError("backup status lost its snapshot".into()));
        };
        let job = generate_backup_job(backup, &cluster, profile, &source, output, &ctx.config);
        apply_resource::<Job>(ctx, ns, &job).await?;
        info!(job = %job_name, source = %source, "Created backup job");
        return Ok(Action::requeue(ctx.config.progress_interval));
    };

    let progress = job_progress(&job);
    let report = match progress {
        JobProgress::Succeeded | JobProgress::Failed(_) => {
            termination_report(ctx, ns, &job_name).await
        }
        JobProgress::Waiting | JobProgress::Running => None,
    };
    match job_outcome(&mut status, progress, report) {
        Some((event, message)) => settle(backup, ctx, status, event, message).await,
        None => Ok(Action::requeue(ctx.config.progress_interval)),
    }
}

/// Fold the Job's progress and the dump container's report into `status`.
/// Returns the event to settle with and its message, or `None` while no pod
/// has started.
pub fn job_outcome(
    status: &mut MySQLBackupStatus,
    progress: JobProgress,
    report: Option<TerminationReport>,
) -> Option<(BackupEvent, Option<String>)> {
    match progress {
        JobProgress::Waiting => None,
        JobProgress::Running => Some((BackupEvent::JobStarted, None)),
        JobProgress::Succeeded => {
            if let Some(report) = report {
                apply_report(status, report);
            }
            Some((BackupEvent::JobSucceeded, None))
        }
        JobProgress::Failed(job_message) => {
            let message = report.and_then(|r| r.message).unwrap_or(job_message);
            Some((BackupEvent::JobFailed, Some(message)))
        }
    }
}

/// Move `status` along `event`, stamping completion and elapsed time on a
/// terminal state. Returns the edge taken, or `None` if the event does not
/// apply to the current state.
pub fn advance(
    status: &mut MySQLBackupStatus,
    event: BackupEvent,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Option<(BackupState, BackupState)> {
    let from = status.status;
    let result = transition(from, event);
    if !result.moved() {
        return None;
    }
    let to = result.state();
    status.status = to;
    if let Some(message) = message {
        status.message = Some(message);
    }
    if to.is_terminal() {
        status.completion_time = Some(now.to_rfc3339());
        status.elapsed_time = elapsed_time(status.start_time.as_deref(), now);
    }
    Some((from, to))
}

/// Record what the backup will run with
pub fn snapshot(
    status: &mut MySQLBackupStatus,
    backup: &MySQLBackup,
    profile: BackupProfile,
    now: DateTime<Utc>,
) {
    let storage = &profile.dump_instance.storage;
    status.method = Some(backup_method(storage));
    status.bucket = storage.s3.as_ref().map(|s| s.bucket_name.clone());
    status.container = storage.azure.as_ref().map(|a| a.container_name.clone());
    status.output = Some(backup_output(backup, now));
    status.start_time = Some(now.to_rfc3339());
    status.job_name = Some(backup_job_name(&backup.name_any()));
    status.schedule = schedule_of(backup).map(String::from);
    status.profile = Some(profile);
}

/// Copy the dump container's report into status
pub fn apply_report(status: &mut MySQLBackupStatus, report: TerminationReport) {
    if let Some(output) = report.output.filter(|o| !o.is_empty()) {
        status.output = Some(output);
    }
    status.size = report.size.or(status.size.take());
    status.space_available = report.space_available.or(status.space_available.take());
    status.source = report.source.or(status.source.take());
}

/// `HH:MM:SS` between the recorded start and `now`
pub fn elapsed_time(start: Option<&str>, now: DateTime<Utc>) -> Option<String> {
    let start = DateTime::parse_from_rfc3339(start?).ok()?;
    let secs = now
        .signed_duration_since(start.with_timezone(&Utc))
        .num_seconds()
        .max(0);
    Some(format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    ))
}

/// Apply an event to the status and write it
async fn settle(
    backup: &MySQLBackup,
    ctx: &Context,
    mut status: MySQLBackupStatus,
    event: BackupEvent,
    message: Option<String>,
) -> Result<Action> {
    let Some((from, to)) = advance(&mut status, event, message, Utc::now()) else {
        return Ok(Action::requeue(ctx.config.progress_interval));
    };
    BackupStatusManager::new(backup, ctx).update(&status).await?;

    let reference = backup.object_ref(&());
    ctx.publish_event(&reference, &events::status_change(BACKUP_KIND, from, to))
        .await;
    if to == BackupState::Failed {
        let detail = status.message.clone().unwrap_or_default();
        warn!(event = %event, "Backup failed: {}", detail);
        ctx.publish_event(&reference, &EventRecord::warning(reasons::BACKUP, detail))
            .await;
    } else {
        info!(from = %from, to = %to, "Backup state changed");
    }
    if to.is_terminal() {
        if let Some(health) = &ctx.health_state {
            health.metrics.record_backup(to);
        }
        return Ok(Action::await_change());
    }
    Ok(Action::requeue(ctx.config.progress_interval))
}

/// Host the dump is taken from: the primary, else any online member
pub fn dump_source(cluster: &InnoDBCluster) -> Option<String> {
    let status = cluster.status.as_ref()?;
    let ns = cluster.namespace().unwrap_or_default();
    let online = |m: &&MemberStatus| m.state == MemberState::Online;
    status
        .members
        .iter()
        .filter(online)
        .find(|m| m.role == Some(MemberRole::Primary))
        .or_else(|| status.members.iter().find(online))
        .map(|m| pod_fqdn(&cluster.name_any(), m.ordinal, &ns))
}

/// Termination message written by the dump container
async fn termination_report(ctx: &Context, ns: &str, job_name: &str) -> Option<TerminationReport> {
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
    let selector = format!("job-name={}", job_name);
    let list = match with_timeout(
        ctx.config.api_timeout,
        "list backup pods",
        pods.list(&ListParams::default().labels(&selector)),
    )
    .await
    {
        Ok(list) => list,
        Err(e) => {
            warn!(job = job_name, "Cannot read backup pod: {}", e);
            return None;
        }
    };
    list.items
        .iter()
        .filter_map(|pod| pod.status.as_ref())
        .flat_map(|s| s.container_statuses.iter().flatten())
        .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref()?.message.as_deref())
        .map(parse_termination_message)
        .next()
}
