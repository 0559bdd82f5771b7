pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod mysql;
pub mod resources;
pub mod storage;
pub mod webhooks;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    BACKUP_FINALIZER, BackoffConfig, CLUSTER_FINALIZER, Context, Error, Result,
    backup_error_policy, error_policy, reconcile, reconcile_backup,
};
pub use crd::{InnoDBCluster, MySQLBackup};
pub use health::{HealthState, Metrics};
pub use webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookError, run_webhook_server};

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::{Config as ControllerConfig, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::resources::CLUSTER_LABEL;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

type ReconcileResult<K> = std::result::Result<
    (ObjectRef<K>, kube::runtime::controller::Action),
    ControllerError<Error, kube::runtime::watcher::Error>,
>;

/// Log a controller result; objects deleted between the trigger and the
/// reconcile are not worth an error line
fn log_result<K: Resource>(kind: &str, result: ReconcileResult<K>) {
    match result {
        Ok((obj, _action)) => {
            tracing::debug!("Reconciled {}: {}", kind, obj.name);
        }
        Err(e) => {
            let is_not_found = matches!(
                &e,
                ControllerError::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!("{} no longer exists (likely deleted): {:?}", kind, e);
            } else {
                tracing::error!("{} reconciliation error: {:?}", kind, e);
            }
        }
    }
}

/// Run the InnoDBCluster controller with optional namespace scoping.
///
/// Watches every object the cluster owns, plus server pods through the
/// cluster label, so a pod restart or a member leaving the group triggers a
/// pass without waiting for the requeue interval.
pub async fn run_cluster_controller(ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for InnoDBCluster resources (scope: {})",
        scope_msg
    );

    let client = ctx.client.clone();
    let clusters: Api<InnoDBCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let pdbs: Api<PodDisruptionBudget> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let cronjobs: Api<CronJob> = scoped_api(client.clone(), namespace);
    let pods: Api<Pod> = scoped_api(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let pod_watcher_config = WatcherConfig::default()
        .any_semantic()
        .labels(CLUSTER_LABEL);
    let controller_config = ControllerConfig::default().concurrency(ctx.config.worker_concurrency);

    Controller::new(clusters, watcher_config.clone())
        .with_config(controller_config)
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(configmaps, watcher_config.clone())
        .owns(pdbs, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(cronjobs, watcher_config)
        .watches(pods, pod_watcher_config, |pod: Pod| {
            let namespace = pod.namespace()?;
            pod.labels()
                .get(CLUSTER_LABEL)
                .map(|cluster| ObjectRef::<InnoDBCluster>::new(cluster).within(&namespace))
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_result("InnoDBCluster", result) })
        .await;

    // This should never complete in normal operation
    tracing::error!("Cluster controller stream ended unexpectedly");
}

/// Run the MySQLBackup controller with optional namespace scoping.
pub async fn run_backup_controller(ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for MySQLBackup resources (scope: {})",
        scope_msg
    );

    let backups: Api<MySQLBackup> = scoped_api(ctx.client.clone(), namespace);
    let jobs: Api<Job> = scoped_api(ctx.client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let controller_config = ControllerConfig::default().concurrency(ctx.config.worker_concurrency);

    Controller::new(backups, watcher_config.clone())
        .with_config(controller_config)
        .owns(jobs, watcher_config)
        .run(reconcile_backup, backup_error_policy, ctx)
        .for_each(|result| async move { log_result("MySQLBackup", result) })
        .await;

    tracing::error!("Backup controller stream ended unexpectedly");
}
