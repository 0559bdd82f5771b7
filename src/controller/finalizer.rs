//! Deletion sequence for InnoDBCluster resources
//!
//! Runs whenever the cluster carries a deletion timestamp, whatever its
//! phase. Every step tolerates objects that are already gone, so a pass
//! interrupted by a restart simply runs again from the top.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use crate::controller::Context;
use crate::controller::apply::{delete_resource, remove_finalizer};
use crate::controller::error::{Result, with_timeout};
use crate::crd::InnoDBCluster;
use crate::resources::CLUSTER_LABEL;
use crate::resources::common::{
    config_map_name, headless_service_name, pdb_name, router_name,
};

/// Finalizer held by every InnoDBCluster until its children are gone
pub const CLUSTER_FINALIZER: &str = "mysql.oracle.com/cluster-finalizer";

/// Stop schedules, delete triggers, then the workloads and services, and
/// finally release the cluster object
pub async fn finalize_cluster(cluster: &InnoDBCluster, ctx: &Context) -> Result<Action> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    info!("Finalizing InnoDBCluster");

    let stopped = stop_schedules(cluster, ctx, &ns).await?;
    if stopped > 0 {
        info!(schedules = stopped, "Removed backup schedule triggers");
    }

    delete_resource::<Deployment>(ctx, &ns, &router_name(&name)).await?;
    delete_resource::<Service>(ctx, &ns, &name).await?;
    delete_resource::<StatefulSet>(ctx, &ns, &name).await?;
    delete_resource::<PodDisruptionBudget>(ctx, &ns, &pdb_name(&name)).await?;
    delete_resource::<Service>(ctx, &ns, &headless_service_name(&name)).await?;
    delete_resource::<ConfigMap>(ctx, &ns, &config_map_name(&name)).await?;

    remove_finalizer(ctx, cluster, CLUSTER_FINALIZER).await?;
    if let Some(health) = &ctx.health_state {
        health.metrics.forget_cluster(&ns, &name);
    }
    info!("Released InnoDBCluster");
    Ok(Action::await_change())
}

/// Suspend and delete every schedule CronJob of the cluster
///
/// Suspending first keeps a trigger from firing between the listing and the
/// delete.
async fn stop_schedules(cluster: &InnoDBCluster, ctx: &Context, ns: &str) -> Result<usize> {
    let api: Api<CronJob> = Api::namespaced(ctx.client.clone(), ns);
    let selector = format!("{}={}", CLUSTER_LABEL, cluster.name_any());
    let cronjobs = with_timeout(
        ctx.config.api_timeout,
        "list schedule triggers",
        api.list(&ListParams::default().labels(&selector)),
    )
    .await?;

    let suspend = serde_json::json!({ "spec": { "suspend": true } });
    for cronjob in &cronjobs.items {
        let cronjob_name = cronjob.name_any();
        let patched = with_timeout(
            ctx.config.api_timeout,
            "suspend schedule trigger",
            api.patch(
                &cronjob_name,
                &PatchParams::default(),
                &Patch::Merge(&suspend),
            ),
        )
        .await;
        if let Err(e) = patched {
            if !e.is_not_found() {
                warn!(cronjob = %cronjob_name, "Failed to suspend schedule trigger: {}", e);
            }
        }
        delete_resource::<CronJob>(ctx, ns, &cronjob_name).await?;
    }
    Ok(cronjobs.items.len())
}

