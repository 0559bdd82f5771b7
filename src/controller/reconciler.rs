//! Reconciliation logic for InnoDBCluster resources
//!
//! One pass validates the spec, gates the version, observes the cluster,
//! dispatches field handlers, applies the planned corrective steps and
//! writes the projected status. A pass never waits for progress; it
//! requeues and picks up from fresh observation next time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::Context;
use crate::controller::apply::{add_finalizer, apply_resource, delete_resource, has_finalizer};
use crate::controller::error::{Error, Result, with_timeout};
use crate::controller::events::{self, EventRecord, reasons};
use crate::controller::finalizer::{CLUSTER_FINALIZER, finalize_cluster};
use crate::controller::handlers::{CLUSTER_KIND, Effect, HandlerRegistry, failure_events};
use crate::controller::observe::{ChildKind, Observation, observe};
use crate::controller::planner::{Child, PlanInput, Step, plan};
use crate::controller::router_sync::sync_routing_options;
use crate::controller::state_machine::next_phase;
use crate::controller::status::{ClusterStatusInput, ClusterStatusManager, project_cluster_status};
use crate::controller::topology;
use crate::controller::validation::validate_cluster_spec;
use crate::controller::version_gate;
use crate::crd::{ClusterPhase, InnoDBCluster, RejectedVersion};
use crate::mysql::{Credentials, InstanceAddress, MYSQL_PORT};
use crate::resources::common::{pod_fqdn, pod_name};
use crate::resources::secret::parse_root_credentials;

const CONTROLLER: &str = "cluster";

fn retry_key(cluster: &InnoDBCluster) -> String {
    format!(
        "{}/{}/{}",
        CONTROLLER,
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<InnoDBCluster>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    debug!("Reconciling InnoDBCluster");

    // Deletion takes precedence over anything else the pass could do
    if cluster.metadata.deletion_timestamp.is_some() {
        return finalize_cluster(&cluster, &ctx).await;
    }

    if !has_finalizer(cluster.as_ref(), CLUSTER_FINALIZER) {
        add_finalizer(&ctx, cluster.as_ref(), CLUSTER_FINALIZER).await?;
        info!("Added finalizer");
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let result = reconcile_cluster(&cluster, &ctx, &ns).await;

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
        ctx.reset_retries(&retry_key(&cluster));
    }
    result
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<InnoDBCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempt = ctx.next_retry(&retry_key(&cluster));
    let delay = ctx
        .config
        .backoff
        .delay_for_error(error, attempt.saturating_sub(1));

    if error.is_conflict() {
        debug!(name = %cluster.name_any(), "Lost update race, requeuing in {:?}", delay);
    } else if error.is_retryable() {
        warn!(
            name = %cluster.name_any(),
            attempt,
            "Retryable error: {}, requeuing in {:?}", error, delay
        );
    } else {
        error!(
            name = %cluster.name_any(),
            "Non-retryable error: {}, requeuing in {:?}", error, delay
        );
    }
    Action::requeue(delay)
}

async fn reconcile_cluster(cluster: &InnoDBCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let reference = cluster.object_ref(&());

    if let Err(e) = validate_cluster_spec(cluster) {
        let message = match e {
            Error::ValidationError(msg) => msg,
            other => other.to_string(),
        };
        let event = EventRecord::error(reasons::INVALID_ARGUMENT, message.clone());
        return hold(cluster, ctx, &reference, ClusterPhase::Invalid, message, None, Some(event))
            .await;
    }

    let credentials = match read_credentials(cluster, ctx, ns).await? {
        Ok(credentials) => credentials,
        Err(message) => {
            let event = EventRecord::error(reasons::SECRET_ERROR, message.clone());
            return hold(cluster, ctx, &reference, ClusterPhase::Error, message, None, Some(event))
                .await;
        }
    };

    let version = version_gate::resolve(cluster, &ctx.config);
    let Some(effective_version) = version.effective.clone() else {
        let message = version
            .rejected
            .as_ref()
            .map(|r| r.reason.clone())
            .unwrap_or_default();
        return hold(
            cluster,
            ctx,
            &reference,
            ClusterPhase::Invalid,
            message,
            version.rejected,
            version.event,
        )
        .await;
    };
    if let Some(event) = &version.event {
        warn!(requested = ?cluster.spec.version, running = %effective_version, "Version change rejected");
        ctx.publish_event(&reference, event).await;
    }

    let observation = observe(cluster, ctx, Some(&credentials)).await?;

    let registry = HandlerRegistry::default();
    let previous_failures = cluster
        .status
        .as_ref()
        .map(|s| s.failed_handlers.clone())
        .unwrap_or_default();
    let mut outcome = registry.dispatch(cluster);
    for event in failure_events(&previous_failures, &outcome) {
        ctx.publish_event(&reference, &event).await;
    }
    let mut waiting = !outcome.temporary.is_empty();
    for (field, message) in &outcome.temporary {
        debug!(field, "Handler deferred: {}", message);
    }

    let failed_fields: Vec<String> = outcome.failed.iter().map(|f| f.field.clone()).collect();
    let steps = plan(
        cluster,
        &PlanInput {
            config: &ctx.config,
            observation: &observation,
            version: &effective_version,
            failed_fields: &failed_fields,
        },
    )?;

    for step in &steps {
        match step {
            Step::Apply(child) => apply_child(ctx, ns, child).await?,
            Step::Delete(key) => {
                if key.kind == ChildKind::CronJob {
                    delete_resource::<CronJob>(ctx, ns, &key.name).await?;
                    info!(cronjob = %key.name, "Removed schedule trigger");
                }
            }
            Step::Membership(action) => {
                let issued = topology::execute(
                    *action,
                    ctx.sql.as_ref(),
                    &credentials,
                    &observation.cluster_name,
                    ns,
                    cluster.spec.instances,
                )
                .await;
                let event = match &issued {
                    Ok(()) => events::membership(action, None),
                    Err(e) => {
                        warn!("Membership action '{}' failed: {}", action, e);
                        events::membership(action, Some(e))
                    }
                };
                ctx.publish_event(&reference, &event).await;
                waiting = true;
            }
        }
    }

    for effect in std::mem::take(&mut outcome.effects) {
        match effect {
            Effect::Event(record) => ctx.publish_event(&reference, &record).await,
            Effect::SyncRoutingOptions { field, options } => {
                match sync_on_primary(ctx, &observation, &credentials, &options).await {
                    Ok(changed) => debug!(changed, "Routing options in sync"),
                    Err(e) => {
                        warn!("Routing option sync failed: {}", e);
                        outcome.revert(field);
                        waiting = true;
                    }
                }
            }
        }
    }

    let fatal = observation.fatal_pod_condition();
    let permanent = fatal.is_some() || outcome.has_permanent_failure();
    let previous_phase = cluster.phase();
    let phase = next_phase(
        previous_phase,
        &observation.transition_context(cluster.spec.instances, false, permanent),
    )
    .phase();

    let view = observation.membership();
    let last_error = fatal.or_else(|| outcome.first_failure().map(|f| f.message.clone()));
    let status = project_cluster_status(
        cluster,
        ClusterStatusInput {
            phase,
            members: observation.member_statuses(cluster.spec.instances),
            online: view.online(),
            primary: view
                .primary()
                .map(|ordinal| pod_name(&observation.cluster_name, ordinal)),
            version: Some(effective_version),
            rejected_version: version.rejected,
            handled_fields: outcome.handled,
            failed_handlers: outcome.failed,
            last_error,
        },
    );
    ClusterStatusManager::new(cluster, ctx).update(&status).await?;
    report_phase(cluster, ctx, &reference, previous_phase, phase, view.online()).await;

    let converged = !waiting && steps.is_empty() && phase == ClusterPhase::Online;
    Ok(Action::requeue(if converged {
        ctx.config.requeue_interval
    } else {
        ctx.config.progress_interval
    }))
}

/// Read the root account out of the cluster's secret
///
/// The inner error is a message for the user; the outer one an API failure
/// worth retrying.
async fn read_credentials(
    cluster: &InnoDBCluster,
    ctx: &Context,
    ns: &str,
) -> Result<std::result::Result<Credentials, String>> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    let secret_name = &cluster.spec.secret_name;
    let secret = with_timeout(
        ctx.config.api_timeout,
        "get root secret",
        api.get_opt(secret_name),
    )
    .await?;
    Ok(match secret {
        None => Err(format!("secret {} not found", secret_name)),
        Some(secret) => parse_root_credentials(&secret).map_err(|e| match e {
            Error::InvalidConfig(msg) => msg,
            other => other.to_string(),
        }),
    })
}

/// Stop the pass in `phase` without touching any child object
async fn hold(
    cluster: &InnoDBCluster,
    ctx: &Context,
    reference: &ObjectReference,
    phase: ClusterPhase,
    message: String,
    rejected_version: Option<RejectedVersion>,
    event: Option<EventRecord>,
) -> Result<Action> {
    let previous = cluster.status.clone().unwrap_or_default();
    // The same refusal is reported once
    if let Some(event) = event {
        if previous.last_error.as_deref() != Some(message.as_str()) || previous.phase != phase {
            ctx.publish_event(reference, &event).await;
        }
    }
    warn!(phase = %phase, "Holding cluster: {}", message);

    let status = project_cluster_status(
        cluster,
        ClusterStatusInput {
            phase,
            members: previous.members,
            online: previous.online_instances,
            primary: previous.primary,
            version: previous.version,
            rejected_version: rejected_version.or(previous.rejected_version),
            handled_fields: previous.handled_fields,
            failed_handlers: previous.failed_handlers,
            last_error: Some(message),
        },
    );
    ClusterStatusManager::new(cluster, ctx).update(&status).await?;
    report_phase(
        cluster,
        ctx,
        reference,
        cluster.phase(),
        phase,
        previous.online_instances,
    )
    .await;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn report_phase(
    cluster: &InnoDBCluster,
    ctx: &Context,
    reference: &ObjectReference,
    from: ClusterPhase,
    to: ClusterPhase,
    online: i32,
) {
    if from != to {
        info!(from = %from, to = %to, "Cluster phase changed");
        ctx.publish_event(reference, &events::status_change(CLUSTER_KIND, from, to))
            .await;
    }
    if let Some(health) = &ctx.health_state {
        health.metrics.observe_cluster(
            &cluster.namespace().unwrap_or_default(),
            &cluster.name_any(),
            to,
            i64::from(cluster.spec.instances),
            i64::from(online),
        );
    }
}

async fn apply_child(ctx: &Context, ns: &str, child: &Child) -> Result<()> {
    match child {
        Child::ConfigMap(o) => apply_resource::<ConfigMap>(ctx, ns, o).await,
        Child::Service(o) => apply_resource::<Service>(ctx, ns, o).await,
        Child::PodDisruptionBudget(o) => apply_resource::<PodDisruptionBudget>(ctx, ns, o).await,
        Child::StatefulSet(o) => apply_resource::<StatefulSet>(ctx, ns, o).await,
        Child::Deployment(o) => apply_resource::<Deployment>(ctx, ns, o).await,
        Child::CronJob(o) => apply_resource::<CronJob>(ctx, ns, o).await,
    }
}

/// Push routing options through the current primary
async fn sync_on_primary(
    ctx: &Context,
    observation: &Observation,
    credentials: &Credentials,
    options: &std::collections::BTreeMap<String, serde_json::Value>,
) -> Result<usize> {
    let primary = observation
        .membership()
        .primary()
        .ok_or_else(|| Error::TransientError("no primary to update routing options on".into()))?;
    let address = InstanceAddress {
        host: pod_fqdn(&observation.cluster_name, primary, &observation.namespace),
        port: MYSQL_PORT,
    };
    let session = ctx.sql.connect(&address, credentials).await?;
    Ok(sync_routing_options(session.as_ref(), options).await?)
}
