//! Reconciliation planner
//!
//! Computes the ordered corrective steps for one pass from the spec and an
//! [`Observation`]. Objects whose stamped spec hash already matches and whose
//! owned workload fields were not edited out of band are left alone, so
//! planning against a converged cluster yields no object steps.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::controller::observe::{ChildKey, ChildKind, Observation, OwnedFields};
use crate::controller::topology::{TopologyAction, plan_membership};
use crate::crd::InnoDBCluster;
use crate::resources::common::stamped_hash;
use crate::resources::{cronjob, mycnf, pdb, router, service, statefulset};

/// Spec fields whose permanent failure holds back dependent objects
pub const BOOTSTRAP_OPTIONS_FIELD: &str = "spec.router.bootstrapOptions";
pub const BACKUP_PROFILES_FIELD: &str = "spec.backupProfiles";
pub const BACKUP_SCHEDULES_FIELD: &str = "spec.backupSchedules";

/// A generated child object
#[derive(Clone, Debug)]
pub enum Child {
    ConfigMap(ConfigMap),
    Service(Service),
    PodDisruptionBudget(PodDisruptionBudget),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    CronJob(CronJob),
}

impl Child {
    pub fn key(&self) -> ChildKey {
        match self {
            Child::ConfigMap(o) => ChildKey::new(ChildKind::ConfigMap, o.name_any()),
            Child::Service(o) => ChildKey::new(ChildKind::Service, o.name_any()),
            Child::PodDisruptionBudget(o) => {
                ChildKey::new(ChildKind::PodDisruptionBudget, o.name_any())
            }
            Child::StatefulSet(o) => ChildKey::new(ChildKind::StatefulSet, o.name_any()),
            Child::Deployment(o) => ChildKey::new(ChildKind::Deployment, o.name_any()),
            Child::CronJob(o) => ChildKey::new(ChildKind::CronJob, o.name_any()),
        }
    }

    pub fn hash(&self) -> Option<String> {
        match self {
            Child::ConfigMap(o) => stamped_hash(o),
            Child::Service(o) => stamped_hash(o),
            Child::PodDisruptionBudget(o) => stamped_hash(o),
            Child::StatefulSet(o) => stamped_hash(o),
            Child::Deployment(o) => stamped_hash(o),
            Child::CronJob(o) => stamped_hash(o),
        }
    }

    /// Workload fields compared against the live object
    pub fn owned_fields(&self) -> Option<OwnedFields> {
        match self {
            Child::StatefulSet(o) => Some(OwnedFields::of_statefulset(o)),
            Child::Deployment(o) => Some(OwnedFields::of_deployment(o)),
            _ => None,
        }
    }
}

/// One corrective step
#[derive(Clone, Debug)]
pub enum Step {
    Apply(Child),
    Delete(ChildKey),
    Membership(TopologyAction),
}

impl Step {
    /// Steps that write Kubernetes objects
    pub fn is_object_step(&self) -> bool {
        matches!(self, Step::Apply(_) | Step::Delete(_))
    }
}

/// Everything the planner needs besides the cluster itself
pub struct PlanInput<'a> {
    pub config: &'a OperatorConfig,
    pub observation: &'a Observation,
    /// Version to run: the requested one if the gate allowed it, otherwise
    /// the last accepted one
    pub version: &'a str,
    /// Spec fields with a permanently failed handler
    pub failed_fields: &'a [String],
}

impl PlanInput<'_> {
    fn failed(&self, field: &str) -> bool {
        self.failed_fields.iter().any(|f| f == field)
    }
}

fn push_if_changed(steps: &mut Vec<Step>, observation: &Observation, child: Child) {
    let key = child.key();
    let desired = child.hash();
    let hash_matches = matches!(
        observation.child_hash(&key),
        Some(Some(existing)) if desired.as_deref() == Some(existing)
    );
    let drifted = match (child.owned_fields(), observation.owned_fields(&key)) {
        (Some(wanted), Some(live)) => !wanted.satisfied_by(live),
        _ => false,
    };
    if !hash_matches || drifted {
        steps.push(Step::Apply(child));
    }
}

/// Plan the corrective steps for one pass
///
/// Order: discovery service, disruption budget and configuration first,
/// then members leaving ahead of a scale down, the StatefulSet, the
/// membership action for this pass, routers once a primary is online, the
/// client service, and backup schedules once the cluster is online.
pub fn plan(cluster: &InnoDBCluster, input: &PlanInput<'_>) -> Result<Vec<Step>> {
    let observation = input.observation;
    let desired = cluster.spec.instances;
    let mut steps = Vec::new();

    push_if_changed(
        &mut steps,
        observation,
        Child::Service(service::generate_headless_service(cluster)),
    );
    push_if_changed(
        &mut steps,
        observation,
        Child::PodDisruptionBudget(pdb::generate_pdb(cluster)),
    );
    push_if_changed(
        &mut steps,
        observation,
        Child::ConfigMap(mycnf::generate_config_map(cluster)),
    );

    let (leaves, join) = plan_membership(observation, desired);
    steps.extend(leaves.into_iter().map(Step::Membership));

    push_if_changed(
        &mut steps,
        observation,
        Child::StatefulSet(statefulset::generate_statefulset(
            cluster,
            input.config,
            input.version,
        )?),
    );

    steps.extend(join.map(Step::Membership));

    let view = observation.membership();
    let online = view.primary().is_some();

    if online && !input.failed(BOOTSTRAP_OPTIONS_FIELD) {
        push_if_changed(
            &mut steps,
            observation,
            Child::Deployment(router::generate_router_deployment(
                cluster,
                input.config,
                input.version,
            )),
        );
    }

    push_if_changed(
        &mut steps,
        observation,
        Child::Service(service::generate_cluster_service(cluster)),
    );

    if online && !input.failed(BACKUP_SCHEDULES_FIELD) && !input.failed(BACKUP_PROFILES_FIELD) {
        for schedule in &cluster.spec.backup_schedules {
            push_if_changed(
                &mut steps,
                observation,
                Child::CronJob(cronjob::generate_schedule_cronjob(
                    cluster,
                    schedule,
                    input.config,
                )),
            );
        }
    }

    let wanted = cronjob::desired_cronjob_names(cluster);
    steps.extend(
        observation
            .children
            .keys()
            .filter(|k| k.kind == ChildKind::CronJob && !wanted.contains_key(&k.name))
            .cloned()
            .map(Step::Delete),
    );

    Ok(steps)
}
