//! Observation of a cluster's child objects and group membership
//!
//! One [`Observation`] is gathered per reconciliation pass. Everything the
//! planner and the state machine decide is derived from it together with the
//! spec, so nothing carries over between passes except what is stored in
//! the cluster's status.

use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodTemplateSpec, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::context::Context;
use crate::controller::error::{Result, with_timeout};
use crate::controller::state_machine::TransitionContext;
use crate::crd::{InnoDBCluster, MemberRole, MemberState, MemberStatus};
use crate::mysql::group_replication::{self, gtid_transaction_count};
use crate::mysql::{
    Credentials, GroupMember, GroupMemberRole, GroupMemberState, InstanceAddress, MYSQL_PORT,
};
use crate::resources::common::{
    COMPONENT_DATABASE, ordinal_from_host, pod_fqdn, pod_name, stamped_hash,
};
use crate::resources::CLUSTER_LABEL;

/// Container waiting reasons that will not clear up without a spec change
pub const FATAL_WAITING_REASONS: [&str; 4] = [
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
];

/// Kinds of child objects the cluster reconciler manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    ConfigMap,
    Service,
    PodDisruptionBudget,
    StatefulSet,
    Deployment,
    CronJob,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKind::ConfigMap => write!(f, "ConfigMap"),
            ChildKind::Service => write!(f, "Service"),
            ChildKind::PodDisruptionBudget => write!(f, "PodDisruptionBudget"),
            ChildKind::StatefulSet => write!(f, "StatefulSet"),
            ChildKind::Deployment => write!(f, "Deployment"),
            ChildKind::CronJob => write!(f, "CronJob"),
        }
    }
}

/// Identity of one child object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey {
    pub kind: ChildKind,
    pub name: String,
}

impl ChildKey {
    pub fn new(kind: ChildKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Workload fields the operator owns on a live object. An out of band edit
/// to any of them is corrected even when the stamped spec hash still matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnedFields {
    pub replicas: Option<i32>,
    /// Container name -> image
    pub images: BTreeMap<String, String>,
    /// Pod template labels
    pub labels: BTreeMap<String, String>,
}

impl OwnedFields {
    pub fn of_statefulset(sts: &StatefulSet) -> Self {
        let spec = sts.spec.as_ref();
        Self::from_parts(
            spec.and_then(|s| s.replicas),
            spec.map(|s| &s.template),
        )
    }

    pub fn of_deployment(deployment: &Deployment) -> Self {
        let spec = deployment.spec.as_ref();
        Self::from_parts(
            spec.and_then(|s| s.replicas),
            spec.map(|s| &s.template),
        )
    }

    fn from_parts(replicas: Option<i32>, template: Option<&PodTemplateSpec>) -> Self {
        let images = template
            .and_then(|t| t.spec.as_ref())
            .map(|spec| {
                spec.containers
                    .iter()
                    .filter_map(|c| Some((c.name.clone(), c.image.clone()?)))
                    .collect()
            })
            .unwrap_or_default();
        let labels = template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.clone())
            .unwrap_or_default();
        Self {
            replicas,
            images,
            labels,
        }
    }

    /// Whether `live` still carries every value in `self`. Extra labels or
    /// containers added by other managers are left alone.
    pub fn satisfied_by(&self, live: &OwnedFields) -> bool {
        let replicas = self.replicas.is_none() || self.replicas == live.replicas;
        let images = self
            .images
            .iter()
            .all(|(name, image)| live.images.get(name) == Some(image));
        let labels = self
            .labels
            .iter()
            .all(|(key, value)| live.labels.get(key) == Some(value));
        replicas && images && labels
    }
}

/// Result of probing one server over SQL
#[derive(Clone, Debug, PartialEq)]
pub enum Probe {
    /// Pod not running, nothing to connect to
    NotProbed,
    Unreachable(String),
    Reachable {
        /// Membership view as seen by this instance
        members: Vec<GroupMember>,
        gtid_executed: String,
        version: Option<String>,
    },
}

/// One server pod as seen this pass
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedPod {
    pub ordinal: i32,
    pub name: String,
    pub running: bool,
    pub deleting: bool,
    /// Waiting reason of a server container that has not started
    pub waiting_reason: Option<String>,
    pub probe: Probe,
}

impl ObservedPod {
    pub fn is_reachable(&self) -> bool {
        matches!(self.probe, Probe::Reachable { .. })
    }

    /// This instance's own entry in its membership view
    pub fn self_state(&self, cluster_name: &str) -> Option<GroupMemberState> {
        match &self.probe {
            Probe::Reachable { members, .. } => members
                .iter()
                .find(|m| ordinal_from_host(cluster_name, &m.host) == Some(self.ordinal))
                .map(|m| m.state),
            _ => None,
        }
    }

    /// Transactions this instance has executed
    pub fn transaction_count(&self) -> u64 {
        match &self.probe {
            Probe::Reachable { gtid_executed, .. } => gtid_transaction_count(gtid_executed),
            _ => 0,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match &self.probe {
            Probe::Reachable { version, .. } => version.as_deref(),
            _ => None,
        }
    }
}

/// One member of the authoritative membership view
#[derive(Clone, Debug, PartialEq)]
pub struct ViewMember {
    pub state: GroupMemberState,
    pub role: Option<GroupMemberRole>,
    pub version: Option<String>,
}

/// Membership reduced to ordinals
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MembershipView {
    /// Ordinal whose view this is; `None` when no group is visible
    pub source: Option<i32>,
    pub members: BTreeMap<i32, ViewMember>,
}

impl MembershipView {
    pub fn exists(&self) -> bool {
        self.source.is_some()
    }

    pub fn online(&self) -> i32 {
        count(self.members.values().filter(|m| m.state == GroupMemberState::Online))
    }

    pub fn size(&self) -> i32 {
        count(self.members.values())
    }

    pub fn primary(&self) -> Option<i32> {
        self.members
            .iter()
            .find(|(_, m)| {
                m.state == GroupMemberState::Online && m.role == Some(GroupMemberRole::Primary)
            })
            .map(|(ordinal, _)| *ordinal)
    }

    pub fn any_recovering(&self) -> bool {
        self.members
            .values()
            .any(|m| m.state == GroupMemberState::Recovering)
    }

    pub fn state_of(&self, ordinal: i32) -> Option<GroupMemberState> {
        self.members.get(&ordinal).map(|m| m.state)
    }
}

fn count<T>(iter: impl Iterator<Item = T>) -> i32 {
    i32::try_from(iter.count()).unwrap_or(i32::MAX)
}

/// Everything observed about one cluster in a pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    pub cluster_name: String,
    pub namespace: String,
    pub pods: Vec<ObservedPod>,
    /// Existing child objects and the spec hash stamped on them
    pub children: BTreeMap<ChildKey, Option<String>>,
    /// Owned fields of the existing StatefulSet and Deployments
    pub owned: BTreeMap<ChildKey, OwnedFields>,
}

impl Observation {
    pub fn new(cluster_name: &str, namespace: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn pod(&self, ordinal: i32) -> Option<&ObservedPod> {
        self.pods.iter().find(|p| p.ordinal == ordinal)
    }

    /// Pods that exist and are not being deleted
    pub fn live_pods(&self) -> impl Iterator<Item = &ObservedPod> {
        self.pods.iter().filter(|p| !p.deleting)
    }

    pub fn child_hash(&self, key: &ChildKey) -> Option<Option<&str>> {
        self.children.get(key).map(|h| h.as_deref())
    }

    pub fn owned_fields(&self, key: &ChildKey) -> Option<&OwnedFields> {
        self.owned.get(key)
    }

    /// Pick the authoritative view: the one reported by an instance that is
    /// itself ONLINE, preferring the view with the most ONLINE members and
    /// then the lowest ordinal.
    pub fn membership(&self) -> MembershipView {
        let mut best: Option<(i32, i32, &ObservedPod)> = None;
        for pod in self.live_pods() {
            if pod.self_state(&self.cluster_name) != Some(GroupMemberState::Online) {
                continue;
            }
            let Probe::Reachable { members, .. } = &pod.probe else {
                continue;
            };
            let online = count(members.iter().filter(|m| m.is_online()));
            let better = match best {
                None => true,
                Some((best_online, best_ordinal, _)) => {
                    online > best_online || (online == best_online && pod.ordinal < best_ordinal)
                }
            };
            if better {
                best = Some((online, pod.ordinal, pod));
            }
        }

        let Some((_, source, pod)) = best else {
            return MembershipView::default();
        };
        let Probe::Reachable { members, .. } = &pod.probe else {
            return MembershipView::default();
        };

        let members = members
            .iter()
            .filter_map(|m| {
                ordinal_from_host(&self.cluster_name, &m.host).map(|ordinal| {
                    (
                        ordinal,
                        ViewMember {
                            state: m.state,
                            role: m.role,
                            version: m.version.clone(),
                        },
                    )
                })
            })
            .collect();

        MembershipView {
            source: Some(source),
            members,
        }
    }

    /// Reported state of every ordinal up to the larger of the desired and
    /// the observed count
    pub fn member_statuses(&self, desired: i32) -> Vec<MemberStatus> {
        let view = self.membership();
        let highest = self
            .pods
            .iter()
            .map(|p| p.ordinal + 1)
            .chain(view.members.keys().map(|o| o + 1))
            .max()
            .unwrap_or(0)
            .max(desired);

        (0..highest)
            .map(|ordinal| {
                let pod = self.pod(ordinal).filter(|p| !p.deleting);
                let in_view = view.members.get(&ordinal);
                let state = match pod {
                    None => MemberState::Missing,
                    Some(pod) if !pod.is_reachable() => MemberState::Unreachable,
                    Some(pod) => match in_view {
                        Some(member) => member_state(member.state),
                        None => match pod.self_state(&self.cluster_name) {
                            Some(GroupMemberState::Error) => MemberState::Error,
                            Some(GroupMemberState::Recovering) => MemberState::Recovering,
                            _ => MemberState::Offline,
                        },
                    },
                };
                let role = in_view
                    .filter(|m| m.state == GroupMemberState::Online)
                    .and_then(|m| m.role)
                    .map(|r| match r {
                        GroupMemberRole::Primary => MemberRole::Primary,
                        GroupMemberRole::Secondary => MemberRole::Secondary,
                    });
                let version = in_view
                    .and_then(|m| m.version.clone())
                    .or_else(|| pod.and_then(|p| p.version().map(String::from)));
                MemberStatus {
                    ordinal,
                    pod: pod_name(&self.cluster_name, ordinal),
                    role,
                    state,
                    version,
                }
            })
            .collect()
    }

    /// First server pod stuck on a condition that needs a spec change
    pub fn fatal_pod_condition(&self) -> Option<String> {
        self.live_pods().find_map(|pod| {
            pod.waiting_reason
                .as_deref()
                .filter(|reason| FATAL_WAITING_REASONS.contains(reason))
                .map(|reason| format!("pod {} is waiting: {}", pod.name, reason))
        })
    }

    /// Some instance has executed transactions, so a group existed before
    pub fn has_history(&self) -> bool {
        self.pods.iter().any(|p| p.transaction_count() > 0)
    }

    /// Inputs for the lifecycle state machine
    pub fn transition_context(
        &self,
        desired: i32,
        spec_invalid: bool,
        permanent_failure: bool,
    ) -> TransitionContext {
        let view = self.membership();
        TransitionContext {
            desired,
            pods: count(self.live_pods()),
            online: view.online(),
            view_size: view.size(),
            has_primary: view.primary().is_some(),
            group_exists: view.exists(),
            previously_online: self.has_history(),
            spec_invalid,
            permanent_failure,
        }
    }
}

fn member_state(state: GroupMemberState) -> MemberState {
    match state {
        GroupMemberState::Online => MemberState::Online,
        GroupMemberState::Recovering => MemberState::Recovering,
        GroupMemberState::Unreachable => MemberState::Unreachable,
        GroupMemberState::Error => MemberState::Error,
        GroupMemberState::Offline => MemberState::Offline,
    }
}

/// Gather pods, child objects and membership for a cluster
///
/// `credentials` is `None` when the root secret could not be read; pods are
/// then listed but not probed.
pub async fn observe(
    cluster: &InnoDBCluster,
    ctx: &Context,
    credentials: Option<&Credentials>,
) -> Result<Observation> {
    let name = cluster.name_any();
    let ns = cluster.namespace().unwrap_or_default();
    let selector = format!("{}={}", CLUSTER_LABEL, name);
    let mut observation = Observation::new(&name, &ns);

    let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
    let pod_selector = format!(
        "{},app.kubernetes.io/component={}",
        selector, COMPONENT_DATABASE
    );
    let pods = with_timeout(
        ctx.config.api_timeout,
        "list pods",
        pods_api.list(&ListParams::default().labels(&pod_selector)),
    )
    .await?;

    let probes = pods.items.iter().filter_map(|pod| {
        let ordinal = ordinal_from_host(&name, &pod.name_any())?;
        Some(observe_pod(pod, ordinal, &name, &ns, ctx, credentials))
    });
    observation.pods = join_all(probes).await;
    observation.pods.sort_by_key(|p| p.ordinal);

    let children = [
        list_children::<ConfigMap>(ctx, &ns, &selector, ChildKind::ConfigMap, |_| None).await?,
        list_children::<Service>(ctx, &ns, &selector, ChildKind::Service, |_| None).await?,
        list_children::<PodDisruptionBudget>(
            ctx,
            &ns,
            &selector,
            ChildKind::PodDisruptionBudget,
            |_| None,
        )
        .await?,
        list_children::<StatefulSet>(ctx, &ns, &selector, ChildKind::StatefulSet, |o| {
            Some(OwnedFields::of_statefulset(o))
        })
        .await?,
        list_children::<Deployment>(ctx, &ns, &selector, ChildKind::Deployment, |o| {
            Some(OwnedFields::of_deployment(o))
        })
        .await?,
        list_children::<CronJob>(ctx, &ns, &selector, ChildKind::CronJob, |_| None).await?,
    ];
    for (key, hash, owned) in children.into_iter().flatten() {
        if let Some(owned) = owned {
            observation.owned.insert(key.clone(), owned);
        }
        observation.children.insert(key, hash);
    }

    debug!(
        pods = observation.pods.len(),
        children = observation.children.len(),
        "Observed cluster"
    );
    Ok(observation)
}

type ObservedChild = (ChildKey, Option<String>, Option<OwnedFields>);

async fn list_children<K>(
    ctx: &Context,
    ns: &str,
    selector: &str,
    kind: ChildKind,
    owned: fn(&K) -> Option<OwnedFields>,
) -> Result<Vec<ObservedChild>>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctx.client.clone(), ns);
    let list = with_timeout(
        ctx.config.api_timeout,
        "list child objects",
        api.list(&ListParams::default().labels(selector)),
    )
    .await?;
    Ok(list
        .items
        .iter()
        .map(|obj| (ChildKey::new(kind, obj.name_any()), stamped_hash(obj), owned(obj)))
        .collect())
}

async fn observe_pod(
    pod: &Pod,
    ordinal: i32,
    cluster_name: &str,
    ns: &str,
    ctx: &Context,
    credentials: Option<&Credentials>,
) -> ObservedPod {
    let status = pod.status.as_ref();
    let running = status.and_then(|s| s.phase.as_deref()) == Some("Running");
    let deleting = pod.metadata.deletion_timestamp.is_some();
    let waiting_reason = status
        .into_iter()
        .flat_map(|s| {
            s.init_container_statuses
                .iter()
                .flatten()
                .chain(s.container_statuses.iter().flatten())
        })
        .find_map(|cs| {
            cs.state
                .as_ref()
                .and_then(|st| st.waiting.as_ref())
                .and_then(|w| w.reason.clone())
        });

    let probe = match credentials {
        Some(credentials) if running && !deleting => {
            let address = InstanceAddress {
                host: pod_fqdn(cluster_name, ordinal, ns),
                port: MYSQL_PORT,
            };
            probe_instance(ctx, &address, credentials).await
        }
        _ => Probe::NotProbed,
    };

    ObservedPod {
        ordinal,
        name: pod.name_any(),
        running,
        deleting,
        waiting_reason,
        probe,
    }
}

async fn probe_instance(
    ctx: &Context,
    address: &InstanceAddress,
    credentials: &Credentials,
) -> Probe {
    let session = match ctx.sql.connect(address, credentials).await {
        Ok(session) => session,
        Err(e) => {
            debug!(address = %address, error = %e, "Instance unreachable");
            return Probe::Unreachable(e.to_string());
        }
    };

    let members = match group_replication::query_members(session.as_ref()).await {
        Ok(members) => members,
        Err(e) => return Probe::Unreachable(e.to_string()),
    };
    let gtid_executed = group_replication::gtid_executed(session.as_ref())
        .await
        .unwrap_or_default();
    let version = group_replication::server_version(session.as_ref())
        .await
        .ok()
        .flatten();

    Probe::Reachable {
        members,
        gtid_executed,
        version,
    }
}
