//! Group Replication membership management
//!
//! Membership actions are derived from an [`Observation`] and issued one
//! pass at a time: a pass never waits for a join to finish, the next watch
//! event or requeue picks up where it left off. Primary election is left to
//! Group Replication and only observed here.

use std::fmt;

use tracing::info;

use crate::controller::error::Result;
use crate::controller::observe::{MembershipView, Observation};
use crate::mysql::group_replication;
use crate::mysql::{Credentials, GroupMemberState, InstanceAddress, MYSQL_PORT, SqlConnector};
use crate::resources::common::{group_seeds, pod_fqdn};

/// A membership change on one instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyAction {
    /// Start a new group on this instance
    Bootstrap(i32),
    /// Add a reachable instance that is not part of the group
    Join(i32),
    /// Restart replication on a member the group lost
    Rejoin(i32),
    /// Take a member out ahead of a scale down
    Leave(i32),
}

impl TopologyAction {
    pub fn ordinal(&self) -> i32 {
        match self {
            TopologyAction::Bootstrap(o)
            | TopologyAction::Join(o)
            | TopologyAction::Rejoin(o)
            | TopologyAction::Leave(o) => *o,
        }
    }
}

impl fmt::Display for TopologyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyAction::Bootstrap(o) => write!(f, "bootstrap group on instance {}", o),
            TopologyAction::Join(o) => write!(f, "join instance {}", o),
            TopologyAction::Rejoin(o) => write!(f, "rejoin instance {}", o),
            TopologyAction::Leave(o) => write!(f, "remove instance {}", o),
        }
    }
}

/// Instance to bootstrap when no group exists
///
/// Only chosen once every live pod below the desired count is reachable, so
/// after a complete outage the most advanced instance starts the group. Ties
/// go to the lowest ordinal.
pub fn bootstrap_candidate(observation: &Observation, desired: i32) -> Option<i32> {
    let wanted: Vec<_> = observation
        .live_pods()
        .filter(|p| p.ordinal < desired)
        .collect();
    if wanted.is_empty() || !wanted.iter().all(|p| p.is_reachable()) {
        return None;
    }
    wanted
        .iter()
        .max_by(|a, b| {
            a.transaction_count()
                .cmp(&b.transaction_count())
                .then(b.ordinal.cmp(&a.ordinal))
        })
        .map(|p| p.ordinal)
}

/// Members to remove before the StatefulSet shrinks
pub fn leave_actions(view: &MembershipView, desired: i32) -> Vec<TopologyAction> {
    view.members
        .iter()
        .filter(|(ordinal, m)| **ordinal >= desired && m.state == GroupMemberState::Online)
        .map(|(ordinal, _)| TopologyAction::Leave(*ordinal))
        .collect()
}

/// The single join or rejoin to issue this pass, if any
///
/// Nothing is added while another member is still RECOVERING; one
/// distributed recovery at a time keeps the donor load bounded.
pub fn join_action(observation: &Observation, view: &MembershipView, desired: i32) -> Option<TopologyAction> {
    if !view.exists() || view.any_recovering() {
        return None;
    }
    observation
        .live_pods()
        .filter(|p| p.ordinal < desired && p.is_reachable())
        .find_map(|pod| {
            let own = pod.self_state(&observation.cluster_name);
            if matches!(
                own,
                Some(GroupMemberState::Online) | Some(GroupMemberState::Recovering)
            ) {
                return None;
            }
            match view.state_of(pod.ordinal) {
                Some(GroupMemberState::Online) | Some(GroupMemberState::Recovering) => None,
                Some(_) => Some(TopologyAction::Rejoin(pod.ordinal)),
                None if own == Some(GroupMemberState::Error) => {
                    Some(TopologyAction::Rejoin(pod.ordinal))
                }
                None => Some(TopologyAction::Join(pod.ordinal)),
            }
        })
}

/// Membership actions for this pass, in the order they must run
pub fn plan_membership(observation: &Observation, desired: i32) -> (Vec<TopologyAction>, Option<TopologyAction>) {
    let view = observation.membership();
    if !view.exists() {
        return (
            Vec::new(),
            bootstrap_candidate(observation, desired).map(TopologyAction::Bootstrap),
        );
    }
    (
        leave_actions(&view, desired),
        join_action(observation, &view, desired),
    )
}

/// Run one membership action against its instance
pub async fn execute(
    action: TopologyAction,
    connector: &dyn SqlConnector,
    credentials: &Credentials,
    cluster_name: &str,
    namespace: &str,
    desired: i32,
) -> Result<()> {
    let address = InstanceAddress {
        host: pod_fqdn(cluster_name, action.ordinal(), namespace),
        port: MYSQL_PORT,
    };
    let session = connector.connect(&address, credentials).await?;
    let session = session.as_ref();

    match action {
        TopologyAction::Leave(_) => group_replication::leave(session).await?,
        TopologyAction::Bootstrap(_) => {
            group_replication::set_group_seeds(session, &group_seeds(cluster_name, namespace, desired))
                .await?;
            group_replication::bootstrap(session, credentials).await?;
        }
        TopologyAction::Join(_) => {
            group_replication::set_group_seeds(session, &group_seeds(cluster_name, namespace, desired))
                .await?;
            group_replication::join(session, credentials).await?;
        }
        TopologyAction::Rejoin(_) => {
            group_replication::set_group_seeds(session, &group_seeds(cluster_name, namespace, desired))
                .await?;
            group_replication::rejoin(session, credentials).await?;
        }
    }

    info!(cluster = cluster_name, namespace, "Issued {}", action);
    Ok(())
}
