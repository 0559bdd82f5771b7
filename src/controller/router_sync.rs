//! Live router option sync
//!
//! Routing options live in the InnoDB Cluster metadata and are re-read by
//! every router on its next metadata refresh, so they are pushed over SQL
//! to the primary instead of rolling the router Deployment. Restart-bound
//! router settings travel with the Deployment itself.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::controller::handlers::ROUTING_OPTION_KEYS;
use crate::mysql::group_replication;
use crate::mysql::{SqlError, SqlSession};

/// One metadata update
#[derive(Clone, Debug, PartialEq)]
pub enum RoutingChange {
    Set(String, Value),
    /// Drop the option so routers fall back to their built-in default
    Reset(String),
}

/// Updates needed to turn `current` into `desired`
///
/// Only options the operator manages are reset; anything else found in the
/// metadata is left as it is.
pub fn diff_routing_options(
    current: &BTreeMap<String, Value>,
    desired: &BTreeMap<String, Value>,
) -> Vec<RoutingChange> {
    let mut changes: Vec<RoutingChange> = desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| RoutingChange::Set(key.clone(), value.clone()))
        .collect();

    changes.extend(
        current
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .filter(|key| ROUTING_OPTION_KEYS.contains(&key.as_str()))
            .map(|key| RoutingChange::Reset(key.clone())),
    );
    changes
}

/// Bring the metadata routing options in line with the spec, returning the
/// number of options touched
pub async fn sync_routing_options(
    session: &dyn SqlSession,
    desired: &BTreeMap<String, Value>,
) -> Result<usize, SqlError> {
    let current = group_replication::router_options(session).await?;
    let changes = diff_routing_options(&current, desired);

    for change in &changes {
        match change {
            RoutingChange::Set(key, value) => {
                group_replication::set_router_option(session, key, value).await?;
            }
            RoutingChange::Reset(key) => {
                group_replication::reset_router_option(session, key).await?;
            }
        }
    }

    if !changes.is_empty() {
        info!(changes = changes.len(), "Updated routing options");
    }
    Ok(changes.len())
}
