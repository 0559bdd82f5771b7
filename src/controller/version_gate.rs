//! Server version gate
//!
//! A pure check of a requested server version against the supported range
//! configured for the operator. A rejected change leaves the running version
//! in place; the reconciler keeps the last good phase and reports the
//! rejection as an event.

use semver::Version;

use crate::config::OperatorConfig;
use crate::controller::events::{self, EventRecord};
use crate::crd::{Edition, InnoDBCluster, RejectedVersion};
use crate::resources::common::requested_version;

/// Outcome of a version check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// The requested version may be rolled out
    Allowed,
    /// Requested version equals the running one; nothing to roll
    Unchanged,
    Rejected(String),
}

impl GateDecision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, GateDecision::Rejected(_))
    }
}

/// Parse a MySQL version string such as `8.0.28` or `9.1`
///
/// Two component versions get a zero patch level. Build suffixes such as
/// `-log` are ignored.
pub fn parse_version(value: &str) -> Option<Version> {
    let core = value.trim().split('-').next()?;
    let parts: Vec<&str> = core.split('.').collect();
    let normalized = match parts.as_slice() {
        [major, minor] => format!("{}.{}.0", major, minor),
        [_, _, _] => core.to_string(),
        _ => return None,
    };
    Version::parse(&normalized).ok()
}

/// Check a requested version against the running version and the supported range
pub fn check(
    current: Option<&str>,
    requested: &str,
    edition: Edition,
    config: &OperatorConfig,
) -> GateDecision {
    let Some(target) = parse_version(requested) else {
        return GateDecision::Rejected(format!("{} is not a valid version", requested));
    };

    if let Some(running) = current.and_then(parse_version) {
        if running == target {
            return GateDecision::Unchanged;
        }
        if target < running {
            return GateDecision::Rejected(format!(
                "downgrade from {} is not supported",
                running
            ));
        }
    }

    if config
        .disabled_versions
        .iter()
        .filter_map(|v| parse_version(v))
        .any(|v| v == target)
    {
        return GateDecision::Rejected(format!(
            "version {} of the {} edition is not supported",
            target, edition
        ));
    }

    if let Some(min) = parse_version(&config.min_supported_version) {
        if target < min {
            return GateDecision::Rejected(format!(
                "version {} is below the minimum supported version {}",
                target, min
            ));
        }
    }
    if let Some(max) = parse_version(&config.max_supported_version) {
        if target > max {
            return GateDecision::Rejected(format!(
                "version {} is above the maximum supported version {}",
                target, max
            ));
        }
    }

    GateDecision::Allowed
}

/// Version decision for one reconciliation pass
#[derive(Clone, Debug, PartialEq)]
pub struct VersionResolution {
    /// Version to run; `None` when a cluster that never ran asked for a
    /// version the gate refuses
    pub effective: Option<String>,
    pub rejected: Option<RejectedVersion>,
    /// Set only the first time a given rejection is seen
    pub event: Option<EventRecord>,
}

/// Gate the cluster's requested version against the accepted one in status
pub fn resolve(cluster: &InnoDBCluster, config: &OperatorConfig) -> VersionResolution {
    let requested = requested_version(cluster, config);
    let status = cluster.status.as_ref();
    let current = status.and_then(|s| s.version.as_deref());

    match check(current, &requested, cluster.spec.edition, config) {
        GateDecision::Allowed | GateDecision::Unchanged => VersionResolution {
            effective: Some(requested),
            rejected: None,
            event: None,
        },
        GateDecision::Rejected(reason) => {
            let seen = status
                .and_then(|s| s.rejected_version.as_ref())
                .is_some_and(|r| r.version == requested);
            VersionResolution {
                effective: current.map(String::from),
                event: (!seen).then(|| events::version_rejected(current, &requested, &reason)),
                rejected: Some(RejectedVersion {
                    version: requested,
                    reason,
                    generation: cluster.metadata.generation,
                }),
            }
        }
    }
}
