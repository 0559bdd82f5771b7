//! Kubernetes events posted on InnoDBCluster and MySQLBackup objects
//!
//! Events are plain values here; [`Context::publish_event`](super::Context::publish_event)
//! turns them into core/v1 Event objects. Besides the usual `Normal` and
//! `Warning` types the operator reports hard rejections as `Error`.

use std::fmt;

/// Event type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
    Error,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
            EventSeverity::Error => write!(f, "Error"),
        }
    }
}

/// Event reasons
pub mod reasons {
    /// A spec value was refused
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
    /// Informational progress messages
    pub const LOGGING: &str = "Logging";
    /// Cluster or backup phase changed
    pub const STATUS_CHANGE: &str = "StatusChange";
    /// Root credential secret missing or unusable
    pub const SECRET_ERROR: &str = "SecretError";
    /// A membership action was taken
    pub const TOPOLOGY: &str = "Topology";
    pub const BACKUP: &str = "Backup";
}

/// One event to post
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

impl EventRecord {
    pub fn new(severity: EventSeverity, reason: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self::new(EventSeverity::Normal, reason, message)
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self::new(EventSeverity::Warning, reason, message)
    }

    pub fn error(reason: &str, message: impl Into<String>) -> Self {
        Self::new(EventSeverity::Error, reason, message)
    }
}

/// A refused version change, logged as an `Error` event
pub fn version_rejected(old: Option<&str>, new: &str, reason: &str) -> EventRecord {
    let message = match old {
        Some(old) => format!(
            "spec.version change from {} to {} rejected: {}",
            old, new, reason
        ),
        None => format!("spec.version {} rejected: {}", new, reason),
    };
    EventRecord::error(reasons::LOGGING, message)
}

/// A spec change being pushed to the objects that carry it
pub fn propagating(field: &str, target: &str) -> EventRecord {
    EventRecord::normal(
        reasons::LOGGING,
        format!("Propagating {} change to {}", field, target),
    )
}

/// A join, rejoin, bootstrap or removal issued against the group. A failed
/// action is a `Warning`; the next pass plans it again.
pub fn membership(action: impl fmt::Display, error: Option<&dyn fmt::Display>) -> EventRecord {
    match error {
        None => EventRecord::normal(reasons::TOPOLOGY, format!("Membership: {}", action)),
        Some(e) => EventRecord::warning(
            reasons::TOPOLOGY,
            format!("Membership: {} failed: {}", action, e),
        ),
    }
}

/// A phase transition
pub fn status_change(kind: &str, from: impl fmt::Display, to: impl fmt::Display) -> EventRecord {
    EventRecord::normal(
        reasons::STATUS_CHANGE,
        format!("{} status changed from {} to {}", kind, from, to),
    )
}
