//! Field handler registry
//!
//! Spec fields that can change independently are tracked one by one. Each
//! field's last successfully handled value is fingerprinted into
//! `status.handledFields`; a pass compares the current value against it,
//! turns the difference into a [`FieldChange`] and runs the handlers the
//! [`HandlerRegistry`] maps to that change.
//!
//! Handlers are plain functions. They validate, describe what should happen
//! as [`Effect`]s and classify their failures; they never touch the API
//! server themselves, so dispatch is deterministic and testable.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::controller::events::{self, EventRecord, reasons};
use crate::controller::validation::{validate_profiles, validate_schedules};
use crate::crd::{BackupProfile, ClusterPhase, FailedHandler, InnoDBCluster};
use crate::resources::common::spec_hash;

/// Routing options MySQL Router reads from the cluster metadata
pub const ROUTING_OPTION_KEYS: [&str; 8] = [
    "target_cluster",
    "invalidated_cluster_policy",
    "stats_updates_frequency",
    "use_replica_primary_as_rw",
    "tags",
    "read_only_targets",
    "guideline",
    "unreachable_quorum_allowed_traffic",
];

pub const CLUSTER_KIND: &str = "InnoDBCluster";

/// How a field changed relative to the last handled value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldEvent {
    Create,
    Update,
    Delete,
}

impl fmt::Display for FieldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldEvent::Create => write!(f, "create"),
            FieldEvent::Update => write!(f, "update"),
            FieldEvent::Delete => write!(f, "delete"),
        }
    }
}

/// A detected change of one spec field
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub event: FieldEvent,
    /// Current value, `None` after a delete
    pub value: Option<Value>,
    /// Fingerprint of the current value, `None` after a delete
    pub fingerprint: Option<String>,
}

/// Work a handler asks the reconciler to carry out
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Event(EventRecord),
    /// Push routing options into the cluster metadata. Keys missing from the
    /// map are reset to the router default.
    SyncRoutingOptions {
        field: &'static str,
        options: BTreeMap<String, Value>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerError {
    /// Retry on a later pass; the fingerprint is not recorded
    Temporary(String),
    /// Stop retrying until the field value changes
    Permanent(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Temporary(msg) => write!(f, "temporary: {}", msg),
            HandlerError::Permanent(msg) => write!(f, "permanent: {}", msg),
        }
    }
}

/// What a handler gets to look at
pub struct HandlerInput<'a> {
    pub cluster: &'a InnoDBCluster,
    pub change: &'a FieldChange,
    /// Phase at the start of the pass
    pub phase: ClusterPhase,
}

pub type HandlerFn = fn(&HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError>;

/// One registry entry
pub struct HandlerSpec {
    pub name: &'static str,
    pub kind: &'static str,
    pub field: &'static str,
    pub events: &'static [FieldEvent],
    pub handler: HandlerFn,
}

impl HandlerSpec {
    fn matches(&self, kind: &str, change: &FieldChange) -> bool {
        self.kind == kind && self.field == change.field && self.events.contains(&change.event)
    }
}

const ALL_EVENTS: &[FieldEvent] = &[FieldEvent::Create, FieldEvent::Update, FieldEvent::Delete];
const CHANGE_EVENTS: &[FieldEvent] = &[FieldEvent::Update, FieldEvent::Delete];
const VALUE_EVENTS: &[FieldEvent] = &[FieldEvent::Create, FieldEvent::Update];

/// Ordered mapping of (kind, field, event) to handlers
pub struct HandlerRegistry {
    handlers: Vec<HandlerSpec>,
}

fn cluster_handler(
    name: &'static str,
    field: &'static str,
    events: &'static [FieldEvent],
    handler: HandlerFn,
) -> HandlerSpec {
    HandlerSpec {
        name,
        kind: CLUSTER_KIND,
        field,
        events,
        handler,
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: vec![
                cluster_handler("instances", "spec.instances", CHANGE_EVENTS, on_instances),
                cluster_handler("pod-labels", "spec.podLabels", CHANGE_EVENTS, on_propagated),
                cluster_handler(
                    "pod-annotations",
                    "spec.podAnnotations",
                    CHANGE_EVENTS,
                    on_propagated,
                ),
                cluster_handler(
                    "router-instances",
                    "spec.router.instances",
                    CHANGE_EVENTS,
                    on_propagated,
                ),
                cluster_handler(
                    "router-pod-labels",
                    "spec.router.podLabels",
                    CHANGE_EVENTS,
                    on_propagated,
                ),
                cluster_handler(
                    "router-pod-annotations",
                    "spec.router.podAnnotations",
                    CHANGE_EVENTS,
                    on_propagated,
                ),
                cluster_handler(
                    "router-bootstrap-options",
                    "spec.router.bootstrapOptions",
                    ALL_EVENTS,
                    on_bootstrap_options,
                ),
                cluster_handler(
                    "router-routing-options",
                    "spec.router.routingOptions",
                    ALL_EVENTS,
                    on_routing_options,
                ),
                cluster_handler("service", "spec.service", CHANGE_EVENTS, on_propagated),
                cluster_handler(
                    "backup-profiles",
                    "spec.backupProfiles",
                    VALUE_EVENTS,
                    on_backup_profiles,
                ),
                cluster_handler(
                    "backup-schedules",
                    "spec.backupSchedules",
                    VALUE_EVENTS,
                    on_backup_schedules,
                ),
                cluster_handler(
                    "backup-schedules-removed",
                    "spec.backupSchedules",
                    &[FieldEvent::Delete],
                    on_propagated,
                ),
            ],
        }
    }
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<HandlerSpec>) -> Self {
        Self { handlers }
    }

    /// Tracked field paths in registry order, without repeats
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> = Vec::new();
        for spec in &self.handlers {
            if !fields.contains(&spec.field) {
                fields.push(spec.field);
            }
        }
        fields
    }

    pub fn handlers_for<'a>(
        &'a self,
        kind: &'a str,
        change: &'a FieldChange,
    ) -> impl Iterator<Item = &'a HandlerSpec> + 'a {
        self.handlers.iter().filter(move |h| h.matches(kind, change))
    }

    /// Compare the spec against the handled fingerprints
    pub fn changes(&self, cluster: &InnoDBCluster) -> Vec<FieldChange> {
        let spec = serde_json::to_value(&cluster.spec).unwrap_or(Value::Null);
        let handled = cluster
            .status
            .as_ref()
            .map(|s| &s.handled_fields);

        self.fields()
            .into_iter()
            .filter_map(|field| {
                let value = field_value(&spec, field);
                let fingerprint = value.as_ref().map(spec_hash);
                let previous = handled.and_then(|h| h.get(field));
                let event = match (previous, &fingerprint) {
                    (None, None) => return None,
                    (None, Some(_)) => FieldEvent::Create,
                    (Some(_), None) => FieldEvent::Delete,
                    (Some(old), Some(new)) if old == new => return None,
                    (Some(_), Some(_)) => FieldEvent::Update,
                };
                Some(FieldChange {
                    field,
                    event,
                    value,
                    fingerprint,
                })
            })
            .collect()
    }

    /// Run the handlers for every pending change
    pub fn dispatch(&self, cluster: &InnoDBCluster) -> DispatchOutcome {
        let status = cluster.status.as_ref();
        let phase = cluster.phase();
        let mut outcome = DispatchOutcome {
            handled: status.map(|s| s.handled_fields.clone()).unwrap_or_default(),
            failed: status.map(|s| s.failed_handlers.clone()).unwrap_or_default(),
            ..Default::default()
        };
        outcome.previous = outcome.handled.clone();

        for change in self.changes(cluster) {
            let fingerprint = change.fingerprint.clone().unwrap_or_default();
            // A stored failure only holds for the value it failed on
            outcome
                .failed
                .retain(|f| f.field != change.field || f.fingerprint == fingerprint);

            let input = HandlerInput {
                cluster,
                change: &change,
                phase,
            };
            let mut effects = Vec::new();
            let mut error = None;
            for spec in self.handlers_for(CLUSTER_KIND, &change) {
                if outcome
                    .failed
                    .iter()
                    .any(|f| f.handler == spec.name && f.field == change.field)
                {
                    error = Some(HandlerError::Permanent(String::new()));
                    break;
                }
                match (spec.handler)(&input) {
                    Ok(mut produced) => effects.append(&mut produced),
                    Err(HandlerError::Permanent(message)) => {
                        outcome.failed.push(FailedHandler {
                            handler: spec.name.to_string(),
                            field: change.field.to_string(),
                            fingerprint: fingerprint.clone(),
                            message: message.clone(),
                            failed_at: Some(chrono::Utc::now().to_rfc3339()),
                        });
                        error = Some(HandlerError::Permanent(message));
                        break;
                    }
                    Err(HandlerError::Temporary(message)) => {
                        outcome.temporary.push((change.field, message.clone()));
                        error = Some(HandlerError::Temporary(message));
                        break;
                    }
                }
            }

            match error {
                None => {
                    outcome.effects.append(&mut effects);
                    match change.fingerprint {
                        Some(fp) => outcome.handled.insert(change.field.to_string(), fp),
                        None => outcome.handled.remove(change.field),
                    };
                }
                Some(HandlerError::Permanent(_)) => {
                    // Events describing the refusal still go out
                    outcome.effects.extend(
                        effects
                            .into_iter()
                            .filter(|e| matches!(e, Effect::Event(_))),
                    );
                }
                Some(HandlerError::Temporary(_)) => {}
            }
        }

        outcome
    }
}

/// Result of one dispatch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Fingerprints to store in `status.handledFields`
    pub handled: BTreeMap<String, String>,
    /// Handlers to store in `status.failedHandlers`
    pub failed: Vec<FailedHandler>,
    pub effects: Vec<Effect>,
    /// Fields whose handlers asked to be retried
    pub temporary: Vec<(&'static str, String)>,
    previous: BTreeMap<String, String>,
}

impl DispatchOutcome {
    /// Undo the recorded fingerprint of a field whose effect failed
    pub fn revert(&mut self, field: &str) {
        match self.previous.get(field) {
            Some(old) => self.handled.insert(field.to_string(), old.clone()),
            None => self.handled.remove(field),
        };
    }

    pub fn field_failed(&self, field: &str) -> bool {
        self.failed.iter().any(|f| f.field == field)
    }

    pub fn has_permanent_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn first_failure(&self) -> Option<&FailedHandler> {
        self.failed.first()
    }
}

/// Look up a dotted `spec.` path in the serialized spec. Nulls, empty maps
/// and empty lists count as unset.
pub fn field_value(spec: &Value, path: &str) -> Option<Value> {
    let mut current = spec;
    for segment in path.strip_prefix("spec.").unwrap_or(path).split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.clone()),
    }
}

fn propagation_target(field: &str) -> &'static str {
    match field {
        "spec.podLabels" | "spec.podAnnotations" | "spec.instances" => "StatefulSet",
        "spec.service" => "Service",
        "spec.backupSchedules" => "backup CronJobs",
        _ => "router Deployment",
    }
}

fn field_label(field: &str) -> &str {
    field.strip_prefix("spec.").unwrap_or(field)
}

fn on_propagated(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    let field = input.change.field;
    Ok(vec![Effect::Event(events::propagating(
        field_label(field),
        propagation_target(field),
    ))])
}

fn on_instances(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    let instances = input.cluster.spec.instances;
    Ok(vec![Effect::Event(EventRecord::normal(
        reasons::LOGGING,
        format!("Scaling cluster to {} instances", instances),
    ))])
}

fn on_bootstrap_options(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    let options = &input.cluster.spec.router.bootstrap_options;
    if let Some(bad) = options.iter().find(|o| !o.starts_with("--")) {
        let message = format!(
            "router.bootstrapOptions entry {:?} is not a long option",
            bad
        );
        return Err(invalid_argument(message));
    }
    if input.change.event == FieldEvent::Create {
        return Ok(Vec::new());
    }
    Ok(vec![Effect::Event(events::propagating(
        "router.bootstrapOptions",
        "router Deployment",
    ))])
}

fn on_routing_options(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    let options = input.cluster.spec.router.routing_options.clone();
    if let Some(bad) = options
        .keys()
        .find(|k| !ROUTING_OPTION_KEYS.contains(&k.as_str()))
    {
        return Err(invalid_argument(format!(
            "router.routingOptions has unknown option {:?}",
            bad
        )));
    }
    if !input.phase.is_online() {
        return Err(HandlerError::Temporary(
            "routing options can only be set on an ONLINE cluster".to_string(),
        ));
    }
    Ok(vec![Effect::SyncRoutingOptions {
        field: input.change.field,
        options,
    }])
}

fn on_backup_profiles(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    let profiles: &[BackupProfile] = &input.cluster.spec.backup_profiles;
    validate_profiles(profiles).map_err(|e| invalid_argument(strip_kind(e)))?;
    Ok(Vec::new())
}

fn on_backup_schedules(input: &HandlerInput<'_>) -> Result<Vec<Effect>, HandlerError> {
    validate_schedules(input.cluster).map_err(|e| invalid_argument(strip_kind(e)))?;
    if input.change.event == FieldEvent::Create {
        return Ok(Vec::new());
    }
    on_propagated(input)
}

fn strip_kind(error: crate::controller::Error) -> String {
    match error {
        crate::controller::Error::ValidationError(msg) => msg,
        other => other.to_string(),
    }
}

fn invalid_argument(message: String) -> HandlerError {
    HandlerError::Permanent(message)
}

/// Events for permanent failures recorded in this dispatch
pub fn failure_events(before: &[FailedHandler], outcome: &DispatchOutcome) -> Vec<EventRecord> {
    outcome
        .failed
        .iter()
        .filter(|f| {
            !before
                .iter()
                .any(|b| b.handler == f.handler && b.fingerprint == f.fingerprint)
        })
        .map(|f| EventRecord::error(reasons::INVALID_ARGUMENT, f.message.clone()))
        .collect()
}
