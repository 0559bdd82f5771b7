//! Spec field handler dispatch across several passes

use crate::common::*;
use mysql_operator::controller::handlers::{
    DispatchOutcome, Effect, HandlerRegistry, failure_events,
};
use mysql_operator::crd::{ClusterPhase, InnoDBCluster, InnoDBClusterStatus};
use serde_json::json;

const ROUTING_FIELD: &str = "spec.router.routingOptions";
const BOOTSTRAP_FIELD: &str = "spec.router.bootstrapOptions";

/// Store a dispatch outcome the way the reconciler writes it back
fn after(outcome: &DispatchOutcome, phase: ClusterPhase) -> InnoDBClusterStatus {
    InnoDBClusterStatus {
        phase,
        handled_fields: outcome.handled.clone(),
        failed_handlers: outcome.failed.clone(),
        ..Default::default()
    }
}

fn event_messages(outcome: &DispatchOutcome) -> Vec<String> {
    outcome
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Event(event) => Some(event.message.clone()),
            _ => None,
        })
        .collect()
}

fn dispatch(cluster: &InnoDBCluster) -> DispatchOutcome {
    HandlerRegistry::default().dispatch(cluster)
}

#[test]
fn test_first_pass_records_without_events() {
    let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
    let outcome = dispatch(&cluster);

    assert!(outcome.handled.contains_key("spec.instances"));
    assert!(outcome.effects.is_empty());
    assert!(!outcome.has_permanent_failure());
}

#[test]
fn test_second_pass_without_changes_is_quiet() {
    let first = dispatch(&create_test_cluster("mycluster", TEST_NAMESPACE, 3));
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_status(after(&first, ClusterPhase::Online))
        .build();

    let second = dispatch(&cluster);
    assert!(second.effects.is_empty());
    assert_eq!(second.handled, first.handled);
}

#[test]
fn test_instances_update_reports_scaling() {
    let first = dispatch(&create_test_cluster("mycluster", TEST_NAMESPACE, 3));
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_instances(5)
        .with_status(after(&first, ClusterPhase::Online))
        .build();

    let outcome = dispatch(&cluster);
    assert_eq!(event_messages(&outcome), vec!["Scaling cluster to 5 instances"]);
    assert_ne!(
        outcome.handled.get("spec.instances"),
        first.handled.get("spec.instances")
    );
}

#[test]
fn test_routing_options_wait_for_online_cluster() {
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_routing_options(json!({"read_only_targets": "all"}))
        .build();

    let outcome = dispatch(&cluster);
    assert!(outcome.temporary.iter().any(|(field, _)| *field == ROUTING_FIELD));
    assert!(!outcome.handled.contains_key(ROUTING_FIELD));
    assert!(!outcome.has_permanent_failure());
}

#[test]
fn test_routing_options_synced_when_online() {
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_routing_options(json!({"read_only_targets": "all"}))
        .with_phase(ClusterPhase::Online)
        .build();

    let outcome = dispatch(&cluster);
    let sync = outcome
        .effects
        .iter()
        .find_map(|e| match e {
            Effect::SyncRoutingOptions { field, options } => Some((*field, options.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(sync.0, ROUTING_FIELD);
    assert_eq!(sync.1.get("read_only_targets"), Some(&json!("all")));
    assert!(outcome.handled.contains_key(ROUTING_FIELD));
}

#[test]
fn test_failed_sync_is_retried() {
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_routing_options(json!({"tags": {"env": "prod"}}))
        .with_phase(ClusterPhase::Online)
        .build();

    let mut outcome = dispatch(&cluster);
    outcome.revert(ROUTING_FIELD);
    assert!(!outcome.handled.contains_key(ROUTING_FIELD));
}

#[test]
fn test_unknown_routing_option_is_permanent() {
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_routing_options(json!({"read_only_target": "all"}))
        .with_phase(ClusterPhase::Online)
        .build();

    let outcome = dispatch(&cluster);
    assert!(outcome.field_failed(ROUTING_FIELD));
    assert!(
        !outcome
            .effects
            .iter()
            .any(|e| matches!(e, Effect::SyncRoutingOptions { .. }))
    );
}

#[test]
fn test_bad_bootstrap_option_fails_once_per_value() {
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_bootstrap_options(&["conf-set-option=DEFAULT.max_connections=512"])
        .build();

    let first = dispatch(&cluster);
    assert!(first.has_permanent_failure());
    assert!(first.field_failed(BOOTSTRAP_FIELD));
    assert_eq!(first.first_failure().unwrap().handler, "router-bootstrap-options");
    assert_eq!(failure_events(&[], &first).len(), 1);

    // Same value on the next pass: still failed, no second event
    let status = after(&first, ClusterPhase::Online);
    let stored = status.failed_handlers.clone();
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_bootstrap_options(&["conf-set-option=DEFAULT.max_connections=512"])
        .with_status(status)
        .build();
    let second = dispatch(&cluster);
    assert!(second.field_failed(BOOTSTRAP_FIELD));
    assert_eq!(second.failed.len(), 1);
    assert!(failure_events(&stored, &second).is_empty());

    // A corrected value clears the failure
    let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_bootstrap_options(&["--conf-set-option=DEFAULT.max_connections=512"])
        .with_status(after(&second, ClusterPhase::Online))
        .build();
    let third = dispatch(&cluster);
    assert!(!third.field_failed(BOOTSTRAP_FIELD));
    assert!(third.handled.contains_key(BOOTSTRAP_FIELD));
}
