//! Status written back through merge patches across several passes

use crate::common::*;
use mysql_operator::controller::handlers::{DispatchOutcome, Effect, HandlerRegistry};
use mysql_operator::controller::status::status_patch;
use mysql_operator::crd::{ClusterPhase, InnoDBCluster, InnoDBClusterStatus};
use serde_json::{Value, json};

/// Status the reconciler would write after a dispatch
fn written(outcome: &DispatchOutcome) -> InnoDBClusterStatus {
    InnoDBClusterStatus {
        phase: ClusterPhase::Online,
        online_instances: 3,
        instances: 3,
        handled_fields: outcome.handled.clone(),
        failed_handlers: outcome.failed.clone(),
        ..Default::default()
    }
}

/// Send `new` as a merge patch over the stored status and read it back
fn store(stored: Option<&InnoDBClusterStatus>, new: &InnoDBClusterStatus) -> InnoDBClusterStatus {
    let mut server = stored
        .map(|s| serde_json::to_value(s).unwrap())
        .unwrap_or_else(|| json!({}));
    merge_patch(&mut server, &status_patch(stored, new).unwrap());
    serde_json::from_value(server).unwrap()
}

fn labelled(labels: Option<Value>) -> InnoDBClusterBuilder {
    let builder = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_bootstrap_options(&["--conf-use-gr-notifications"]);
    match labels {
        Some(labels) => builder.with_spec_field("podLabels", labels),
        None => builder,
    }
}

fn with_stored(builder: InnoDBClusterBuilder, status: &InnoDBClusterStatus) -> InnoDBCluster {
    builder.with_status(status.clone()).build()
}

fn events(outcome: &DispatchOutcome) -> Vec<String> {
    outcome
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Event(event) => Some(event.message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_removed_field_leaves_stored_fingerprints() {
    let registry = HandlerRegistry::default();
    let first = registry.dispatch(&labelled(Some(json!({"tier": "db"}))).build());
    let stored = store(None, &written(&first));
    assert!(stored.handled_fields.contains_key("spec.podLabels"));
    assert!(stored.handled_fields.contains_key("spec.router.bootstrapOptions"));

    // Labels removed from the spec
    let removal = registry.dispatch(&with_stored(labelled(None), &stored));
    assert_eq!(
        events(&removal),
        vec!["Propagating podLabels change to StatefulSet"]
    );
    let stored = store(Some(&stored), &written(&removal));
    assert!(!stored.handled_fields.contains_key("spec.podLabels"));
    assert!(stored.handled_fields.contains_key("spec.instances"));
    assert!(stored.handled_fields.contains_key("spec.router.bootstrapOptions"));

    let next = registry.dispatch(&with_stored(labelled(None), &stored));
    assert!(next.effects.is_empty(), "repeated effects: {:?}", next.effects);
    assert_eq!(next.handled, stored.handled_fields);
}

#[test]
fn test_reverted_field_is_dropped_from_stored_status() {
    let registry = HandlerRegistry::default();
    let first = registry.dispatch(&labelled(None).build());
    let stored = store(None, &written(&first));

    let routed = labelled(None)
        .with_routing_options(json!({"read_only_targets": "all"}))
        .with_status(InnoDBClusterStatus {
            phase: ClusterPhase::Online,
            ..stored.clone()
        })
        .build();
    let mut outcome = registry.dispatch(&routed);
    assert!(outcome.handled.contains_key("spec.router.routingOptions"));
    let pass = store(Some(&stored), &written(&outcome));

    // The live sync failed: nothing may be remembered for the field
    outcome.revert("spec.router.routingOptions");
    let stored = store(Some(&pass), &written(&outcome));
    assert!(!stored.handled_fields.contains_key("spec.router.routingOptions"));
    assert_eq!(stored.handled_fields, first.handled);
}

#[test]
fn test_cleared_error_is_removed() {
    let failing = InnoDBClusterStatus {
        phase: ClusterPhase::Error,
        last_error: Some("secret mypwds not found".to_string()),
        ..Default::default()
    };
    let stored = store(None, &failing);
    let healthy = InnoDBClusterStatus {
        phase: ClusterPhase::Online,
        ..Default::default()
    };
    let stored = store(Some(&stored), &healthy);
    assert_eq!(stored, healthy);
}
