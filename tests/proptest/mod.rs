// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for the MySQL Operator
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. A converged cluster plans no further object changes
//! 2. Backup states never move backwards and finished backups stay finished
//! 3. The version gate never lets a rejected version become the running one
//! 4. A disabled schedule never produces a backup
//! 5. Validation and phase derivation are deterministic and never panic
//! 6. A status merge patch always lands on exactly the new status

#[path = "../common/mod.rs"]
mod common;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::*;
use mysql_operator::OperatorConfig;
use mysql_operator::controller::backup_orchestrator::{TriggerDecision, evaluate_trigger};
use mysql_operator::controller::backup_state_machine::{BackupEvent, transition};
use mysql_operator::controller::observe::Observation;
use mysql_operator::controller::planner::{PlanInput, Step, plan};
use mysql_operator::controller::state_machine::{TransitionContext, determine_event, next_phase};
use mysql_operator::controller::status::status_patch;
use mysql_operator::controller::validation::validate_cluster_spec;
use mysql_operator::controller::version_gate::{check, parse_version, resolve};
use mysql_operator::crd::{BackupState, ClusterPhase, Edition, InnoDBCluster, InnoDBClusterStatus};
use mysql_operator::mysql::GroupMemberState;
use mysql_operator::mysql::group_replication::gtid_transaction_count;

// =============================================================================
// Strategies
// =============================================================================

fn backup_event() -> impl Strategy<Value = BackupEvent> {
    prop_oneof![
        Just(BackupEvent::JobStarted),
        Just(BackupEvent::JobSucceeded),
        Just(BackupEvent::JobFailed),
        Just(BackupEvent::Rejected),
    ]
}

fn cluster_phase() -> impl Strategy<Value = ClusterPhase> {
    prop_oneof![
        Just(ClusterPhase::Pending),
        Just(ClusterPhase::Initializing),
        Just(ClusterPhase::Online),
        Just(ClusterPhase::OnlinePartial),
        Just(ClusterPhase::OnlineUncertain),
        Just(ClusterPhase::Error),
        Just(ClusterPhase::Invalid),
    ]
}

/// Versions around the supported range, including out of range ones
fn server_version() -> impl Strategy<Value = String> {
    (5u64..11, 0u64..5, 0u64..40).prop_map(|(major, minor, patch)| {
        format!("{}.{}.{}", major, minor, patch)
    })
}

const TRACKED_FIELDS: [&str; 6] = [
    "spec.instances",
    "spec.podLabels",
    "spec.router.instances",
    "spec.router.podLabels",
    "spec.router.routingOptions",
    "spec.backupProfiles",
];

fn cluster_status() -> impl Strategy<Value = InnoDBClusterStatus> {
    (
        cluster_phase(),
        0i32..4,
        prop::collection::btree_map(
            prop::sample::select(TRACKED_FIELDS.to_vec()),
            "[0-9a-f]{8}",
            0..6,
        ),
        prop::option::of("[a-z ]{1,20}"),
        prop::option::of(0i32..3),
    )
        .prop_map(|(phase, online, handled, last_error, primary)| InnoDBClusterStatus {
            phase,
            online_instances: online,
            instances: 3,
            primary: primary.map(|o| format!("mycluster-{}", o)),
            handled_fields: handled
                .into_iter()
                .map(|(field, fp)| (field.to_string(), fp))
                .collect(),
            last_error,
            ..Default::default()
        })
}

fn member_state() -> impl Strategy<Value = GroupMemberState> {
    prop_oneof![
        3 => Just(GroupMemberState::Online),
        1 => Just(GroupMemberState::Recovering),
    ]
}

fn transition_context() -> impl Strategy<Value = TransitionContext> {
    (
        1i32..10,
        0i32..10,
        0i32..10,
        0i32..10,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(desired, pods, online, view_size, has_primary, group, previous, invalid, fatal)| {
                TransitionContext {
                    desired,
                    pods,
                    online: online.min(view_size),
                    view_size,
                    has_primary,
                    group_exists: group,
                    previously_online: previous,
                    spec_invalid: invalid,
                    permanent_failure: fatal,
                }
            },
        )
}

fn rank(state: BackupState) -> u8 {
    match state {
        BackupState::Pending => 0,
        BackupState::Running => 1,
        BackupState::Completed | BackupState::Failed => 2,
    }
}

fn plan_object_steps(cluster: &InnoDBCluster, observation: &Observation) -> Vec<Step> {
    let config = OperatorConfig::default();
    plan(
        cluster,
        &PlanInput {
            config: &config,
            observation,
            version: "8.4.3",
            failed_fields: &[],
        },
    )
    .unwrap()
    .into_iter()
    .filter(Step::is_object_step)
    .collect()
}

// =============================================================================
// Planner
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: applying a pass's object steps converges the next pass
    #[test]
    fn prop_plan_is_idempotent(
        instances in 1i32..=9,
        states in prop::collection::vec(member_state(), 1..=9),
        routers in 0i32..4,
        with_schedule in any::<bool>(),
    ) {
        let mut builder = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_instances(instances)
            .with_router_instances(routers)
            .with_profile(volume_profile("dump", "backups"));
        if with_schedule {
            builder = builder.with_schedule(schedule("nightly", "dump", true));
        }
        let cluster = builder.build();

        let members: Vec<(i32, GroupMemberState)> = states
            .iter()
            .enumerate()
            .map(|(i, s)| (i as i32, *s))
            .collect();
        let mut observation = ObservationBuilder::new("mycluster", TEST_NAMESPACE)
            .group(&members)
            .build();

        for step in plan_object_steps(&cluster, &observation) {
            match step {
                Step::Apply(child) => {
                    observation.children.insert(child.key(), child.hash());
                    if let Some(owned) = child.owned_fields() {
                        observation.owned.insert(child.key(), owned);
                    }
                }
                Step::Delete(key) => {
                    observation.children.remove(&key);
                    observation.owned.remove(&key);
                }
                Step::Membership(_) => {}
            }
        }

        let again = plan_object_steps(&cluster, &observation);
        prop_assert!(again.is_empty(), "second pass planned {:?}", again);
    }

    /// Property: at most one join or bootstrap is planned per pass
    #[test]
    fn prop_single_membership_addition(
        instances in 1i32..=9,
        online in 0i32..=9,
        extra in 0i32..=9,
    ) {
        let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, instances);
        let members: Vec<(i32, GroupMemberState)> =
            (0..online).map(|o| (o, GroupMemberState::Online)).collect();
        let mut builder = ObservationBuilder::new("mycluster", TEST_NAMESPACE).group(&members);
        for ordinal in online..online + extra {
            builder = builder.standalone(ordinal, "");
        }
        let observation = builder.build();

        let config = OperatorConfig::default();
        let steps = plan(
            &cluster,
            &PlanInput {
                config: &config,
                observation: &observation,
                version: "8.4.3",
                failed_fields: &[],
            },
        )
        .unwrap();

        let additions = steps
            .iter()
            .filter(|s| matches!(
                s,
                Step::Membership(
                    mysql_operator::controller::topology::TopologyAction::Join(_)
                        | mysql_operator::controller::topology::TopologyAction::Rejoin(_)
                        | mysql_operator::controller::topology::TopologyAction::Bootstrap(_)
                )
            ))
            .count();
        prop_assert!(additions <= 1);
    }
}

// =============================================================================
// Backup lifecycle
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: any event sequence only moves a backup forward
    #[test]
    fn prop_backup_state_never_regresses(events in prop::collection::vec(backup_event(), 0..20)) {
        let mut state = BackupState::Pending;
        for event in events {
            let next = transition(state, event).state();
            prop_assert!(rank(next) >= rank(state), "{} -> {} on {}", state, next, event);
            if state.is_terminal() {
                prop_assert_eq!(next, state);
            }
            state = next;
        }
    }

    /// Property: a disabled schedule never produces a backup
    #[test]
    fn prop_disabled_schedule_never_triggers(
        phase in cluster_phase(),
        name in "[a-z][a-z0-9]{0,10}",
        secs in 0i64..4_000_000_000,
    ) {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule(&name, "dump", false))
            .with_phase(phase)
            .build();
        let now = Utc.timestamp_opt(secs, 0).unwrap();

        let decision = evaluate_trigger(&cluster, &name, now);
        prop_assert!(matches!(decision, TriggerDecision::Skip(_)));
    }

    /// Property: an enabled schedule triggers exactly when the cluster is online
    #[test]
    fn prop_enabled_schedule_follows_phase(phase in cluster_phase()) {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "dump", true))
            .with_phase(phase)
            .build();

        let decision = evaluate_trigger(&cluster, "nightly", Utc::now());
        prop_assert_eq!(matches!(decision, TriggerDecision::Create(_)), phase.is_online());
    }
}

// =============================================================================
// Version gate
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: a rejected request never becomes the effective version
    #[test]
    fn prop_rejected_version_never_effective(
        running in server_version(),
        requested in server_version(),
    ) {
        let config = OperatorConfig::default();
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_version(&requested)
            .running(&running)
            .build();

        let resolution = resolve(&cluster, &config);
        match resolution.rejected {
            Some(rejected) => {
                prop_assert_eq!(&rejected.version, &requested);
                prop_assert_eq!(resolution.effective.as_deref(), Some(running.as_str()));
            }
            None => prop_assert_eq!(resolution.effective.as_deref(), Some(requested.as_str())),
        }
    }

    /// Property: downgrades are always rejected
    #[test]
    fn prop_downgrade_rejected(a in server_version(), b in server_version()) {
        let (va, vb) = (parse_version(&a).unwrap(), parse_version(&b).unwrap());
        prop_assume!(va != vb);
        let (low, high) = if va < vb { (a, b) } else { (b, a) };

        let config = OperatorConfig::default();
        prop_assert!(check(Some(&high), &low, Edition::Community, &config).is_rejected());
    }

    /// Property: the gate is a pure function of its inputs
    #[test]
    fn prop_gate_deterministic(running in server_version(), requested in server_version()) {
        let config = OperatorConfig::default();
        prop_assert_eq!(
            check(Some(&running), &requested, Edition::Enterprise, &config),
            check(Some(&running), &requested, Edition::Enterprise, &config)
        );
    }
}

// =============================================================================
// Validation and phases
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: validation is deterministic and never panics
    #[test]
    fn prop_validation_deterministic(
        instances in -5i32..20,
        routers in -3i32..5,
        name in "[a-z][a-z0-9-]{0,45}",
    ) {
        let cluster = InnoDBClusterBuilder::new(&name, TEST_NAMESPACE)
            .with_instances(instances)
            .with_router_instances(routers)
            .build();
        let first = validate_cluster_spec(&cluster).is_ok();
        let second = validate_cluster_spec(&cluster).is_ok();
        prop_assert_eq!(first, second);
        if !(1..=9).contains(&instances) || routers < 0 {
            prop_assert!(!first);
        }
    }

    /// Property: phase derivation never panics and is deterministic
    #[test]
    fn prop_next_phase_deterministic(current in cluster_phase(), ctx in transition_context()) {
        prop_assert_eq!(next_phase(current, &ctx).phase(), next_phase(current, &ctx).phase());
    }

    /// Property: a rejected spec or fatal condition always wins over membership
    #[test]
    fn prop_failures_take_precedence(mut ctx in transition_context()) {
        ctx.spec_invalid = true;
        let event = determine_event(&ctx);
        prop_assert_eq!(event.target(), ClusterPhase::Invalid);
    }

    /// Property: a GTID set counts every transaction in every interval
    #[test]
    fn prop_gtid_count(intervals in prop::collection::vec((1u64..1000, 0u64..1000), 0..6)) {
        let set = intervals
            .iter()
            .enumerate()
            .map(|(i, (start, len))| format!("uuid-{}:{}-{}", i, start, start + len))
            .collect::<Vec<_>>()
            .join(",");
        let expected: u64 = intervals.iter().map(|(_, len)| len + 1).sum();
        prop_assert_eq!(gtid_transaction_count(&set), expected);
    }
}

// =============================================================================
// Status writes
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: merging the patch into the stored status yields the new
    /// status, and patching again changes nothing
    #[test]
    fn prop_status_patch_converges(old in cluster_status(), new in cluster_status()) {
        let mut stored = serde_json::to_value(&old).unwrap();
        merge_patch(&mut stored, &status_patch(Some(&old), &new).unwrap());
        prop_assert_eq!(&stored, &serde_json::to_value(&new).unwrap());

        let settled: InnoDBClusterStatus = serde_json::from_value(stored.clone()).unwrap();
        prop_assert_eq!(&settled, &new);
        let before = stored.clone();
        merge_patch(&mut stored, &status_patch(Some(&settled), &new).unwrap());
        prop_assert_eq!(stored, before);
    }
}
