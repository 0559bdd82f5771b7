//! Member status projection from observed pods

use crate::common::*;
use mysql_operator::crd::{MemberRole, MemberState};
use mysql_operator::mysql::GroupMemberState::{Online, Recovering};

#[test]
fn test_healthy_group() {
    let observation = ObservationBuilder::new("mycluster", TEST_NAMESPACE)
        .group(&[(0, Online), (1, Online), (2, Online)])
        .build();
    let view = observation.membership();
    assert_eq!(view.online(), 3);
    assert_eq!(view.primary(), Some(0));

    let members = observation.member_statuses(3);
    assert_eq!(members.len(), 3);
    assert!(members.iter().all(|m| m.state == MemberState::Online));
    assert_eq!(members[0].role, Some(MemberRole::Primary));
    assert_eq!(members[1].role, Some(MemberRole::Secondary));
    assert_eq!(members[2].pod, "mycluster-2");
}

#[test]
fn test_missing_and_unreachable_members() {
    let observation = ObservationBuilder::new("mycluster", TEST_NAMESPACE)
        .group(&[(0, Online), (1, Recovering)])
        .unreachable(2)
        .build();

    let states: Vec<MemberState> = observation
        .member_statuses(4)
        .into_iter()
        .map(|m| m.state)
        .collect();
    assert_eq!(
        states,
        vec![
            MemberState::Online,
            MemberState::Recovering,
            MemberState::Unreachable,
            MemberState::Missing,
        ]
    );
}

#[test]
fn test_pods_outside_group_are_offline() {
    let observation = ObservationBuilder::new("mycluster", TEST_NAMESPACE)
        .standalone(0, "")
        .standalone(1, "")
        .build();

    assert!(!observation.membership().exists());
    assert!(
        observation
            .member_statuses(2)
            .iter()
            .all(|m| m.state == MemberState::Offline && m.role.is_none())
    );
}

#[test]
fn test_waiting_pod_reason_surfaces() {
    let observation = ObservationBuilder::new("mycluster", TEST_NAMESPACE)
        .waiting(0, "ImagePullBackOff")
        .build();
    assert!(observation.fatal_pod_condition().is_some());
}
