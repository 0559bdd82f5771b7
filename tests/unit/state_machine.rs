//! Additional unit tests for cluster phase transitions

use mysql_operator::controller::state_machine::{
    ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult, determine_event,
    next_phase,
};
use mysql_operator::crd::ClusterPhase;

fn observed(desired: i32, online: i32, view: i32) -> TransitionContext {
    TransitionContext {
        desired,
        pods: desired,
        online,
        view_size: view,
        has_primary: online > 0,
        group_exists: view > 0,
        previously_online: view > 0,
        ..Default::default()
    }
}

mod transition_context_tests {
    use super::*;

    #[test]
    fn test_quorum_needs_strict_majority() {
        assert!(observed(3, 2, 3).has_quorum());
        assert!(!observed(4, 2, 4).has_quorum());
        assert!(!observed(3, 0, 0).has_quorum());
    }

    #[test]
    fn test_all_members_online_requires_primary() {
        let mut ctx = observed(3, 3, 3);
        assert!(ctx.all_members_online());
        ctx.has_primary = false;
        assert!(!ctx.all_members_online());
    }
}

mod determine_event_tests {
    use super::*;

    #[test]
    fn test_fresh_cluster_without_pods() {
        let ctx = TransitionContext {
            desired: 3,
            ..Default::default()
        };
        assert_eq!(determine_event(&ctx), ClusterEvent::NoPods);
    }

    #[test]
    fn test_pods_without_group_are_starting() {
        let ctx = TransitionContext {
            desired: 3,
            pods: 3,
            ..Default::default()
        };
        assert_eq!(determine_event(&ctx), ClusterEvent::MembersStarting);
    }

    #[test]
    fn test_lost_group_is_uncertain() {
        let ctx = TransitionContext {
            desired: 3,
            pods: 3,
            previously_online: true,
            ..Default::default()
        };
        assert_eq!(determine_event(&ctx), ClusterEvent::QuorumUnknown);
    }

    #[test]
    fn test_minority_view_is_uncertain() {
        assert_eq!(determine_event(&observed(3, 1, 3)), ClusterEvent::QuorumUnknown);
    }

    #[test]
    fn test_degraded_majority() {
        assert_eq!(determine_event(&observed(3, 2, 3)), ClusterEvent::QuorumDegraded);
    }

    #[test]
    fn test_all_online() {
        assert_eq!(determine_event(&observed(3, 3, 3)), ClusterEvent::AllMembersOnline);
    }

    #[test]
    fn test_scale_up_in_progress_is_partial() {
        // Three members online, five desired
        assert_eq!(determine_event(&observed(5, 3, 3)), ClusterEvent::QuorumDegraded);
    }

    #[test]
    fn test_invalid_spec_wins_over_everything() {
        let ctx = TransitionContext {
            spec_invalid: true,
            permanent_failure: true,
            ..observed(3, 3, 3)
        };
        assert_eq!(determine_event(&ctx), ClusterEvent::SpecRejected);
    }

    #[test]
    fn test_permanent_failure() {
        let ctx = TransitionContext {
            permanent_failure: true,
            ..observed(3, 3, 3)
        };
        assert_eq!(determine_event(&ctx), ClusterEvent::PermanentFailure);
    }
}

mod next_phase_tests {
    use super::*;

    #[test]
    fn test_initial_bootstrap_path() {
        let mut phase = ClusterPhase::Pending;
        let steps = [
            (
                TransitionContext {
                    desired: 3,
                    pods: 3,
                    ..Default::default()
                },
                ClusterPhase::Initializing,
            ),
            (observed(3, 1, 1), ClusterPhase::OnlinePartial),
            (observed(3, 3, 3), ClusterPhase::Online),
        ];
        for (ctx, expected) in steps {
            phase = next_phase(phase, &ctx).phase();
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn test_member_loss_and_recovery() {
        let phase = next_phase(ClusterPhase::Online, &observed(3, 2, 3)).phase();
        assert_eq!(phase, ClusterPhase::OnlinePartial);
        let phase = next_phase(phase, &observed(3, 3, 3)).phase();
        assert_eq!(phase, ClusterPhase::Online);
    }

    #[test]
    fn test_outage_and_reboot() {
        let outage = TransitionContext {
            desired: 3,
            pods: 3,
            previously_online: true,
            ..Default::default()
        };
        let phase = next_phase(ClusterPhase::Online, &outage).phase();
        assert_eq!(phase, ClusterPhase::OnlineUncertain);
        let phase = next_phase(phase, &observed(3, 3, 3)).phase();
        assert_eq!(phase, ClusterPhase::Online);
    }

    #[test]
    fn test_invalid_cluster_recovers_after_fix() {
        let invalid = TransitionContext {
            spec_invalid: true,
            ..Default::default()
        };
        let phase = next_phase(ClusterPhase::Pending, &invalid).phase();
        assert_eq!(phase, ClusterPhase::Invalid);
        let phase = next_phase(
            phase,
            &TransitionContext {
                desired: 3,
                ..Default::default()
            },
        )
        .phase();
        assert_eq!(phase, ClusterPhase::Pending);
    }

    #[test]
    fn test_staying_online_is_not_a_transition() {
        let result = next_phase(ClusterPhase::Online, &observed(3, 3, 3));
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
        assert_eq!(result.phase(), ClusterPhase::Online);
    }
}

mod guard_tests {
    use super::*;

    #[test]
    fn test_online_guard_blocks_without_primary() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext {
            has_primary: false,
            ..observed(3, 3, 3)
        };
        let result = sm.transition(
            &ClusterPhase::OnlinePartial,
            ClusterEvent::AllMembersOnline,
            &ctx,
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
        assert_eq!(result.phase(), ClusterPhase::OnlinePartial);
    }

    #[test]
    fn test_degraded_guard_blocks_without_quorum() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterPhase::Online,
            ClusterEvent::QuorumDegraded,
            &observed(3, 1, 3),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_valid_events_exclude_self_loops() {
        let sm = ClusterStateMachine::new();
        let events = sm.valid_events(&ClusterPhase::Online);
        assert_eq!(events.len(), 6);
        assert!(!events.contains(&&ClusterEvent::AllMembersOnline));
        assert!(sm.can_transition(&ClusterPhase::Online, &ClusterEvent::QuorumUnknown));
    }
}
