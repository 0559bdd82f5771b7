//! Formal finite state machine for InnoDBCluster lifecycle management
//!
//! The phase is a projection of what the reconciler observes: every pass
//! derives an event from the observation and runs it through the transition
//! table. Nothing here depends on the previously stored phase beyond picking
//! the transition, so the phase can be rebuilt from scratch after a restart.

use std::fmt;

use crate::crd::ClusterPhase;

/// Events that trigger state transitions in the cluster lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// No server pod exists yet
    NoPods,
    /// Pods exist but no group has formed
    MembersStarting,
    /// Every desired member is ONLINE and a primary is elected
    AllMembersOnline,
    /// Quorum holds with fewer ONLINE members than desired
    QuorumDegraded,
    /// No member can vouch for a majority
    QuorumUnknown,
    /// A condition that needs a spec change, such as a bad secret
    PermanentFailure,
    /// The spec was refused before anything was created
    SpecRejected,
}

impl ClusterEvent {
    /// Phase this event leads to
    pub fn target(&self) -> ClusterPhase {
        match self {
            ClusterEvent::NoPods => ClusterPhase::Pending,
            ClusterEvent::MembersStarting => ClusterPhase::Initializing,
            ClusterEvent::AllMembersOnline => ClusterPhase::Online,
            ClusterEvent::QuorumDegraded => ClusterPhase::OnlinePartial,
            ClusterEvent::QuorumUnknown => ClusterPhase::OnlineUncertain,
            ClusterEvent::PermanentFailure => ClusterPhase::Error,
            ClusterEvent::SpecRejected => ClusterPhase::Invalid,
        }
    }

    const ALL: [ClusterEvent; 7] = [
        ClusterEvent::NoPods,
        ClusterEvent::MembersStarting,
        ClusterEvent::AllMembersOnline,
        ClusterEvent::QuorumDegraded,
        ClusterEvent::QuorumUnknown,
        ClusterEvent::PermanentFailure,
        ClusterEvent::SpecRejected,
    ];
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::NoPods => write!(f, "NoPods"),
            ClusterEvent::MembersStarting => write!(f, "MembersStarting"),
            ClusterEvent::AllMembersOnline => write!(f, "AllMembersOnline"),
            ClusterEvent::QuorumDegraded => write!(f, "QuorumDegraded"),
            ClusterEvent::QuorumUnknown => write!(f, "QuorumUnknown"),
            ClusterEvent::PermanentFailure => write!(f, "PermanentFailure"),
            ClusterEvent::SpecRejected => write!(f, "SpecRejected"),
        }
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Desired number of instances
    pub desired: i32,
    /// Server pods that exist
    pub pods: i32,
    /// ONLINE members in the authoritative view
    pub online: i32,
    /// Members in the authoritative view, whatever their state
    pub view_size: i32,
    /// The view names a primary
    pub has_primary: bool,
    /// Some reachable member reports a group
    pub group_exists: bool,
    /// Some instance has executed transactions, so a group existed before
    pub previously_online: bool,
    /// Spec rejected by validation or the version gate
    pub spec_invalid: bool,
    /// Bad secret, image pull failure or a permanently failed handler
    pub permanent_failure: bool,
}

impl TransitionContext {
    /// Majority of the view is ONLINE
    pub fn has_quorum(&self) -> bool {
        self.view_size > 0 && self.online * 2 > self.view_size
    }

    pub fn all_members_online(&self) -> bool {
        self.online >= self.desired && self.has_primary
    }
}

/// A state transition definition with optional guard
#[derive(Debug)]
pub struct Transition {
    pub from: ClusterPhase,
    pub to: ClusterPhase,
    pub event: ClusterEvent,
    pub description: String,
}

impl Transition {
    fn new(from: ClusterPhase, to: ClusterPhase, event: ClusterEvent, description: String) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: String,
    },
    /// No transition for this event from the current state; the phase stays
    InvalidTransition {
        current: ClusterPhase,
        event: ClusterEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Phase after applying this result
    pub fn phase(&self) -> ClusterPhase {
        match self {
            TransitionResult::Success { to, .. } => *to,
            TransitionResult::InvalidTransition { current, .. } => *current,
            TransitionResult::GuardFailed { from, .. } => *from,
        }
    }
}

const ALL_PHASES: [ClusterPhase; 7] = [
    ClusterPhase::Pending,
    ClusterPhase::Initializing,
    ClusterPhase::Online,
    ClusterPhase::OnlinePartial,
    ClusterPhase::OnlineUncertain,
    ClusterPhase::Error,
    ClusterPhase::Invalid,
];

/// Formal state machine for InnoDBCluster lifecycle
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    /// Build the transition table
    ///
    /// Every phase can reach every other phase; which one is taken is decided
    /// by [`determine_event`] and the guards. Deletion is not a phase and is
    /// handled before the state machine runs.
    pub fn new() -> Self {
        let mut transitions = Vec::new();
        for from in ALL_PHASES {
            for event in ClusterEvent::ALL {
                let to = event.target();
                if to != from {
                    transitions.push(Transition::new(
                        from,
                        to,
                        event,
                        format!("{} on {}", to, event),
                    ));
                }
            }
        }
        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &ClusterPhase,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description.clone(),
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &ClusterPhase, event: &ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &ClusterPhase) -> Vec<&ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            ClusterEvent::AllMembersOnline if !ctx.all_members_online() => Some(format!(
                "Not all members online: {}/{} (primary: {})",
                ctx.online, ctx.desired, ctx.has_primary
            )),
            ClusterEvent::QuorumDegraded if !ctx.has_quorum() || ctx.online == 0 => Some(format!(
                "No quorum: {}/{} members online",
                ctx.online, ctx.view_size
            )),
            _ => None,
        }
    }
}

/// Determine the event the current observation amounts to
pub fn determine_event(ctx: &TransitionContext) -> ClusterEvent {
    if ctx.spec_invalid {
        return ClusterEvent::SpecRejected;
    }
    if ctx.permanent_failure {
        return ClusterEvent::PermanentFailure;
    }
    if ctx.pods == 0 {
        return ClusterEvent::NoPods;
    }
    if !ctx.group_exists {
        // A group that existed before and now has no reachable member is a
        // complete outage, not a fresh start
        return if ctx.previously_online {
            ClusterEvent::QuorumUnknown
        } else {
            ClusterEvent::MembersStarting
        };
    }
    if !ctx.has_quorum() {
        return ClusterEvent::QuorumUnknown;
    }
    if ctx.all_members_online() {
        ClusterEvent::AllMembersOnline
    } else {
        ClusterEvent::QuorumDegraded
    }
}

/// Phase for an observation, starting from the stored phase
pub fn next_phase(current: ClusterPhase, ctx: &TransitionContext) -> TransitionResult {
    ClusterStateMachine::new().transition(&current, determine_event(ctx), ctx)
}
