//! Finite state machine for MySQLBackup executions
//!
//! ```text
//! Pending → Running → Completed
//!    │         │
//!    └─────────┴────→ Failed
//! ```
//!
//! Transitions only move forward. `Completed` and `Failed` have no outgoing
//! edges, which is what keeps a finished backup's status frozen.

use std::fmt;

use k8s_openapi::api::batch::v1::Job;

use crate::crd::BackupState;

/// Events that move a backup along
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupEvent {
    /// The backup Job has an active pod
    JobStarted,
    JobSucceeded,
    JobFailed,
    /// The backup must not run: its cluster or schedule is gone, or the
    /// schedule was disabled
    Rejected,
}

impl fmt::Display for BackupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupEvent::JobStarted => write!(f, "JobStarted"),
            BackupEvent::JobSucceeded => write!(f, "JobSucceeded"),
            BackupEvent::JobFailed => write!(f, "JobFailed"),
            BackupEvent::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Result of attempting a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupTransition {
    Moved { from: BackupState, to: BackupState },
    /// No edge for this event; the state stays
    Ignored { current: BackupState },
}

impl BackupTransition {
    pub fn state(&self) -> BackupState {
        match self {
            BackupTransition::Moved { to, .. } => *to,
            BackupTransition::Ignored { current } => *current,
        }
    }

    pub fn moved(&self) -> bool {
        matches!(self, BackupTransition::Moved { .. })
    }
}

const TRANSITIONS: [(BackupState, BackupEvent, BackupState); 7] = [
    (BackupState::Pending, BackupEvent::JobStarted, BackupState::Running),
    // A short Job can finish between two passes
    (BackupState::Pending, BackupEvent::JobSucceeded, BackupState::Completed),
    (BackupState::Pending, BackupEvent::JobFailed, BackupState::Failed),
    (BackupState::Pending, BackupEvent::Rejected, BackupState::Failed),
    (BackupState::Running, BackupEvent::JobSucceeded, BackupState::Completed),
    (BackupState::Running, BackupEvent::JobFailed, BackupState::Failed),
    (BackupState::Running, BackupEvent::Rejected, BackupState::Failed),
];

pub fn transition(from: BackupState, event: BackupEvent) -> BackupTransition {
    TRANSITIONS
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| BackupTransition::Moved { from, to: *to })
        .unwrap_or(BackupTransition::Ignored { current: from })
}

/// Events valid from a state
pub fn valid_events(state: BackupState) -> Vec<BackupEvent> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == state)
        .map(|(_, e, _)| *e)
        .collect()
}

/// What the backup Job reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobProgress {
    /// Created but no pod has started yet
    Waiting,
    Running,
    Succeeded,
    Failed(String),
}

impl JobProgress {
    pub fn event(&self) -> Option<BackupEvent> {
        match self {
            JobProgress::Waiting => None,
            JobProgress::Running => Some(BackupEvent::JobStarted),
            JobProgress::Succeeded => Some(BackupEvent::JobSucceeded),
            JobProgress::Failed(_) => Some(BackupEvent::JobFailed),
        }
    }
}

/// Reduce a Job's status to its progress
pub fn job_progress(job: &Job) -> JobProgress {
    let Some(status) = job.status.as_ref() else {
        return JobProgress::Waiting;
    };
    let condition = |type_: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == type_ && c.status == "True")
    };

    if status.succeeded.unwrap_or(0) > 0 || condition("Complete").is_some() {
        return JobProgress::Succeeded;
    }
    if let Some(failed) = condition("Failed") {
        return JobProgress::Failed(
            failed
                .message
                .clone()
                .or_else(|| failed.reason.clone())
                .unwrap_or_else(|| "backup job failed".to_string()),
        );
    }
    if status.active.unwrap_or(0) > 0 {
        JobProgress::Running
    } else {
        JobProgress::Waiting
    }
}
