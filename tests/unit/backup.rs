//! Unit tests for the backup lifecycle: state machine, Job progress,
//! schedule triggers and status bookkeeping

use crate::common::*;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use kube::ResourceExt;
use mysql_operator::controller::backup_orchestrator::{
    TriggerDecision, backup_method, backup_output, evaluate_trigger, resolve_profile,
    schedule_block, schedule_of,
};
use mysql_operator::controller::backup_reconciler::{
    apply_report, dump_source, elapsed_time, snapshot,
};
use mysql_operator::controller::backup_state_machine::{
    BackupEvent, BackupTransition, JobProgress, job_progress, transition, valid_events,
};
use mysql_operator::crd::{
    BackupMethod, BackupState, ClusterPhase, InnoDBCluster, MemberRole, MemberState, MemberStatus,
    MySQLBackupStatus,
};
use mysql_operator::resources::SCHEDULE_LABEL;
use mysql_operator::resources::backup_job::TerminationReport;

fn online_cluster() -> InnoDBCluster {
    InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
        .with_profile(volume_profile("dump", "backups"))
        .with_profile(s3_profile("s3", "my-bucket"))
        .with_schedule(schedule("nightly", "dump", true))
        .with_schedule(schedule("paused", "dump", false))
        .with_phase(ClusterPhase::Online)
        .build()
}

mod state_machine_tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let running = transition(BackupState::Pending, BackupEvent::JobStarted);
        assert_eq!(running.state(), BackupState::Running);
        let done = transition(running.state(), BackupEvent::JobSucceeded);
        assert_eq!(
            done,
            BackupTransition::Moved {
                from: BackupState::Running,
                to: BackupState::Completed
            }
        );
    }

    #[test]
    fn test_short_job_skips_running() {
        let done = transition(BackupState::Pending, BackupEvent::JobSucceeded);
        assert_eq!(done.state(), BackupState::Completed);
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        for state in [BackupState::Completed, BackupState::Failed] {
            assert!(valid_events(state).is_empty());
            for event in [
                BackupEvent::JobStarted,
                BackupEvent::JobSucceeded,
                BackupEvent::JobFailed,
                BackupEvent::Rejected,
            ] {
                let result = transition(state, event);
                assert!(!result.moved());
                assert_eq!(result.state(), state);
            }
        }
    }

    #[test]
    fn test_running_never_goes_back_to_pending() {
        assert!(!transition(BackupState::Running, BackupEvent::JobStarted).moved());
    }

    #[test]
    fn test_rejection_fails_the_backup() {
        assert_eq!(
            transition(BackupState::Pending, BackupEvent::Rejected).state(),
            BackupState::Failed
        );
    }
}

mod job_progress_tests {
    use super::*;

    fn job(status: Option<JobStatus>) -> Job {
        Job {
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_job_is_waiting() {
        assert_eq!(job_progress(&job(None)), JobProgress::Waiting);
        assert_eq!(job_progress(&job(Some(JobStatus::default()))), JobProgress::Waiting);
        assert_eq!(JobProgress::Waiting.event(), None);
    }

    #[test]
    fn test_active_job_is_running() {
        let progress = job_progress(&job(Some(JobStatus {
            active: Some(1),
            ..Default::default()
        })));
        assert_eq!(progress, JobProgress::Running);
        assert_eq!(progress.event(), Some(BackupEvent::JobStarted));
    }

    #[test]
    fn test_succeeded_job() {
        let progress = job_progress(&job(Some(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        })));
        assert_eq!(progress, JobProgress::Succeeded);
    }

    #[test]
    fn test_failed_job_carries_message() {
        let progress = job_progress(&job(Some(JobStatus {
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some("BackoffLimitExceeded".to_string()),
                message: Some("Job has reached the specified backoff limit".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        })));
        assert_eq!(
            progress,
            JobProgress::Failed("Job has reached the specified backoff limit".to_string())
        );
        assert_eq!(progress.event(), Some(BackupEvent::JobFailed));
    }
}

mod profile_tests {
    use super::*;

    #[test]
    fn test_resolve_named_profile() {
        let profile = resolve_profile(&online_cluster(), Some("s3"), None).unwrap();
        assert_eq!(profile.name, "s3");
        assert_eq!(
            backup_method(&profile.dump_instance.storage),
            BackupMethod::ObjectStorage
        );
    }

    #[test]
    fn test_resolve_inline_profile() {
        let inline = volume_profile("inline", "other");
        let profile = resolve_profile(&online_cluster(), None, Some(&inline)).unwrap();
        assert_eq!(profile, inline);
        assert_eq!(
            backup_method(&profile.dump_instance.storage),
            BackupMethod::Volume
        );
    }

    #[test]
    fn test_unknown_profile() {
        let err = resolve_profile(&online_cluster(), Some("nope"), None).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_inline_profile_without_target() {
        let mut inline = volume_profile("inline", "other");
        inline.dump_instance.storage.persistent_volume_claim = None;
        assert!(resolve_profile(&online_cluster(), None, Some(&inline)).is_err());
    }

    #[test]
    fn test_backup_output_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut backup = create_test_backup("b1", "mycluster", "dump");
        assert_eq!(backup_output(&backup, now), "b1-20240102-030405");
        backup.spec.add_timestamp_to_backup_directory = false;
        assert_eq!(backup_output(&backup, now), "b1");
    }
}

mod trigger_tests {
    use super::*;

    #[test]
    fn test_enabled_schedule_creates_backup() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 30, 0).unwrap();
        let TriggerDecision::Create(backup) = evaluate_trigger(&online_cluster(), "nightly", now)
        else {
            panic!("expected a backup");
        };
        assert_eq!(backup.name_any(), "mycluster-nightly20240102033000");
        assert_eq!(backup.namespace().as_deref(), Some(TEST_NAMESPACE));
        assert_eq!(backup.spec.cluster_name, "mycluster");
        assert_eq!(backup.spec.backup_profile_name.as_deref(), Some("dump"));
        assert_eq!(schedule_of(&backup), Some("nightly"));
        assert_eq!(backup.labels()[SCHEDULE_LABEL], "nightly");

        let owner = &backup.owner_references()[0];
        assert_eq!(owner.kind, "InnoDBCluster");
        assert_eq!(owner.controller, Some(false));
    }

    #[test]
    fn test_disabled_schedule_is_skipped() {
        let decision = evaluate_trigger(&online_cluster(), "paused", Utc::now());
        assert!(matches!(decision, TriggerDecision::Skip(reason) if reason.contains("disabled")));
    }

    #[test]
    fn test_missing_schedule_is_skipped() {
        let decision = evaluate_trigger(&online_cluster(), "weekly", Utc::now());
        assert!(matches!(decision, TriggerDecision::Skip(_)));
    }

    #[test]
    fn test_offline_cluster_is_skipped() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "dump", true))
            .with_phase(ClusterPhase::OnlineUncertain)
            .build();
        let decision = evaluate_trigger(&cluster, "nightly", Utc::now());
        assert!(matches!(decision, TriggerDecision::Skip(_)));
    }

    #[test]
    fn test_schedule_block() {
        let cluster = online_cluster();
        let now = Utc::now();
        let TriggerDecision::Create(backup) = evaluate_trigger(&cluster, "nightly", now) else {
            panic!("expected a backup");
        };
        assert_eq!(schedule_block(&cluster, &backup), None);

        // The schedule is disabled after the backup was created
        let disabled = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "dump", false))
            .build();
        assert!(schedule_block(&disabled, &backup).is_some());

        let removed = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .build();
        assert!(schedule_block(&removed, &backup).is_some());

        // Manual backups are never blocked by schedules
        let manual = create_test_backup("b1", "mycluster", "dump");
        assert_eq!(schedule_block(&removed, &manual), None);
    }
}

mod status_tests {
    use super::*;

    #[test]
    fn test_snapshot_records_profile_and_output() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let backup = create_test_backup("b1", "mycluster", "s3");
        let mut status = MySQLBackupStatus::default();
        snapshot(&mut status, &backup, s3_profile("s3", "my-bucket"), now);

        assert_eq!(status.status, BackupState::Pending);
        assert_eq!(status.method, Some(BackupMethod::ObjectStorage));
        assert_eq!(status.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(status.container, None);
        assert_eq!(status.output.as_deref(), Some("b1-20240102-030405"));
        assert_eq!(status.job_name.as_deref(), Some("b1-job"));
        assert_eq!(status.start_time, Some(now.to_rfc3339()));
        assert_eq!(status.profile.unwrap().name, "s3");
    }

    #[test]
    fn test_report_fills_in_sizes() {
        let mut status = MySQLBackupStatus {
            output: Some("b1-20240102-030405".to_string()),
            ..Default::default()
        };
        apply_report(
            &mut status,
            TerminationReport {
                output: Some(String::new()),
                size: Some("1.2G".to_string()),
                space_available: Some("40G".to_string()),
                source: Some("root@mycluster-0:3306".to_string()),
                message: None,
            },
        );
        assert_eq!(status.output.as_deref(), Some("b1-20240102-030405"));
        assert_eq!(status.size.as_deref(), Some("1.2G"));
        assert_eq!(status.space_available.as_deref(), Some("40G"));
        assert_eq!(status.source.as_deref(), Some("root@mycluster-0:3306"));
    }

    #[test]
    fn test_elapsed_time_format() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 4, 1, 5).unwrap();
        assert_eq!(
            elapsed_time(Some(&start.to_rfc3339()), now).as_deref(),
            Some("01:01:05")
        );
        assert_eq!(elapsed_time(None, now), None);
        assert_eq!(elapsed_time(Some("yesterday"), now), None);
    }

    #[test]
    fn test_dump_source_prefers_primary() {
        let mut status = online_cluster().status.unwrap();
        status.members = vec![
            MemberStatus {
                ordinal: 0,
                pod: "mycluster-0".to_string(),
                role: None,
                state: MemberState::Recovering,
                version: None,
            },
            MemberStatus {
                ordinal: 1,
                pod: "mycluster-1".to_string(),
                role: Some(MemberRole::Secondary),
                state: MemberState::Online,
                version: None,
            },
            MemberStatus {
                ordinal: 2,
                pod: "mycluster-2".to_string(),
                role: Some(MemberRole::Primary),
                state: MemberState::Online,
                version: None,
            },
        ];
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_status(status.clone())
            .build();
        assert_eq!(
            dump_source(&cluster),
            Some(member_host("mycluster", TEST_NAMESPACE, 2))
        );

        status.members.truncate(2);
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_status(status)
            .build();
        assert_eq!(
            dump_source(&cluster),
            Some(member_host("mycluster", TEST_NAMESPACE, 1))
        );
    }

    #[test]
    fn test_dump_source_without_online_members() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_phase(ClusterPhase::OnlineUncertain)
            .build();
        assert_eq!(dump_source(&cluster), None);
    }
}
