//! Unit tests for spec validation

use crate::common::*;
use mysql_operator::controller::validation::{
    MAX_CLUSTER_NAME_LEN, MAX_INSTANCES, validate_backup_config, validate_backup_spec,
    validate_cluster_spec, validate_cron, validate_schedule,
};
use mysql_operator::crd::MySQLBackupSpec;
use serde_json::json;

mod cluster_tests {
    use super::*;

    #[test]
    fn test_default_cluster_is_valid() {
        let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
        assert!(validate_cluster_spec(&cluster).is_ok());
    }

    #[test]
    fn test_instance_bounds() {
        for instances in [1, MAX_INSTANCES] {
            let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, instances);
            assert!(validate_cluster_spec(&cluster).is_ok(), "{} instances", instances);
        }
        for instances in [0, MAX_INSTANCES + 1] {
            let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, instances);
            assert!(validate_cluster_spec(&cluster).is_err(), "{} instances", instances);
        }
    }

    #[test]
    fn test_name_length() {
        let ok = "a".repeat(MAX_CLUSTER_NAME_LEN);
        let long = "a".repeat(MAX_CLUSTER_NAME_LEN + 1);
        assert!(validate_cluster_spec(&create_test_cluster(&ok, TEST_NAMESPACE, 3)).is_ok());
        assert!(validate_cluster_spec(&create_test_cluster(&long, TEST_NAMESPACE, 3)).is_err());
    }

    #[test]
    fn test_negative_router_instances() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_router_instances(-1)
            .build();
        assert!(validate_cluster_spec(&cluster).is_err());
    }

    #[test]
    fn test_zero_routers_allowed() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_router_instances(0)
            .build();
        assert!(validate_cluster_spec(&cluster).is_ok());
    }

    #[test]
    fn test_bad_version_string() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_version("latest")
            .build();
        let err = validate_cluster_spec(&cluster).unwrap_err();
        assert!(err.to_string().contains("latest"));
    }

    #[test]
    fn test_datadir_size() {
        let good = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_spec_field("datadirVolumeClaimTemplate", json!({"size": "20Gi"}))
            .build();
        assert!(validate_cluster_spec(&good).is_ok());

        let bad = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_spec_field("datadirVolumeClaimTemplate", json!({"size": "lots"}))
            .build();
        assert!(validate_cluster_spec(&bad).is_err());
    }

    #[test]
    fn test_duplicate_profiles_rejected() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "a"))
            .with_profile(s3_profile("dump", "b"))
            .build();
        assert!(validate_cluster_spec(&cluster).is_ok());
        assert!(validate_backup_config(&cluster).is_err());
    }

    #[test]
    fn test_profile_needs_one_target() {
        let mut profile = volume_profile("dump", "backups");
        profile.dump_instance.storage.s3 = s3_profile("x", "bucket").dump_instance.storage.s3;
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(profile)
            .build();
        assert!(validate_backup_config(&cluster).is_err());
    }

    #[test]
    fn test_schedule_with_unknown_profile() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "missing", true))
            .build();
        assert!(validate_cluster_spec(&cluster).is_ok());
        let err = validate_backup_config(&cluster).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_schedule_with_known_profile() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "dump", true))
            .build();
        assert!(validate_backup_config(&cluster).is_ok());
        assert!(validate_schedule(&cluster, &cluster.spec.backup_schedules[0]).is_ok());
    }

    #[test]
    fn test_duplicate_schedules_rejected() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .with_schedule(schedule("nightly", "dump", true))
            .with_schedule(schedule("nightly", "dump", false))
            .build();
        assert!(validate_backup_config(&cluster).is_err());
    }
}

mod cron_tests {
    use super::*;

    #[test]
    fn test_valid_expressions() {
        for expr in [
            "*/30 * * * *",
            "0 3 * * 0",
            "15 1-5 1,15 * 1-5",
            "0 0 1 1/2 7",
            "@daily",
            "@hourly",
        ] {
            assert!(validate_cron(expr).is_ok(), "{}", expr);
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "* * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "*/0 * * * *",
            "5-1 * * * *",
            "@sometimes",
        ] {
            assert!(validate_cron(expr).is_err(), "{:?}", expr);
        }
    }
}

mod backup_spec_tests {
    use super::*;

    fn spec(cluster: &str, name: Option<&str>, inline: bool) -> MySQLBackupSpec {
        MySQLBackupSpec {
            cluster_name: cluster.to_string(),
            backup_profile_name: name.map(String::from),
            backup_profile: inline.then(|| volume_profile("inline", "backups")),
            delete_backup_data: false,
            add_timestamp_to_backup_directory: true,
        }
    }

    #[test]
    fn test_profile_name_or_inline() {
        assert!(validate_backup_spec(&spec("mycluster", Some("dump"), false)).is_ok());
        assert!(validate_backup_spec(&spec("mycluster", None, true)).is_ok());
    }

    #[test]
    fn test_both_or_neither_rejected() {
        assert!(validate_backup_spec(&spec("mycluster", Some("dump"), true)).is_err());
        assert!(validate_backup_spec(&spec("mycluster", None, false)).is_err());
    }

    #[test]
    fn test_cluster_name_required() {
        assert!(validate_backup_spec(&spec("  ", Some("dump"), false)).is_err());
    }
}
