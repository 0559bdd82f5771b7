//! Unit tests for admission policies

use crate::common::*;
use mysql_operator::webhooks::policies::{
    BackupValidationContext, ValidationContext, validate_all, validate_backup_all,
    validate_profile_reference,
};
use serde_json::json;

mod cluster_policy_tests {
    use super::*;

    #[test]
    fn test_create_valid_cluster() {
        let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
        let result = validate_all(&ValidationContext::new(&cluster, None));
        assert!(result.allowed);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_create_invalid_cluster() {
        let cluster = create_test_cluster("mycluster", TEST_NAMESPACE, 10);
        let result = validate_all(&ValidationContext::new(&cluster, None));
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("InvalidSpec"));
        assert!(result.message.unwrap().contains("10"));
    }

    #[test]
    fn test_scaling_is_allowed() {
        let old = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
        let new = create_test_cluster("mycluster", TEST_NAMESPACE, 5);
        assert!(validate_all(&ValidationContext::new(&new, Some(&old))).allowed);
    }

    #[test]
    fn test_version_change_is_left_to_the_gate() {
        let old = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_version("8.4.3")
            .build();
        let new = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_version("8.0.30")
            .build();
        assert!(validate_all(&ValidationContext::new(&new, Some(&old))).allowed);
    }

    #[test]
    fn test_datadir_change_denied() {
        let old = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_spec_field("datadirVolumeClaimTemplate", json!({"size": "10Gi"}))
            .build();
        let new = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_spec_field("datadirVolumeClaimTemplate", json!({"size": "20Gi"}))
            .build();
        let result = validate_all(&ValidationContext::new(&new, Some(&old)));
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("DatadirImmutable"));
    }

    #[test]
    fn test_edition_change_denied() {
        let old = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
        let new = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_spec_field("edition", json!("enterprise"))
            .build();
        let result = validate_all(&ValidationContext::new(&new, Some(&old)));
        assert_eq!(result.reason.as_deref(), Some("EditionImmutable"));
    }

    #[test]
    fn test_spec_error_reported_before_immutability() {
        let old = create_test_cluster("mycluster", TEST_NAMESPACE, 3);
        let new = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_instances(0)
            .with_spec_field("edition", json!("enterprise"))
            .build();
        let result = validate_all(&ValidationContext::new(&new, Some(&old)));
        assert_eq!(result.reason.as_deref(), Some("InvalidSpec"));
    }
}

mod backup_policy_tests {
    use super::*;

    #[test]
    fn test_create_backup() {
        let backup = create_test_backup("b1", "mycluster", "dump");
        assert!(validate_backup_all(&BackupValidationContext::new(&backup, None)).allowed);
    }

    #[test]
    fn test_backup_with_two_profiles_denied() {
        let mut backup = create_test_backup("b1", "mycluster", "dump");
        backup.spec.backup_profile = Some(volume_profile("inline", "backups"));
        let result = validate_backup_all(&BackupValidationContext::new(&backup, None));
        assert_eq!(result.reason.as_deref(), Some("InvalidSpec"));
    }

    #[test]
    fn test_cluster_name_immutable() {
        let old = create_test_backup("b1", "mycluster", "dump");
        let new = create_test_backup("b1", "other", "dump");
        let result = validate_backup_all(&BackupValidationContext::new(&new, Some(&old)));
        assert_eq!(result.reason.as_deref(), Some("ClusterNameImmutable"));
    }

    #[test]
    fn test_profile_immutable() {
        let old = create_test_backup("b1", "mycluster", "dump");
        let new = create_test_backup("b1", "mycluster", "s3");
        let result = validate_backup_all(&BackupValidationContext::new(&new, Some(&old)));
        assert_eq!(result.reason.as_deref(), Some("ProfileImmutable"));
    }

    #[test]
    fn test_delete_flag_may_change() {
        let old = create_test_backup("b1", "mycluster", "dump");
        let mut new = create_test_backup("b1", "mycluster", "dump");
        new.spec.delete_backup_data = true;
        assert!(validate_backup_all(&BackupValidationContext::new(&new, Some(&old))).allowed);
    }

    #[test]
    fn test_profile_reference() {
        let cluster = InnoDBClusterBuilder::new("mycluster", TEST_NAMESPACE)
            .with_profile(volume_profile("dump", "backups"))
            .build();
        let known = create_test_backup("b1", "mycluster", "dump");
        let unknown = create_test_backup("b2", "mycluster", "s3");

        assert!(validate_profile_reference(&known, Some(&cluster)).allowed);
        let result = validate_profile_reference(&unknown, Some(&cluster));
        assert_eq!(result.reason.as_deref(), Some("ProfileNotFound"));
        // Without the cluster the reconciler decides
        assert!(validate_profile_reference(&unknown, None).allowed);
    }
}
