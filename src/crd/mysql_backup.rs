use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::BackupProfile;

/// MySQLBackup requests a single backup of an InnoDBCluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "mysql.oracle.com",
    version = "v2",
    kind = "MySQLBackup",
    plural = "mysqlbackups",
    shortname = "mbk",
    namespaced,
    status = "MySQLBackupStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Output", "type":"string", "jsonPath":".status.output"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLBackupSpec {
    pub cluster_name: String,

    /// Name of a profile in the cluster's `backupProfiles`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_profile_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_profile: Option<BackupProfile>,

    /// Remove the stored backup when this object is deleted
    #[serde(default)]
    pub delete_backup_data: bool,

    #[serde(default = "default_add_timestamp")]
    pub add_timestamp_to_backup_directory: bool,
}

fn default_add_timestamp() -> bool {
    true
}

/// Status of a MySQLBackup. Frozen once `Completed` or `Failed`.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySQLBackupStatus {
    #[serde(default)]
    pub status: BackupState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Wall clock duration, e.g. "00:01:05"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<BackupMethod>,

    /// Backup directory name or object prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// `user@host:port` the dump was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_available: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Profile captured when the backup was accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<BackupProfile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// Schedule that generated this backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum BackupState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupState::Completed | BackupState::Failed)
    }
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupState::Pending => write!(f, "Pending"),
            BackupState::Running => write!(f, "Running"),
            BackupState::Completed => write!(f, "Completed"),
            BackupState::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum BackupMethod {
    #[serde(rename = "volume")]
    Volume,
    #[serde(rename = "object-storage")]
    ObjectStorage,
    #[serde(rename = "blob-storage")]
    BlobStorage,
}

impl std::fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupMethod::Volume => write!(f, "volume"),
            BackupMethod::ObjectStorage => write!(f, "object-storage"),
            BackupMethod::BlobStorage => write!(f, "blob-storage"),
        }
    }
}

impl MySQLBackup {
    pub fn state(&self) -> BackupState {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }
}
