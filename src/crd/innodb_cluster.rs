use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// InnoDBCluster is the Schema for the innodbclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "mysql.oracle.com",
    version = "v2",
    kind = "InnoDBCluster",
    plural = "innodbclusters",
    shortname = "ic",
    namespaced,
    status = "InnoDBClusterStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Online", "type":"integer", "jsonPath":".status.onlineInstances"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.instances"}"#,
    printcolumn = r#"{"name":"Routers", "type":"integer", "jsonPath":".spec.router.instances"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InnoDBClusterSpec {
    /// Name of a Secret with the keys `rootUser`, `rootHost` and `rootPassword`
    pub secret_name: String,

    /// Use self-signed certificates generated by the server
    #[serde(default)]
    pub tls_use_self_signed: bool,

    /// Secret holding `tls.crt` and `tls.key` for server and router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Secret holding `ca.pem`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_secret_name: Option<String>,

    /// Number of MySQL instances (1-9)
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// MySQL server version. Defaults to the operator's default version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub edition: Edition,

    /// Registry and repository the server and router images are pulled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// First server_id; instance N gets `baseServerId + N`
    #[serde(default = "default_base_server_id")]
    pub base_server_id: u32,

    /// Extra options appended to the generated my.cnf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mycnf: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datadir_volume_claim_template: Option<DatadirSpec>,

    /// Pod spec fragment merged over the generated server pod spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_spec: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub router: RouterSpec,

    #[serde(default)]
    pub service: ServiceSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_profiles: Vec<BackupProfile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_schedules: Vec<BackupSchedule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<KeyringSpec>,
}

fn default_instances() -> i32 {
    1
}

fn default_base_server_id() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

pub(crate) fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    #[default]
    Community,
    Enterprise,
}

impl std::fmt::Display for Edition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edition::Community => write!(f, "community"),
            Edition::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Persistent storage for the server data directory
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatadirSpec {
    /// Size of the volume (e.g., "2Gi")
    pub size: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// MySQL Router deployment configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Router version, defaults to the server version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Extra `mysqlrouter --bootstrap` arguments; changing them restarts the routers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootstrap_options: Vec<String>,

    /// Routing options stored in the cluster metadata and picked up live by the routers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub routing_options: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
}

impl Default for RouterSpec {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            version: None,
            bootstrap_options: Vec::new(),
            routing_options: BTreeMap::new(),
            pod_labels: BTreeMap::new(),
            pod_annotations: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    LoadBalancer,
    NodePort,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
            ServiceType::NodePort => write!(f, "NodePort"),
        }
    }
}

/// Router port the front-end service's default ports forward to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum DefaultPort {
    #[default]
    #[serde(rename = "mysql-rw")]
    MysqlRw,
    #[serde(rename = "mysql-ro")]
    MysqlRo,
    #[serde(rename = "mysql-rw-split")]
    MysqlRwSplit,
}

impl DefaultPort {
    /// Router classic protocol port behind service port 3306
    pub fn classic_port(&self) -> i32 {
        match self {
            DefaultPort::MysqlRw => 6446,
            DefaultPort::MysqlRo => 6447,
            DefaultPort::MysqlRwSplit => 6450,
        }
    }

    /// Router X protocol port behind service port 33060
    pub fn x_port(&self) -> i32 {
        match self {
            DefaultPort::MysqlRo => 6449,
            DefaultPort::MysqlRw | DefaultPort::MysqlRwSplit => 6448,
        }
    }
}

/// Front-end service configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, rename = "type")]
    pub type_: ServiceType,

    #[serde(default)]
    pub default_port: DefaultPort,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A named backup configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupProfile {
    /// Profile name. Optional for inline profiles.
    #[serde(default)]
    pub name: String,

    pub dump_instance: DumpInstanceSpec,
}

/// MySQL Shell `util.dumpInstance` configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DumpInstanceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub dump_options: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_schemas: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tables: Vec<String>,

    pub storage: BackupStorage,
}

/// Backup destination. Exactly one target must be set.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Storage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureStorage>,
}

impl BackupStorage {
    /// Number of storage targets configured
    pub fn target_count(&self) -> usize {
        [
            self.persistent_volume_claim.is_some(),
            self.s3.is_some(),
            self.azure.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcStorage {
    pub claim_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Storage {
    pub bucket_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Secret with `accessKeyId`, `secretAccessKey` and optional `region`
    pub config: String,

    /// Endpoint override for S3 compatible stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorage {
    pub container_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Secret with `connectionString`
    pub config: String,
}

/// Cron triggered backup bound to a profile
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSchedule {
    pub name: String,

    /// Five field cron expression
    pub schedule: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delete stored backup data when the generated backup object is deleted
    #[serde(default)]
    pub delete_backup_data: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_profile_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_profile: Option<BackupProfile>,
}

/// Keyring component configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyringSpec {
    pub file: KeyringFileSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyringFileSpec {
    /// Path of the keyring data file inside the keyring volume
    pub file_name: String,

    #[serde(default)]
    pub read_only: bool,

    /// Secret mounted as the keyring volume
    pub secret_name: String,
}

/// Status of the InnoDBCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InnoDBClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,

    #[serde(default)]
    pub online_instances: i32,

    #[serde(default)]
    pub instances: i32,

    /// Pod name of the current primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberStatus>,

    /// Last version the cluster was accepted to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_version: Option<RejectedVersion>,

    /// Spec field path -> fingerprint of the value last handled successfully
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub handled_fields: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_handlers: Vec<FailedHandler>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_started_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A version change the gate refused, remembered so the event is posted once
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RejectedVersion {
    pub version: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// A handler that failed permanently for a given field value
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedHandler {
    pub handler: String,
    pub field: String,
    pub fingerprint: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

/// Observed state of one cluster member
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub ordinal: i32,
    pub pod: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    pub state: MemberState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Primary,
    Secondary,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    Online,
    Recovering,
    Unreachable,
    Error,
    /// Pod absent
    Missing,
    /// Reachable but not part of the group
    Offline,
}

impl std::fmt::Display for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberState::Online => write!(f, "ONLINE"),
            MemberState::Recovering => write!(f, "RECOVERING"),
            MemberState::Unreachable => write!(f, "UNREACHABLE"),
            MemberState::Error => write!(f, "ERROR"),
            MemberState::Missing => write!(f, "MISSING"),
            MemberState::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Cluster lifecycle phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterPhase {
    /// Accepted, no pods yet
    #[default]
    Pending,
    /// Pods starting, group bootstrapping
    Initializing,
    /// All desired members online and a primary elected
    Online,
    /// Below the desired member count with quorum intact
    OnlinePartial,
    /// Quorum cannot be determined
    OnlineUncertain,
    /// Unrecoverable condition such as a bad secret
    Error,
    /// Spec rejected before any resource was created
    Invalid,
}

impl ClusterPhase {
    /// Phases in which the cluster accepts client traffic
    pub fn is_online(&self) -> bool {
        matches!(self, ClusterPhase::Online | ClusterPhase::OnlinePartial)
    }
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "PENDING"),
            ClusterPhase::Initializing => write!(f, "INITIALIZING"),
            ClusterPhase::Online => write!(f, "ONLINE"),
            ClusterPhase::OnlinePartial => write!(f, "ONLINE_PARTIAL"),
            ClusterPhase::OnlineUncertain => write!(f, "ONLINE_UNCERTAIN"),
            ClusterPhase::Error => write!(f, "ERROR"),
            ClusterPhase::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False, or Unknown
    pub status: String,

    pub reason: String,

    pub message: String,

    pub last_transition_time: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl InnoDBCluster {
    /// Current phase, `Pending` when no status has been written yet
    pub fn phase(&self) -> ClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Look up a named backup profile
    pub fn profile(&self, name: &str) -> Option<&BackupProfile> {
        self.spec.backup_profiles.iter().find(|p| p.name == name)
    }

    /// Look up a named backup schedule
    pub fn schedule(&self, name: &str) -> Option<&BackupSchedule> {
        self.spec.backup_schedules.iter().find(|s| s.name == name)
    }
}
