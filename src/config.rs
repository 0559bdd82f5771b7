//! Operator configuration
//!
//! Built once at startup from `MYSQL_OPERATOR_*` environment variables and
//! handed to every component through the controller [`Context`](crate::Context).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::BackoffConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process wide operator settings
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Server version used when a cluster does not set `spec.version`
    pub default_version: String,
    /// Oldest server version the operator manages
    pub min_supported_version: String,
    /// Newest server version the operator manages
    pub max_supported_version: String,
    /// Versions inside the supported range that must not be deployed
    pub disabled_versions: Vec<String>,
    /// Default registry/repository for server and router images
    pub image_repository: String,
    /// Image with mysqlsh and the operator binaries, used by backup Jobs and triggers
    pub operator_image: String,
    pub image_pull_policy: String,
    /// Service account for backup Jobs and schedule trigger CronJobs
    pub backup_service_account: String,
    /// Image used to remove blob container backups
    pub azure_cli_image: String,
    /// Maximum concurrent reconciliations per controller
    pub worker_concurrency: u16,
    /// Bound for a single SQL round trip
    pub sql_timeout: Duration,
    /// Bound for a single Kubernetes API round trip
    pub api_timeout: Duration,
    /// Requeue interval for a converged resource
    pub requeue_interval: Duration,
    /// Requeue interval while waiting for progress (pods starting, jobs running)
    pub progress_interval: Duration,
    pub backoff: BackoffConfig,
    pub lease_name: String,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
    pub health_port: u16,
    pub webhook_port: u16,
    /// Restrict the controllers to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            default_version: "8.4.3".to_string(),
            min_supported_version: "8.0.27".to_string(),
            max_supported_version: "9.1.0".to_string(),
            disabled_versions: vec!["8.0.29".to_string()],
            image_repository: "container-registry.oracle.com/mysql".to_string(),
            operator_image: "container-registry.oracle.com/mysql/community-operator:9.1.0-2.2.2"
                .to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            backup_service_account: "mysql-operator-backup".to_string(),
            azure_cli_image: "mcr.microsoft.com/azure-cli:2.67.0".to_string(),
            worker_concurrency: 16,
            sql_timeout: Duration::from_secs(10),
            api_timeout: Duration::from_secs(30),
            requeue_interval: Duration::from_secs(60),
            progress_interval: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
            lease_name: "mysql-operator-leader".to_string(),
            lease_ttl: Duration::from_secs(15),
            lease_renew_interval: Duration::from_secs(5),
            health_port: 8080,
            webhook_port: 8443,
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let backoff = BackoffConfig {
            initial_delay: Duration::from_secs(parse_or(
                &lookup,
                "MYSQL_OPERATOR_BACKOFF_INITIAL_SECS",
                defaults.backoff.initial_delay.as_secs(),
            )?),
            max_delay: Duration::from_secs(parse_or(
                &lookup,
                "MYSQL_OPERATOR_BACKOFF_MAX_SECS",
                defaults.backoff.max_delay.as_secs(),
            )?),
            ..defaults.backoff.clone()
        };

        Ok(Self {
            default_version: string_or(
                &lookup,
                "MYSQL_OPERATOR_DEFAULT_VERSION",
                defaults.default_version,
            ),
            min_supported_version: string_or(
                &lookup,
                "MYSQL_OPERATOR_MIN_SUPPORTED_VERSION",
                defaults.min_supported_version,
            ),
            max_supported_version: string_or(
                &lookup,
                "MYSQL_OPERATOR_MAX_SUPPORTED_VERSION",
                defaults.max_supported_version,
            ),
            disabled_versions: match lookup("MYSQL_OPERATOR_DISABLED_VERSIONS") {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect(),
                None => defaults.disabled_versions,
            },
            image_repository: string_or(
                &lookup,
                "MYSQL_OPERATOR_IMAGE_REPOSITORY",
                defaults.image_repository,
            ),
            operator_image: string_or(
                &lookup,
                "MYSQL_OPERATOR_IMAGE",
                defaults.operator_image,
            ),
            image_pull_policy: string_or(
                &lookup,
                "MYSQL_OPERATOR_IMAGE_PULL_POLICY",
                defaults.image_pull_policy,
            ),
            backup_service_account: string_or(
                &lookup,
                "MYSQL_OPERATOR_BACKUP_SERVICE_ACCOUNT",
                defaults.backup_service_account,
            ),
            azure_cli_image: string_or(
                &lookup,
                "MYSQL_OPERATOR_AZURE_CLI_IMAGE",
                defaults.azure_cli_image,
            ),
            worker_concurrency: parse_or(
                &lookup,
                "MYSQL_OPERATOR_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            sql_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MYSQL_OPERATOR_SQL_TIMEOUT_SECS",
                defaults.sql_timeout.as_secs(),
            )?),
            api_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MYSQL_OPERATOR_API_TIMEOUT_SECS",
                defaults.api_timeout.as_secs(),
            )?),
            requeue_interval: Duration::from_secs(parse_or(
                &lookup,
                "MYSQL_OPERATOR_REQUEUE_SECS",
                defaults.requeue_interval.as_secs(),
            )?),
            progress_interval: defaults.progress_interval,
            backoff,
            lease_name: string_or(&lookup, "MYSQL_OPERATOR_LEASE_NAME", defaults.lease_name),
            lease_ttl: defaults.lease_ttl,
            lease_renew_interval: defaults.lease_renew_interval,
            health_port: parse_or(&lookup, "MYSQL_OPERATOR_HEALTH_PORT", defaults.health_port)?,
            webhook_port: parse_or(
                &lookup,
                "MYSQL_OPERATOR_WEBHOOK_PORT",
                defaults.webhook_port,
            )?,
            watch_namespace: lookup("MYSQL_OPERATOR_WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
        })
    }
}

fn string_or<F>(lookup: &F, var: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|v| !v.is_empty()).unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) if !value.is_empty() => {
            value
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    var,
                    value: value.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
