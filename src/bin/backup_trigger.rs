//! Entry point of the schedule trigger CronJobs
//!
//! Reads the cluster and schedule from the environment, decides whether the
//! schedule may fire and creates the MySQLBackup object. The backup
//! controller takes it from there.

use chrono::Utc;
use kube::{Api, Client};
use tracing::info;

use mysql_operator::OperatorConfig;
use mysql_operator::controller::backup_orchestrator::{
    TriggerDecision, create_backup, evaluate_trigger,
};
use mysql_operator::crd::InnoDBCluster;

fn required_env(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{} must be set", name).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mysql_operator=info".parse()?),
        )
        .init();

    let cluster_name = required_env("CLUSTER_NAME")?;
    let namespace = required_env("CLUSTER_NAMESPACE")?;
    let schedule_name = required_env("SCHEDULE_NAME")?;
    let config = OperatorConfig::from_env()?;

    let client = Client::try_default().await?;
    let clusters: Api<InnoDBCluster> = Api::namespaced(client.clone(), &namespace);
    let Some(cluster) = clusters.get_opt(&cluster_name).await? else {
        info!(cluster = %cluster_name, "Cluster is gone, nothing to back up");
        return Ok(());
    };

    match evaluate_trigger(&cluster, &schedule_name, Utc::now()) {
        TriggerDecision::Skip(reason) => {
            info!(schedule = %schedule_name, "Skipping scheduled backup: {}", reason);
        }
        TriggerDecision::Create(backup) => {
            let name = backup.metadata.name.clone().unwrap_or_default();
            if create_backup(client, &backup, &config).await? {
                info!(backup = %name, schedule = %schedule_name, "Created scheduled backup");
            } else {
                info!(backup = %name, "Backup already exists");
            }
        }
    }
    Ok(())
}
