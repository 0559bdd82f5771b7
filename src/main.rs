use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tracing::{error, info, warn};

use mysql_operator::health::{HealthState, run_health_server};
use mysql_operator::mysql::SqlxConnector;
use mysql_operator::{
    Context, OperatorConfig, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_backup_controller,
    run_cluster_controller, run_webhook_server,
};

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // install_default() fails when a provider is already installed, which is fine
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
                .add_directive("mysql_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    let config = Arc::new(OperatorConfig::from_env()?);
    info!(
        default_version = %config.default_version,
        min_version = %config.min_supported_version,
        max_version = %config.max_supported_version,
        "Starting mysql-operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    let health_state = Arc::new(HealthState::new());

    // Probes must answer before leadership is acquired
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Admission runs on every replica, leader or not
    let webhook_handle =
        if Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists() {
            info!("TLS certificates found, starting webhook server");
            let webhook_client = client.clone();
            let port = config.webhook_port;
            Some(tokio::spawn(async move {
                if let Err(e) =
                    run_webhook_server(webhook_client, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, port)
                        .await
                {
                    error!("Webhook server error: {}", e);
                }
            }))
        } else {
            info!(
                "TLS certificates not found at {} and {}, webhook server disabled",
                WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH
            );
            None
        };

    let lease_params = || LeaseLockParams {
        holder_id: pod_name.clone(),
        lease_name: config.lease_name.clone(),
        lease_ttl: config.lease_ttl,
    };
    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = %config.lease_name,
        "Initializing leader election"
    );

    let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());
    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(config.lease_renew_interval).await;
    }

    let lease_renewal_handle = {
        let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());
        let interval = config.lease_renew_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match lease_lock.try_acquire_or_renew().await {
                    Ok(LeaseLockResult::Acquired(_)) => {}
                    Ok(_) => {
                        error!("Lost leadership! Shutting down...");
                        // Exit so Kubernetes restarts us and we re-enter election
                        std::process::exit(1);
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let ctx = Arc::new(Context::new(
        client,
        config.clone(),
        Some(health_state.clone()),
        Arc::new(SqlxConnector::new(config.sql_timeout)),
    ));
    health_state.set_ready(true).await;

    let cluster_controller_handle = {
        let ctx = ctx.clone();
        let scope = config.watch_namespace.clone();
        tokio::spawn(async move {
            run_cluster_controller(ctx, scope.as_deref()).await;
        })
    };
    let backup_controller_handle = {
        let scope = config.watch_namespace.clone();
        tokio::spawn(async move {
            run_backup_controller(ctx, scope.as_deref()).await;
        })
    };

    let webhook_future = async {
        match webhook_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Webhook server task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = cluster_controller_handle => {
            if let Err(e) = result {
                error!("Cluster controller task panicked: {}", e);
            }
        }
        result = backup_controller_handle => {
            if let Err(e) = result {
                error!("Backup controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = webhook_future => {}
        // The renewal task only ends by exiting the process or panicking
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
