//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::crd::{BackupState, ClusterPhase};

/// Labels for per-object metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub controller: String,
    pub namespace: String,
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ReconcileLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("controller", self.controller.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for cluster phase metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl prometheus_client::encoding::EncodeLabelSet for PhaseLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for finished backups
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    // Fleet metrics
    /// Clusters by phase
    pub clusters_total: Family<PhaseLabels, Gauge>,
    /// Desired instances per cluster
    pub cluster_instances_desired: Family<ReconcileLabels, Gauge>,
    /// ONLINE members per cluster
    pub cluster_instances_online: Family<ReconcileLabels, Gauge>,
    /// Backups that reached a final state
    pub backups_total: Family<OutcomeLabels, Counter>,

    /// Last known phase per cluster, used to derive `clusters_total`
    phases: Mutex<HashMap<(String, String), ClusterPhase>>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "mysql_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "mysql_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "mysql_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let clusters_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "mysql_operator_clusters_total",
            "Number of InnoDB clusters by phase",
            clusters_total.clone(),
        );

        let cluster_instances_desired = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "mysql_operator_cluster_instances_desired",
            "Desired number of server instances for each cluster",
            cluster_instances_desired.clone(),
        );

        let cluster_instances_online = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "mysql_operator_cluster_instances_online",
            "Number of ONLINE group members for each cluster",
            cluster_instances_online.clone(),
        );

        let backups_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "mysql_operator_backups",
            "Backups that reached a final state",
            backups_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters_total,
            cluster_instances_desired,
            cluster_instances_online,
            backups_total,
            phases: Mutex::new(HashMap::new()),
            registry,
        }
    }

    fn labels(controller: &str, namespace: &str, name: &str) -> ReconcileLabels {
        ReconcileLabels {
            controller: controller.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, controller: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = Self::labels(controller, namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, controller: &str, namespace: &str, name: &str) {
        let labels = Self::labels(controller, namespace, name);
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record a cluster's phase and member counts
    pub fn observe_cluster(
        &self,
        namespace: &str,
        name: &str,
        phase: ClusterPhase,
        desired: i64,
        online: i64,
    ) {
        let labels = Self::labels("cluster", namespace, name);
        self.cluster_instances_desired.get_or_create(&labels).set(desired);
        self.cluster_instances_online.get_or_create(&labels).set(online);

        if let Ok(mut phases) = self.phases.lock() {
            phases.insert((namespace.to_string(), name.to_string()), phase);
            self.publish_phases(&phases);
        }
    }

    /// Drop a deleted cluster from the fleet metrics
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        let labels = Self::labels("cluster", namespace, name);
        self.cluster_instances_desired.remove(&labels);
        self.cluster_instances_online.remove(&labels);

        if let Ok(mut phases) = self.phases.lock() {
            phases.remove(&(namespace.to_string(), name.to_string()));
            self.publish_phases(&phases);
        }
    }

    fn publish_phases(&self, phases: &HashMap<(String, String), ClusterPhase>) {
        for phase in [
            ClusterPhase::Pending,
            ClusterPhase::Initializing,
            ClusterPhase::Online,
            ClusterPhase::OnlinePartial,
            ClusterPhase::OnlineUncertain,
            ClusterPhase::Error,
            ClusterPhase::Invalid,
        ] {
            let count = phases.values().filter(|p| **p == phase).count();
            self.clusters_total
                .get_or_create(&PhaseLabels {
                    phase: phase.to_string(),
                })
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    /// Count a backup that reached `Completed` or `Failed`
    pub fn record_backup(&self, outcome: BackupState) {
        self.backups_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with valid metrics).
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (connected to K8s API)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controllers have started.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
