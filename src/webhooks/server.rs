//! Webhook HTTP server handlers
//!
//! Serves the ValidatingAdmissionWebhook endpoints for InnoDBCluster and
//! MySQLBackup resources.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::policies::{
    BackupValidationContext, ValidationContext, ValidationResult, validate_all,
    validate_backup_all, validate_profile_reference,
};
use crate::crd::{InnoDBCluster, MySQLBackup};

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Shared state for webhook handlers
pub(crate) struct WebhookState {
    pub client: Client,
}

pub(crate) fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-cluster", post(validate_innodb_cluster))
        .route("/validate-backup", post(validate_mysql_backup))
        .with_state(state)
}

/// Decoded admission request: `(uid, operation, namespace, object, old object)`
type Decoded<T> = (String, String, Option<String>, T, Option<T>);

/// Pull the typed objects out of a review, or the response to send back
#[allow(clippy::result_large_err)]
fn decode<T: DeserializeOwned>(
    review: AdmissionReview,
    kind: &str,
) -> Result<Decoded<T>, (StatusCode, AdmissionReviewResponse)> {
    let Some(request) = review.request else {
        error!("Admission review missing request");
        return Err((
            StatusCode::BAD_REQUEST,
            create_response("", false, "Missing request in AdmissionReview", None),
        ));
    };
    let uid = request.uid;
    info!(
        uid = %uid,
        kind,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    let object = match request.object {
        Some(obj) => serde_json::from_value::<T>(obj).map_err(|e| {
            error!(error = %e, "Failed to parse {}", kind);
            (
                StatusCode::OK,
                create_response(&uid, false, &format!("Failed to parse object: {}", e), None),
            )
        })?,
        None if request.operation == "DELETE" => {
            return Err((StatusCode::OK, create_response(&uid, true, "", None)));
        }
        None => {
            return Err((
                StatusCode::OK,
                create_response(&uid, false, "Missing object in request", None),
            ));
        }
    };

    let old_object = request.old_object.and_then(|obj| {
        serde_json::from_value::<T>(obj)
            .map_err(|e| warn!(error = %e, "Failed to parse old {}, treating as CREATE", kind))
            .ok()
    });

    Ok((uid, request.operation, request.namespace, object, old_object))
}

fn respond(uid: &str, result: ValidationResult) -> (StatusCode, Json<AdmissionReviewResponse>) {
    if result.allowed {
        info!(uid = %uid, "Admission request allowed");
        return (StatusCode::OK, Json(create_response(uid, true, "", None)));
    }
    let reason = result
        .reason
        .unwrap_or_else(|| "ValidationFailed".to_string());
    let message = result
        .message
        .unwrap_or_else(|| "Validation failed".to_string());
    warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
    (
        StatusCode::OK,
        Json(create_response(uid, false, &message, Some(&reason))),
    )
}

pub(crate) async fn validate_innodb_cluster(
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let (uid, _, _, cluster, old_cluster) = match decode::<InnoDBCluster>(review, "InnoDBCluster") {
        Ok(decoded) => decoded,
        Err((code, response)) => return (code, Json(response)),
    };
    let ctx = ValidationContext::new(&cluster, old_cluster.as_ref());
    respond(&uid, validate_all(&ctx))
}

pub(crate) async fn validate_mysql_backup(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let (uid, operation, namespace, backup, old_backup) =
        match decode::<MySQLBackup>(review, "MySQLBackup") {
            Ok(decoded) => decoded,
            Err((code, response)) => return (code, Json(response)),
        };

    let ctx = BackupValidationContext::new(&backup, old_backup.as_ref());
    let result = validate_backup_all(&ctx);
    if !result.allowed || operation != "CREATE" {
        return respond(&uid, result);
    }

    let cluster = match namespace.as_deref() {
        Some(ns) => get_cluster(&state.client, ns, &backup.spec.cluster_name).await,
        None => None,
    };
    respond(&uid, validate_profile_reference(&backup, cluster.as_ref()))
}

/// Fetch the backup's cluster. Failures allow the request; the backup
/// reconciler fails a backup whose cluster or profile is missing.
async fn get_cluster(client: &Client, namespace: &str, name: &str) -> Option<InnoDBCluster> {
    let clusters: Api<InnoDBCluster> = Api::namespaced(client.clone(), namespace);
    match clusters.get_opt(name).await {
        Ok(cluster) => cluster,
        Err(e) => {
            warn!(namespace = %namespace, name = %name, error = %e, "Failed to get cluster for validation");
            None
        }
    }
}

fn create_response(
    uid: &str,
    allowed: bool,
    message: &str,
    reason: Option<&str>,
) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code: 403,
                    message: message.to_string(),
                    reason: reason.map(String::from),
                })
            },
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";

/// Run the webhook server with TLS on `0.0.0.0:<port>`
pub async fn run_webhook_server(
    client: Client,
    cert_path: &str,
    key_path: &str,
    port: u16,
) -> Result<(), WebhookError> {
    let state = Arc::new(WebhookState { client });
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
