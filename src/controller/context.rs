use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::PostParams;
use kube::core::ObjectMeta;
use kube::{Api, Client};
use tracing::{debug, warn};

use super::events::EventRecord;
use crate::config::OperatorConfig;
use crate::health::HealthState;
use crate::mysql::SqlConnector;
use crate::resources::FIELD_MANAGER;

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Process wide settings
    pub config: Arc<OperatorConfig>,
    /// Health state for metrics recording (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Opens SQL sessions to server instances
    pub sql: Arc<dyn SqlConnector>,
    /// Consecutive failures per object key, consulted by the error policies
    retries: Arc<Mutex<HashMap<String, u32>>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
        sql: Arc<dyn SqlConnector>,
    ) -> Self {
        Self {
            client,
            config,
            health_state,
            sql,
            retries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bump and return the failure count for an object
    pub fn next_retry(&self, key: &str) -> u32 {
        match self.retries.lock() {
            Ok(mut retries) => {
                let count = retries.entry(key.to_string()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
            Err(_) => 1,
        }
    }

    /// Forget the failure count after a successful pass
    pub fn reset_retries(&self, key: &str) {
        if let Ok(mut retries) = self.retries.lock() {
            retries.remove(key);
        }
    }

    /// Post an event on the referenced object
    ///
    /// Event delivery is best effort: failures are logged, never returned.
    pub async fn publish_event(&self, object: &ObjectReference, record: &EventRecord) {
        let namespace = object.namespace.clone().unwrap_or_else(|| "default".to_string());
        let now = Time(jiff::Timestamp::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!(
                    "{}.",
                    object.name.as_deref().unwrap_or("mysql-operator")
                )),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            involved_object: object.clone(),
            reason: Some(record.reason.clone()),
            message: Some(record.message.clone()),
            type_: Some(record.severity.to_string()),
            source: Some(EventSource {
                component: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            }),
            reporting_component: Some(FIELD_MANAGER.to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };

        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), &event).await {
            Ok(_) => debug!(
                reason = %record.reason,
                object = ?object.name,
                "Posted {} event: {}",
                record.severity,
                record.message
            ),
            Err(e) => warn!(
                reason = %record.reason,
                object = ?object.name,
                "Failed to post event: {}",
                e
            ),
        }
    }
}
