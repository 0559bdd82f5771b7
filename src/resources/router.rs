//! MySQL Router Deployment
//!
//! Routers bootstrap against the cluster metadata at start-up and pick up
//! routing options live, so only replicas, image, pod metadata and bootstrap
//! options end up in the pod template.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use super::common::{
    COMPONENT_ROUTER, headless_service_name, image_pull_policy, merged_labels, owner_reference,
    router_image, router_name, selector_labels, standard_labels, with_spec_hash,
};
use super::secret::{ROOT_PASSWORD_KEY, ROOT_USER_KEY};
use super::service::{ROUTER_RW_PORT, router_ports};
use crate::config::OperatorConfig;
use crate::crd::InnoDBCluster;
use crate::mysql::MYSQL_PORT;

/// Always passed to `mysqlrouter --bootstrap`
const DEFAULT_BOOTSTRAP_OPTIONS: &[&str] = &["--conf-use-gr-notifications"];

/// Bootstrap arguments: defaults followed by the user's options
pub fn bootstrap_options(cluster: &InnoDBCluster) -> String {
    DEFAULT_BOOTSTRAP_OPTIONS
        .iter()
        .map(|s| s.to_string())
        .chain(cluster.spec.router.bootstrap_options.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(key != ROOT_PASSWORD_KEY),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the `<cluster>-router` Deployment
///
/// Replica count, pod labels, pod annotations and bootstrap options are all
/// carried by this one object, so a single apply moves them together.
pub fn generate_router_deployment(
    cluster: &InnoDBCluster,
    config: &OperatorConfig,
    server_version: &str,
) -> Deployment {
    let cluster_name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let router = &cluster.spec.router;

    let env_vars = vec![
        env(
            "MYSQL_HOST",
            format!(
                "{}.{}.svc.cluster.local",
                headless_service_name(&cluster_name),
                namespace
            ),
        ),
        env("MYSQL_PORT", MYSQL_PORT.to_string()),
        secret_env("MYSQL_USER", &cluster.spec.secret_name, ROOT_USER_KEY),
        secret_env("MYSQL_PASSWORD", &cluster.spec.secret_name, ROOT_PASSWORD_KEY),
        env(
            "MYSQL_INNODB_CLUSTER_MEMBERS",
            cluster.spec.instances.to_string(),
        ),
        env("MYSQL_ROUTER_BOOTSTRAP_EXTRA_OPTIONS", bootstrap_options(cluster)),
    ];

    let ports = router_ports()
        .into_iter()
        .map(|(name, port)| ContainerPort {
            container_port: port,
            name: Some(name.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: "router".to_string(),
        image: Some(router_image(cluster, config, server_version)),
        image_pull_policy: Some(image_pull_policy(cluster, config)),
        env: Some(env_vars),
        ports: Some(ports),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(ROUTER_RW_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    with_spec_hash(Deployment {
        metadata: ObjectMeta {
            name: Some(router_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name, COMPONENT_ROUTER)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(router.instances),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&cluster_name, COMPONENT_ROUTER)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(merged_labels(
                        &cluster_name,
                        COMPONENT_ROUTER,
                        &router.pod_labels,
                    )),
                    annotations: (!router.pod_annotations.is_empty())
                        .then(|| router.pod_annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
