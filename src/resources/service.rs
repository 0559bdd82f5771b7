//! Service generation for InnoDB clusters
//!
//! - `<cluster>-instances`: headless, gives each server pod a stable DNS name
//!   used for `report_host`, group seeds and router bootstrap
//! - `<cluster>`: the client facing service in front of the routers

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec as K8sServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::InnoDBCluster;
use crate::mysql::MYSQL_PORT;
use crate::resources::common::{
    COMPONENT_DATABASE, COMPONENT_ROUTER, GR_PORT, MYSQLX_PORT, headless_service_name,
    merged_labels, owner_reference, selector_labels, standard_labels, with_spec_hash,
};

/// Router listener ports
pub const ROUTER_RW_PORT: i32 = 6446;
pub const ROUTER_RO_PORT: i32 = 6447;
pub const ROUTER_X_RW_PORT: i32 = 6448;
pub const ROUTER_X_RO_PORT: i32 = 6449;
pub const ROUTER_RW_SPLIT_PORT: i32 = 6450;
pub const ROUTER_HTTP_PORT: i32 = 8443;

fn tcp_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Named router ports, shared with the router Deployment
pub fn router_ports() -> Vec<(&'static str, i32)> {
    vec![
        ("mysql-rw", ROUTER_RW_PORT),
        ("mysql-ro", ROUTER_RO_PORT),
        ("mysqlx-rw", ROUTER_X_RW_PORT),
        ("mysqlx-ro", ROUTER_X_RO_PORT),
        ("mysql-rw-split", ROUTER_RW_SPLIT_PORT),
        ("router-rest", ROUTER_HTTP_PORT),
    ]
}

/// Generate the headless service for the server pods
///
/// Publishes not-ready addresses: instances must resolve each other while
/// they are still recovering, before they report ready.
pub fn generate_headless_service(cluster: &InnoDBCluster) -> Service {
    let cluster_name = cluster.name_any();
    let mysql_port = i32::from(MYSQL_PORT);

    with_spec_hash(Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name, COMPONENT_DATABASE)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(&cluster_name, COMPONENT_DATABASE)),
            ports: Some(vec![
                tcp_port("mysql", mysql_port, mysql_port),
                tcp_port("mysqlx", MYSQLX_PORT, MYSQLX_PORT),
                tcp_port("gr-xcom", GR_PORT, GR_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Generate the client facing `<cluster>` service
///
/// Ports 3306 and 33060 forward to the router port chosen by
/// `spec.service.defaultPort`; the router's own ports are exposed as well.
pub fn generate_cluster_service(cluster: &InnoDBCluster) -> Service {
    let cluster_name = cluster.name_any();
    let service = &cluster.spec.service;

    let mut ports = vec![
        tcp_port("mysql", i32::from(MYSQL_PORT), service.default_port.classic_port()),
        tcp_port("mysqlx", MYSQLX_PORT, service.default_port.x_port()),
    ];
    ports.extend(
        router_ports()
            .into_iter()
            .map(|(name, port)| tcp_port(name, port, port)),
    );

    with_spec_hash(Service {
        metadata: ObjectMeta {
            name: Some(cluster_name.clone()),
            namespace: cluster.namespace(),
            labels: Some(merged_labels(&cluster_name, COMPONENT_ROUTER, &service.labels)),
            annotations: (!service.annotations.is_empty()).then(|| service.annotations.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            type_: Some(service.type_.to_string()),
            selector: Some(selector_labels(&cluster_name, COMPONENT_ROUTER)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}
