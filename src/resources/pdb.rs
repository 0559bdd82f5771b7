//! PodDisruptionBudget for server instances
//!
//! Voluntary disruptions may take down at most one instance at a time so a
//! drain never costs the group its quorum.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::InnoDBCluster;
use crate::resources::common::{
    COMPONENT_DATABASE, owner_reference, pdb_name, selector_labels, standard_labels,
    with_spec_hash,
};

/// Generate the `<cluster>-pdb` budget
///
/// - 1 instance: min_available = 0 (a drain takes the cluster down)
/// - 2+ instances: max_unavailable = 1
pub fn generate_pdb(cluster: &InnoDBCluster) -> PodDisruptionBudget {
    let cluster_name = cluster.name_any();

    let (min_available, max_unavailable) = if cluster.spec.instances > 1 {
        (None, Some(IntOrString::Int(1)))
    } else {
        (Some(IntOrString::Int(0)), None)
    };

    with_spec_hash(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name, COMPONENT_DATABASE)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available,
            max_unavailable,
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&cluster_name, COMPONENT_DATABASE)),
                ..Default::default()
            }),
            // Use IfHealthyBudget to allow eviction if pod is unhealthy
            unhealthy_pod_eviction_policy: Some("IfHealthyBudget".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}
