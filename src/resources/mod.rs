//! Generators for the Kubernetes objects owned by a cluster or a backup
//!
//! Every generator is a pure function of the custom resource and the operator
//! configuration; applying the result is the controllers' job.

pub mod backup_job;
pub mod common;
pub mod cronjob;
pub mod mycnf;
pub mod pdb;
pub mod router;
pub mod secret;
pub mod service;
pub mod statefulset;

pub use common::{
    API_VERSION, CLUSTER_LABEL, FIELD_MANAGER, SCHEDULE_LABEL, SPEC_HASH_ANNOTATION,
    owner_reference, standard_labels,
};
