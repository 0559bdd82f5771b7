pub mod apply;
pub mod backup_orchestrator;
pub mod backup_reconciler;
pub mod backup_state_machine;
pub mod context;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod handlers;
pub mod observe;
pub mod planner;
pub mod reconciler;
pub mod router_sync;
pub mod state_machine;
pub mod status;
pub mod topology;
pub mod validation;
pub mod version_gate;

pub use backup_reconciler::{BACKUP_FINALIZER, backup_error_policy, reconcile_backup};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use finalizer::CLUSTER_FINALIZER;
pub use reconciler::{error_policy, reconcile};
pub use status::ConditionBuilder;
