//! Reconciliation service: admission, retrying execution and the default install action.

pub mod action;
pub mod install;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod status;
pub mod workerpool;

use std::sync::Arc;

use crate::chart::WorkspaceFactory;
use crate::kubernetes::ClientFactory;

pub use action::{Action, ActionContext};
pub use install::Install;
pub use reconciler::ComponentReconciler;
pub use registry::{ComponentRegistry, BASE_COMPONENT};
pub use runner::Runner;
pub use workerpool::{PoolConfig, WorkerPool};

/// Process-wide collaborators shared by every task.
pub struct RuntimeContext {
    pub registry: ComponentRegistry,
    pub client_factory: Arc<dyn ClientFactory>,
    pub workspace: Arc<WorkspaceFactory>,
}
