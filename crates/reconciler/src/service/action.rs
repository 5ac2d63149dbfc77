//! Pluggable reconciliation stages.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chart::{ChartProvider, Component};
use crate::error::Result;
use crate::kubernetes::{KubeClient, ManifestEngine, ResourceInterceptor};
use crate::model::Task;

/// Everything a stage needs to work on one task.
pub struct ActionContext {
    pub kube_client: Arc<dyn KubeClient>,
    pub engine: ManifestEngine,
    pub chart_provider: Arc<dyn ChartProvider>,
    pub cancel: CancellationToken,
    pub task: Arc<Task>,
    /// Interceptors a component adds behind the standard pipeline
    pub interceptors: Vec<Arc<dyn ResourceInterceptor>>,
}

impl ActionContext {
    /// The chart component described by the task.
    pub fn component(&self) -> Component {
        Component::new(&self.task.component, &self.task.version)
            .with_profile(&self.task.profile)
            .with_namespace(&self.task.namespace)
            .with_url(&self.task.repository.url)
            .with_configuration(self.task.configuration_map())
    }
}

/// One stage of a reconciliation: pre-action, main action or post-action.
#[async_trait]
pub trait Action: Send + Sync {
    /// Used in logs and stage errors.
    fn name(&self) -> &str {
        "action"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<()>;
}
