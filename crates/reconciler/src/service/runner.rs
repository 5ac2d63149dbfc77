//! Retrying execution of one task with heartbeat reporting.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::action::ActionContext;
use super::reconciler::ComponentReconciler;
use super::{status, RuntimeContext};
use crate::callback::CallbackHandler;
use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatSender, CONTEXT_CLOSED};
use crate::kubernetes::ManifestEngine;
use crate::model::{CallbackMessage, Status, Task};

/// Runs the stages of a component reconciler for one task.
pub struct Runner {
    reconciler: Arc<ComponentReconciler>,
    runtime: Arc<RuntimeContext>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        reconciler: Arc<ComponentReconciler>,
        runtime: Arc<RuntimeContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            runtime,
            cancel,
        }
    }

    /// Reconcile `task` with retries, bounded by the reconciler's timeout.
    ///
    /// A cancelled run returns [`Error::Cancelled`] without a final heartbeat. A task
    /// that starts after its context was closed reports `failed` once and stops.
    #[instrument(
        skip_all,
        fields(
            component = %task.component,
            correlation_id = %task.correlation_id,
            operation = %task.operation,
        )
    )]
    pub async fn run(&self, task: Arc<Task>, callback: Arc<dyn CallbackHandler>) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Task dequeued after its context was closed");
            let closed = CallbackMessage {
                status: Status::Failed,
                error: CONTEXT_CLOSED.to_string(),
                retry_id: Uuid::new_v4().to_string(),
            };
            if let Err(err) = callback.callback(&closed).await {
                warn!(error = %err, "Failed to report closed context");
            }
            return Err(Error::Cancelled("context closed before the task started".to_string()));
        }

        let heartbeat = HeartbeatSender::new(
            callback.clone(),
            self.reconciler.heartbeat_config(),
            self.cancel.clone(),
        )?;
        let started = Instant::now();
        let timeout = self.reconciler.timeout();

        let outcome = tokio::time::timeout(timeout, self.retry(&task, &heartbeat))
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(timeout.as_secs())));

        let result = match outcome {
            Ok(()) => {
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Reconciliation finished successfully"
                );
                heartbeat.success().await
            }
            Err(err) if err.is_cancelled() || self.cancel.is_cancelled() => {
                info!(error = %err, "Reconciliation stopped because its context was closed");
                return Err(err);
            }
            Err(err) => {
                error!(error = %err, "Reconciliation failed");
                match heartbeat.error(&err).await {
                    Ok(()) => Err(err),
                    Err(heartbeat_err) => Err(err.with_heartbeat(heartbeat_err)),
                }
            }
        };

        if let Err(err) = callback.processing_duration(started.elapsed()).await {
            warn!(error = %err, "Failed to report processing duration");
        }
        self.record_status(&task, heartbeat.current_status()).await;

        result
    }

    async fn retry(&self, task: &Task, heartbeat: &HeartbeatSender) -> Result<()> {
        let attempts = self.reconciler.max_retries().max(1);
        let delay = self.reconciler.retry_delay();

        for attempt in 1..=attempts {
            let retry_id = Uuid::new_v4().to_string();
            heartbeat.running(&retry_id).await?;

            let err = match self.reconcile(task).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if err.is_cancelled() || self.cancel.is_cancelled() {
                return Err(err);
            }

            warn!(
                attempt,
                attempts,
                retry_id = %retry_id,
                error = %err,
                "Reconciliation attempt failed"
            );
            let err = match heartbeat.failed(&err).await {
                Ok(()) => err,
                Err(heartbeat_err) if heartbeat_err.is_cancelled() => return Err(heartbeat_err),
                Err(heartbeat_err) => err.with_heartbeat(heartbeat_err),
            };

            if attempt == attempts {
                return Err(err);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(Error::Cancelled("retry loop interrupted".to_string()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(Error::Other("no reconciliation attempt was made".to_string()))
    }

    /// One attempt: connect, then run the stages of the task's operation in order.
    async fn reconcile(&self, task: &Task) -> Result<()> {
        let kube_client = self.runtime.client_factory.connect(&task.kubeconfig).await?;
        let chart_provider = self.runtime.workspace.provider()?;

        let ctx = ActionContext {
            engine: ManifestEngine::new(kube_client.clone(), self.reconciler.tracker_config()),
            kube_client,
            chart_provider,
            cancel: self.cancel.clone(),
            task: Arc::new(task.clone()),
            interceptors: self.reconciler.interceptors().to_vec(),
        };

        for stage in self.reconciler.stages(task.operation) {
            debug!(stage = stage.name, action = stage.action.name(), "Running stage");
            stage.action.run(&ctx).await.map_err(|e| Error::Action {
                stage: stage.name.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    async fn record_status(&self, task: &Task, status: Status) {
        let client = match self.runtime.client_factory.connect(&task.kubeconfig).await {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "Cannot connect to record reconciliation status");
                return;
            }
        };
        if let Err(err) = status::record(client.as_ref(), task, status).await {
            warn!(error = %err, "Failed to record reconciliation status");
        }
    }
}
