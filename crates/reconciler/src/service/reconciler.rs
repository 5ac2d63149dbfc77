//! Per-component reconciliation settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::action::Action;
use super::install::Install;
use super::runner::Runner;
use super::RuntimeContext;
use crate::callback::CallbackHandler;
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatConfig;
use crate::kubernetes::ResourceInterceptor;
use crate::model::{OperationType, Task};
use crate::progress::TrackerConfig;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Stage names used in logs and [`Error::Action`].
pub mod stage {
    pub const PRE_RECONCILE: &str = "pre-reconcile";
    pub const RECONCILE: &str = "reconcile";
    pub const POST_RECONCILE: &str = "post-reconcile";
    pub const PRE_DELETE: &str = "pre-delete";
    pub const DELETE: &str = "delete";
    pub const POST_DELETE: &str = "post-delete";
}

/// A stage to run, with its name.
pub struct Stage<'a> {
    pub name: &'static str,
    pub action: &'a Arc<dyn Action>,
}

/// How one component is reconciled: its actions, dependencies and retry budget.
#[derive(Clone)]
pub struct ComponentReconciler {
    name: String,
    dependencies: Vec<String>,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
    heartbeat: HeartbeatConfig,
    tracker: TrackerConfig,
    pre_reconcile: Option<Arc<dyn Action>>,
    reconcile: Arc<dyn Action>,
    post_reconcile: Option<Arc<dyn Action>>,
    pre_delete: Option<Arc<dyn Action>>,
    delete: Arc<dyn Action>,
    post_delete: Option<Arc<dyn Action>>,
    interceptors: Vec<Arc<dyn ResourceInterceptor>>,
}

impl ComponentReconciler {
    /// A reconciler running the install action with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        let install: Arc<dyn Action> = Arc::new(Install);
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
            tracker: TrackerConfig::default(),
            pre_reconcile: None,
            reconcile: install.clone(),
            post_reconcile: None,
            pre_delete: None,
            delete: install,
            post_delete: None,
            interceptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// `max_retries` is the total number of attempts.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Upper bound for one reconciliation including all retries.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    #[must_use]
    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker = config;
        self
    }

    #[must_use]
    pub fn with_pre_reconcile_action(mut self, action: Arc<dyn Action>) -> Self {
        self.pre_reconcile = Some(action);
        self
    }

    #[must_use]
    pub fn with_reconcile_action(mut self, action: Arc<dyn Action>) -> Self {
        self.reconcile = action;
        self
    }

    #[must_use]
    pub fn with_post_reconcile_action(mut self, action: Arc<dyn Action>) -> Self {
        self.post_reconcile = Some(action);
        self
    }

    #[must_use]
    pub fn with_pre_delete_action(mut self, action: Arc<dyn Action>) -> Self {
        self.pre_delete = Some(action);
        self
    }

    #[must_use]
    pub fn with_delete_action(mut self, action: Arc<dyn Action>) -> Self {
        self.delete = action;
        self
    }

    #[must_use]
    pub fn with_post_delete_action(mut self, action: Arc<dyn Action>) -> Self {
        self.post_delete = Some(action);
        self
    }

    /// Interceptors run after the standard pipeline on every deploy.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ResourceInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Fill in defaults and reject settings the runner cannot work with.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("component reconciler name is empty".to_string()));
        }
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self.heartbeat.validate()?;
        self.tracker.validate()?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        self.tracker
    }

    pub fn interceptors(&self) -> &[Arc<dyn ResourceInterceptor>] {
        &self.interceptors
    }

    /// The pre, main and post stages for `operation`, in execution order.
    pub fn stages(&self, operation: OperationType) -> Vec<Stage<'_>> {
        let (pre, main, post) = match operation {
            OperationType::Reconcile => (
                (stage::PRE_RECONCILE, &self.pre_reconcile),
                (stage::RECONCILE, &self.reconcile),
                (stage::POST_RECONCILE, &self.post_reconcile),
            ),
            OperationType::Delete => (
                (stage::PRE_DELETE, &self.pre_delete),
                (stage::DELETE, &self.delete),
                (stage::POST_DELETE, &self.post_delete),
            ),
        };

        let mut stages = Vec::with_capacity(3);
        if let Some(action) = pre.1 {
            stages.push(Stage { name: pre.0, action });
        }
        stages.push(Stage {
            name: main.0,
            action: main.1,
        });
        if let Some(action) = post.1 {
            stages.push(Stage { name: post.0, action });
        }
        stages
    }

    /// Run one task in the calling process, reporting to `callback`.
    pub async fn start_local(
        self: Arc<Self>,
        runtime: Arc<RuntimeContext>,
        cancel: CancellationToken,
        mut task: Task,
        callback: Arc<dyn CallbackHandler>,
    ) -> Result<()> {
        task.validate_embedded()?;
        Runner::new(self, runtime, cancel)
            .run(Arc::new(task), callback)
            .await
    }
}

impl fmt::Debug for ComponentReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentReconciler")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
