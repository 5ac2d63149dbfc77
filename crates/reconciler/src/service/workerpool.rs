//! Bounded worker pool admitting reconciliation tasks.
//!
//! Submission never blocks: a full queue rejects the task right away so the caller can
//! retry it elsewhere. While tasks were accepted through HTTP, the pool periodically
//! reports its occupancy to the host that sent them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Url;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::reconciler::ComponentReconciler;
use super::runner::Runner;
use super::RuntimeContext;
use crate::callback::{CallbackHandler, RemoteCallbackHandler};
use crate::config::ReconcilerConfig;
use crate::dependency::DependencyCheck;
use crate::error::{Error, Result};
use crate::model::{OccupancyRequest, Task};

/// Environment variable naming this pool in occupancy reports (the pod name in a cluster).
pub const POOL_ID_ENV: &str = "HOSTNAME";

const OCCUPANCY_PATH: &str = "v1/occupancy";

type Job = BoxFuture<'static, ()>;

/// Worker count, queue length and occupancy report interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub size: usize,
    /// 0 = same as `size`
    pub queue_size: usize,
    pub occupancy_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 100,
            queue_size: 0,
            occupancy_interval: Duration::from_secs(30),
        }
    }
}

impl From<&ReconcilerConfig> for PoolConfig {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            size: config.workers.size,
            queue_size: config.queue_size(),
            occupancy_interval: config.occupancy_interval(),
        }
    }
}

/// Fixed set of workers consuming a bounded task queue.
pub struct WorkerPool {
    runtime: Arc<RuntimeContext>,
    sender: mpsc::Sender<Job>,
    size: usize,
    running: Arc<AtomicUsize>,
    cancel: CancellationToken,
    occupancy: Arc<OccupancyReporter>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the workers. The pool closes when `cancel` fires.
    pub fn start(
        runtime: Arc<RuntimeContext>,
        config: PoolConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if config.size == 0 {
            return Err(Error::Config("worker pool size must be greater than 0".to_string()));
        }
        if config.occupancy_interval.is_zero() {
            return Err(Error::Config(
                "occupancy report interval must be greater than 0".to_string(),
            ));
        }
        let queue_size = if config.queue_size == 0 {
            config.size
        } else {
            config.queue_size
        };

        let (sender, receiver) = mpsc::channel::<Job>(queue_size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let running = Arc::new(AtomicUsize::new(0));

        info!(workers = config.size, queue_size, "Starting worker pool");
        let workers = (0..config.size)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&running),
                    cancel.clone(),
                ))
            })
            .collect();

        let occupancy = Arc::new(OccupancyReporter::new(pool_id()));
        tokio::spawn(report_occupancy(
            Arc::clone(&occupancy),
            Arc::clone(&running),
            config.size,
            config.occupancy_interval,
            cancel.clone(),
        ));

        Ok(Self {
            runtime,
            sender,
            size: config.size,
            running,
            cancel,
            occupancy,
            workers: tokio::sync::Mutex::new(workers),
        })
    }

    /// Admit a task received over HTTP; status reports go to its callback URL.
    pub fn assign_worker(&self, mut task: Task) -> Result<()> {
        let reconciler = self.admit(&mut task, true)?;
        let callback: Arc<dyn CallbackHandler> =
            Arc::new(RemoteCallbackHandler::new(&task.callback_url)?);
        let callback_url = task.callback_url.clone();
        let component = task.component.clone();

        self.submit(reconciler, task, callback)?;
        self.occupancy.observe(&callback_url, &component);
        Ok(())
    }

    /// Admit a task reporting to an in-process callback.
    pub fn assign_worker_with_callback(
        &self,
        mut task: Task,
        callback: Arc<dyn CallbackHandler>,
    ) -> Result<()> {
        let reconciler = self.admit(&mut task, false)?;
        self.submit(reconciler, task, callback)
    }

    pub fn running_workers(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    pub fn pool_id(&self) -> &str {
        &self.occupancy.pool_id
    }

    /// Wait for all workers to exit after the pool was closed.
    pub async fn stopped(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker terminated abnormally");
            }
        }
        debug!("All workers stopped");
    }

    fn admit(&self, task: &mut Task, remote: bool) -> Result<Arc<ComponentReconciler>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        if remote {
            task.validate()?;
        } else {
            task.validate_embedded()?;
        }
        let reconciler = self.runtime.registry.resolve(&task.component)?;

        let check = DependencyCheck::new(
            &task.component,
            reconciler.dependencies(),
            &task.components_ready,
        );
        if check.dependency_missing() {
            warn!(
                component = %task.component,
                correlation_id = %task.correlation_id,
                missing = ?check.missing,
                "Task rejected: dependencies missing"
            );
            return Err(check.into_error());
        }
        Ok(reconciler)
    }

    fn submit(
        &self,
        reconciler: Arc<ComponentReconciler>,
        task: Task,
        callback: Arc<dyn CallbackHandler>,
    ) -> Result<()> {
        let span = info_span!(
            "task",
            component = %task.component,
            correlation_id = %task.correlation_id,
        );
        let description = task.to_string();
        let runner = Runner::new(reconciler, Arc::clone(&self.runtime), self.cancel.clone());
        let task = Arc::new(task);

        let job: Job = async move {
            if let Err(err) = runner.run(task, callback).await {
                debug!(error = %err, "Task finished with error");
            }
        }
        .instrument(span)
        .boxed();

        match self.sender.try_send(job) {
            Ok(()) => {
                info!(task = %description, "Task assigned to worker pool");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    task = %description,
                    size = self.size,
                    "Worker pool saturated, task rejected"
                );
                Err(Error::PoolSaturated { size: self.size })
            }
            Err(TrySendError::Closed(_)) => Err(Error::PoolClosed),
        }
    }
}

/// Marks a worker busy for as long as it lives.
struct Busy<'a>(&'a AtomicUsize);

impl<'a> Busy<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn worker(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    running: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let _busy = Busy::enter(&running);
        job.await;
    }

    // Accepted tasks still queued report the closed context.
    loop {
        let job = receiver.lock().await.try_recv();
        let Ok(job) = job else {
            break;
        };
        let _busy = Busy::enter(&running);
        job.await;
    }
    debug!(worker = id, "Worker stopped");
}

/// This pool's identifier in occupancy reports.
pub fn pool_id() -> String {
    std::env::var(POOL_ID_ENV)
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// `<scheme>://<host>:<port>/v1/occupancy/<pool_id>` on the host of `callback_url`.
pub fn occupancy_url(callback_url: &str, pool_id: &str) -> Option<String> {
    let url = Url::parse(callback_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!(
        "{}://{host}:{port}/{OCCUPANCY_PATH}/{pool_id}",
        url.scheme()
    ))
}

struct OccupancyTarget {
    url: String,
    component: String,
}

struct OccupancyReporter {
    pool_id: String,
    client: reqwest::Client,
    target: Mutex<Option<OccupancyTarget>>,
}

impl OccupancyReporter {
    fn new(pool_id: String) -> Self {
        Self {
            pool_id,
            client: reqwest::Client::new(),
            target: Mutex::new(None),
        }
    }

    /// Report to the host of the most recently accepted task.
    fn observe(&self, callback_url: &str, component: &str) {
        let Some(url) = occupancy_url(callback_url, &self.pool_id) else {
            return;
        };
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(OccupancyTarget {
            url,
            component: component.to_string(),
        });
    }

    fn target(&self) -> Option<(String, String)> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| (t.url.clone(), t.component.clone()))
    }

    async fn report(&self, running_workers: usize, pool_size: usize) {
        let Some((url, component)) = self.target() else {
            return;
        };
        let payload = OccupancyRequest {
            component,
            running_workers,
            pool_size,
        };
        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, running_workers, pool_size, "Occupancy reported");
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Occupancy report rejected");
            }
            Err(err) => warn!(url = %url, error = %err, "Failed to report occupancy"),
        }
    }

    async fn unregister(&self) {
        let Some((url, _)) = self.target() else {
            return;
        };
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %url, "Worker pool unregistered from occupancy tracking");
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Occupancy deletion rejected");
            }
            Err(err) => warn!(url = %url, error = %err, "Failed to delete occupancy"),
        }
    }
}

async fn report_occupancy(
    reporter: Arc<OccupancyReporter>,
    running: Arc<AtomicUsize>,
    pool_size: usize,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                reporter.unregister().await;
                return;
            }
            _ = ticker.tick() => {
                reporter.report(running.load(Ordering::SeqCst), pool_size).await;
            }
        }
    }
}
