//! Polling progress tracker for workload resources.
//!
//! A [`Tracker`] is filled with the workloads touched by one apply or delete call and then
//! polls the cluster until all of them are ready (or gone), the timeout elapses or the
//! surrounding context is cancelled. Readiness is judged by the predicates in [`ready`].

pub mod ready;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::kubernetes::{get_typed, to_typed, KubeClient, ObjectKey};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Target state of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Polling interval and overall timeout; zero selects the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl TrackerConfig {
    pub fn validate(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            self.interval = DEFAULT_INTERVAL;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.timeout <= self.interval {
            return Err(Error::Config(format!(
                "progress timeout cannot be <= interval ({:.1} secs <= {:.1} secs)",
                self.timeout.as_secs_f64(),
                self.interval.as_secs_f64()
            )));
        }
        Ok(())
    }
}

/// Workload kinds the tracker knows how to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchableKind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
}

impl WatchableKind {
    pub fn from_kind(kind: &str) -> Result<Self> {
        match kind {
            "Pod" => Ok(Self::Pod),
            "Deployment" => Ok(Self::Deployment),
            "StatefulSet" => Ok(Self::StatefulSet),
            "DaemonSet" => Ok(Self::DaemonSet),
            "Job" => Ok(Self::Job),
            other => Err(Error::Other(format!(
                "resource kind '{other}' cannot be watched by the progress tracker"
            ))),
        }
    }

    pub fn is_watchable(kind: &str) -> bool {
        Self::from_kind(kind).is_ok()
    }

    fn api_version(self) -> &'static str {
        match self {
            Self::Pod => "v1",
            Self::Deployment | Self::StatefulSet | Self::DaemonSet => "apps/v1",
            Self::Job => "batch/v1",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
        }
    }
}

#[derive(Debug, Clone)]
struct WatchedResource {
    kind: WatchableKind,
    namespace: String,
    name: String,
}

impl WatchedResource {
    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind.api_version(), self.kind.kind(), &self.name, &self.namespace)
    }
}

/// Waits for a set of workloads to reach a [`State`].
pub struct Tracker {
    client: Arc<dyn KubeClient>,
    config: TrackerConfig,
    resources: Vec<WatchedResource>,
}

impl Tracker {
    pub fn new(client: Arc<dyn KubeClient>, mut config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            resources: Vec::new(),
        })
    }

    /// Register a workload; fails for kinds that cannot be watched.
    pub fn add_resource(&mut self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        self.resources.push(WatchedResource {
            kind: WatchableKind::from_kind(kind)?,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Block until every registered resource reached `target`.
    #[instrument(skip(self, cancel), fields(resources = self.resources.len(), target = %target))]
    pub async fn watch(&self, cancel: &CancellationToken, target: State) -> Result<()> {
        if self.resources.is_empty() {
            debug!("No resources to watch");
            return Ok(());
        }

        match self.is_in_state(target).await {
            Ok(true) => {
                debug!("Resources reached target state on first check");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => warn!(error = %err, "Initial progress check failed"),
        }

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!(
                        "stopped waiting for resources to become {target}"
                    )));
                }
                () = &mut deadline => {
                    return Err(Error::ProgressTimeout {
                        timeout_secs: self.config.timeout.as_secs(),
                        state: target,
                    });
                }
                _ = ticker.tick() => {
                    match self.is_in_state(target).await {
                        Ok(true) => {
                            info!("All watched resources are {target}");
                            return Ok(());
                        }
                        Ok(false) => debug!("Resources not yet {target}"),
                        Err(err) => warn!(error = %err, "Progress check failed"),
                    }
                }
            }
        }
    }

    async fn is_in_state(&self, target: State) -> Result<bool> {
        for resource in &self.resources {
            let reached = match target {
                State::Ready => self.is_ready(resource).await?,
                State::Terminated => self.is_terminated(resource).await?,
            };
            if !reached {
                debug!(
                    kind = resource.kind.kind(),
                    namespace = %resource.namespace,
                    name = %resource.name,
                    "Resource has not reached {target}"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn is_terminated(&self, resource: &WatchedResource) -> Result<bool> {
        Ok(self.client.get(&resource.key()).await?.is_none())
    }

    async fn is_ready(&self, resource: &WatchedResource) -> Result<bool> {
        let client = self.client.as_ref();
        let key = resource.key();
        Ok(match resource.kind {
            WatchableKind::Pod => get_typed::<Pod>(client, &key)
                .await?
                .is_some_and(|pod| ready::pod_ready(&pod)),
            WatchableKind::Job => get_typed::<Job>(client, &key)
                .await?
                .is_some_and(|job| ready::job_ready(&job)),
            WatchableKind::StatefulSet => get_typed::<StatefulSet>(client, &key)
                .await?
                .is_some_and(|sts| ready::statefulset_ready(&sts)),
            WatchableKind::DaemonSet => get_typed::<DaemonSet>(client, &key)
                .await?
                .is_some_and(|ds| ready::daemonset_ready(&ds)),
            WatchableKind::Deployment => match get_typed::<Deployment>(client, &key).await? {
                Some(deployment) => {
                    let replica_sets = self
                        .replica_sets_of(&deployment, &resource.namespace)
                        .await?;
                    ready::deployment_ready(&deployment, &replica_sets)
                }
                None => false,
            },
        })
    }

    async fn replica_sets_of(
        &self,
        deployment: &Deployment,
        namespace: &str,
    ) -> Result<Vec<ReplicaSet>> {
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .filter(|selector| !selector.is_empty());

        self.client
            .list("apps/v1", "ReplicaSet", namespace, selector.as_deref())
            .await?
            .iter()
            .map(to_typed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::{object_with, FakeCluster};
    use serde_json::json;

    fn fast_config() -> TrackerConfig {
        TrackerConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        }
    }

    fn tracker(cluster: &FakeCluster) -> Tracker {
        Tracker::new(Arc::new(cluster.clone()), fast_config()).unwrap()
    }

    #[test]
    fn config_defaults_and_bounds() {
        let mut config = TrackerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.interval, Duration::from_secs(20));
        assert_eq!(config.timeout, Duration::from_secs(600));

        let mut config = TrackerConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn only_workloads_are_watchable() {
        let mut tracker = tracker(&FakeCluster::new());
        tracker.add_resource("Deployment", "apps", "web").unwrap();
        assert!(tracker.add_resource("ConfigMap", "apps", "settings").is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn empty_tracker_succeeds_immediately() {
        let tracker = tracker(&FakeCluster::new());
        tracker
            .watch(&CancellationToken::new(), State::Ready)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ready_pod_is_detected() {
        let cluster = FakeCluster::new();
        cluster.insert(object_with(
            "v1",
            "Pod",
            "runner",
            "apps",
            json!({"status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}]
            }}),
        ));
        let mut tracker = tracker(&cluster);
        tracker.add_resource("Pod", "apps", "runner").unwrap();
        tracker
            .watch(&CancellationToken::new(), State::Ready)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let cluster = FakeCluster::new();
        cluster.insert(object_with(
            "v1",
            "Pod",
            "runner",
            "apps",
            json!({"status": {"phase": "Pending"}}),
        ));
        let mut tracker = tracker(&cluster);
        tracker.add_resource("Pod", "apps", "runner").unwrap();
        let err = tracker
            .watch(&CancellationToken::new(), State::Ready)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProgressTimeout {
                state: State::Ready,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_timeout() {
        let cluster = FakeCluster::new();
        let mut tracker = tracker(&cluster);
        tracker.add_resource("Deployment", "apps", "missing").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tracker.watch(&cancel, State::Ready).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn terminated_once_object_is_gone() {
        let cluster = FakeCluster::new();
        cluster.insert(object_with("apps/v1", "Deployment", "web", "apps", json!({})));
        let mut tracker = tracker(&cluster);
        tracker.add_resource("Deployment", "apps", "web").unwrap();

        let remover = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            remover.remove("Deployment", "web", "apps");
        });

        tracker
            .watch(&CancellationToken::new(), State::Terminated)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deployment_readiness_uses_owned_replica_sets() {
        let cluster = FakeCluster::new();
        let mut deployment = object_with(
            "apps/v1",
            "Deployment",
            "web",
            "apps",
            json!({"spec": {"selector": {"matchLabels": {"app": "web"}}, "template": {}}}),
        );
        deployment.metadata.uid = Some("dep-uid".to_string());
        cluster.insert(deployment);

        let mut rs = object_with(
            "apps/v1",
            "ReplicaSet",
            "web-abc",
            "apps",
            json!({"status": {"replicas": 1, "readyReplicas": 1}}),
        );
        rs.metadata.creation_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            k8s_openapi::chrono::Utc::now(),
        ));
        rs.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: "web".to_string(),
                uid: "dep-uid".to_string(),
                controller: Some(true),
                ..Default::default()
            },
        ]);
        cluster.insert(rs);

        let mut tracker = tracker(&cluster);
        tracker.add_resource("Deployment", "apps", "web").unwrap();
        tracker
            .watch(&CancellationToken::new(), State::Ready)
            .await
            .unwrap();
    }
}
