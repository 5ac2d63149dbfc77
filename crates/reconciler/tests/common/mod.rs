//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use reconciler::chart::{ChartProvider, Component, Manifest, WorkspaceFactory};
use reconciler::heartbeat::HeartbeatConfig;
use reconciler::kubernetes::{ClientFactory, KubeClient, ObjectKey, PatchStrategy};
use reconciler::service::{Action, ActionContext, PoolConfig};
use reconciler::{
    ComponentReconciler, ComponentRegistry, Error, Result, RuntimeContext, Task, WorkerPool,
};
use tokio_util::sync::CancellationToken;

/// A cluster where nothing exists and every write succeeds.
pub struct EmptyCluster;

#[async_trait]
impl KubeClient for EmptyCluster {
    async fn is_namespaced(&self, _api_version: &str, kind: &str) -> Result<bool> {
        Ok(kind != "Namespace")
    }

    async fn get(&self, _key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(None)
    }

    async fn list(
        &self,
        _api_version: &str,
        _kind: &str,
        _namespace: &str,
        _label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        Ok(Vec::new())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        Ok(obj.clone())
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        Ok(obj.clone())
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        Ok(obj.clone())
    }

    async fn delete(&self, _key: &ObjectKey) -> Result<bool> {
        Ok(false)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        _patch: &[u8],
        _strategy: PatchStrategy,
    ) -> Result<DynamicObject> {
        Err(Error::Other(format!("{key} does not exist")))
    }
}

pub struct EmptyClusterFactory;

#[async_trait]
impl ClientFactory for EmptyClusterFactory {
    async fn connect(&self, _kubeconfig: &str) -> Result<Arc<dyn KubeClient>> {
        Ok(Arc::new(EmptyCluster))
    }
}

/// Renders every component as an empty manifest.
pub struct EmptyCharts;

#[async_trait]
impl ChartProvider for EmptyCharts {
    async fn render_manifest(&self, component: &Component) -> Result<Manifest> {
        Ok(Manifest {
            name: component.name.clone(),
            manifest: String::new(),
        })
    }

    async fn render_crd(&self, _version: &str) -> Result<Vec<Manifest>> {
        Ok(Vec::new())
    }

    async fn configuration(&self, component: &Component) -> Result<Value> {
        Ok(component.configuration())
    }
}

/// Waits until the pool shuts down.
pub struct Block;

#[async_trait]
impl Action for Block {
    async fn run(&self, ctx: &ActionContext) -> Result<()> {
        ctx.cancel.cancelled().await;
        Err(Error::Cancelled("pool closed".to_string()))
    }
}

/// Always fails.
pub struct Fail;

#[async_trait]
impl Action for Fail {
    async fn run(&self, _ctx: &ActionContext) -> Result<()> {
        Err(Error::Other("chart values are invalid".to_string()))
    }
}

pub fn quiet_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(120),
    }
}

pub fn component_reconciler(name: &str, action: Arc<dyn Action>) -> ComponentReconciler {
    ComponentReconciler::new(name)
        .with_reconcile_action(action)
        .with_retry(2, Duration::from_millis(10))
        .with_heartbeat_config(quiet_heartbeat())
}

pub fn start_pool(
    registry: ComponentRegistry,
    config: PoolConfig,
) -> (Arc<WorkerPool>, CancellationToken) {
    let runtime = Arc::new(RuntimeContext {
        registry,
        client_factory: Arc::new(EmptyClusterFactory),
        workspace: Arc::new(WorkspaceFactory::with_provider(Arc::new(EmptyCharts))),
    });
    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(runtime, config, cancel.clone()).expect("pool starts");
    (Arc::new(pool), cancel)
}

pub fn task(component: &str, callback_url: &str) -> Task {
    Task {
        component: component.to_string(),
        namespace: "istio-system".to_string(),
        version: "1.2.0".to_string(),
        kubeconfig: "apiVersion: v1\nkind: Config".to_string(),
        callback_url: callback_url.to_string(),
        correlation_id: "6d1d3d4a".to_string(),
        ..Task::default()
    }
}
