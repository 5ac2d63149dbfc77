//! Kubernetes access for the reconciliation runtime.
//!
//! Everything above this module talks to a cluster through [`KubeClient`], which works
//! on unstructured [`DynamicObject`]s. [`client::ClusterClient`] implements it on top of
//! `kube` with API discovery; tests use an in-memory cluster.

pub mod client;
pub mod engine;
pub mod interceptor;
pub mod manifest;
pub mod resources;
pub mod strategy;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use client::{ClusterClient, KubeconfigClientFactory};
pub use engine::ManifestEngine;
pub use interceptor::{
    InterceptionResult, PerResource, ResourceInterceptor, SingleResourceInterceptor,
};
pub use resources::{ResourceList, ResourceMut};
pub use strategy::{UpdateStrategy, UpdateStrategyResolver};

/// Address of one object on the cluster.
///
/// An empty `api_version` lets the client resolve the kind through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ObjectKey {
    pub fn new(api_version: &str, kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Key of an unstructured object.
    pub fn of(obj: &DynamicObject) -> Self {
        Self::new(
            api_version(obj),
            kind(obj),
            obj.metadata.name.as_deref().unwrap_or_default(),
            obj.metadata.namespace.as_deref().unwrap_or_default(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// An object touched by an apply or delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl From<&ObjectKey> for Resource {
    fn from(key: &ObjectKey) -> Self {
        Self {
            kind: key.kind.clone(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        }
    }
}

/// Patch flavours accepted by [`KubeClient::patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    /// RFC 6902 operation list
    Json,
    Merge,
    StrategicMerge,
    Apply,
}

/// Cluster operations used by the apply engine, interceptors and progress tracker.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Whether objects of this kind live in a namespace.
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool>;

    /// Fetch an object; `None` if it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Server-side apply: three-way merge against the live object, creating it if absent.
    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace the live object with `obj`.
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; `false` if it was already gone.
    async fn delete(&self, key: &ObjectKey) -> Result<bool>;

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &[u8],
        strategy: PatchStrategy,
    ) -> Result<DynamicObject>;
}

/// Builds a [`KubeClient`] for the kubeconfig carried by a task.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn KubeClient>>;
}

pub fn api_version(obj: &DynamicObject) -> &str {
    obj.types
        .as_ref()
        .map(|t| t.api_version.as_str())
        .unwrap_or_default()
}

pub fn kind(obj: &DynamicObject) -> &str {
    obj.types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or_default()
}

pub fn name(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

pub fn namespace(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

/// Convert an unstructured object into a typed one.
pub fn to_typed<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a typed object into an unstructured one.
pub fn from_typed<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Fetch an object and convert it to `K`.
pub async fn get_typed<K: DeserializeOwned>(
    client: &dyn KubeClient,
    key: &ObjectKey,
) -> Result<Option<K>> {
    client.get(key).await?.as_ref().map(to_typed).transpose()
}
