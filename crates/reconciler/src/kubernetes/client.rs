//! `kube`-backed implementation of [`KubeClient`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{self, ApiCapabilities, ApiResource, Discovery, Scope};
use kube::{Client, Config, Error as KubeError};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::{ClientFactory, KubeClient, ObjectKey, PatchStrategy};
use crate::error::{Error, Result};

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "component-reconciler";

/// Talks to one cluster through dynamic APIs resolved by discovery.
pub struct ClusterClient {
    client: Client,
    resolved: DashMap<(String, String), (ApiResource, ApiCapabilities)>,
    discovery: OnceCell<Discovery>,
}

impl ClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: DashMap::new(),
            discovery: OnceCell::new(),
        }
    }

    /// Build a client from a serialized kubeconfig.
    pub async fn from_kubeconfig(kubeconfig: &str) -> Result<Self> {
        let kubeconfig =
            Kubeconfig::from_yaml(kubeconfig).map_err(|e| Error::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Kubeconfig(e.to_string()))?;
        Ok(Self::new(Client::try_from(config)?))
    }

    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<(ApiResource, ApiCapabilities)> {
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(found) = self.resolved.get(&cache_key) {
            return Ok(found.value().clone());
        }

        let resolved = if api_version.is_empty() {
            self.resolve_by_kind(kind).await?
        } else {
            let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
            let gvk = GroupVersionKind::gvk(group, version, kind);
            match discovery::pinned_kind(&self.client, &gvk).await {
                Ok(resolved) => resolved,
                Err(KubeError::Discovery(_)) => return Err(unknown_kind(api_version, kind)),
                Err(KubeError::Api(err)) if err.code == 404 => {
                    return Err(unknown_kind(api_version, kind))
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.resolved.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_by_kind(&self, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        let discovery = self
            .discovery
            .get_or_try_init(|| Discovery::new(self.client.clone()).run())
            .await?;

        discovery
            .groups()
            .find_map(|group| group.recommended_kind(kind))
            .ok_or_else(|| unknown_kind("", kind))
    }

    async fn api(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Api<DynamicObject>> {
        let (resource, caps) = self.resolve(api_version, kind).await?;
        Ok(match caps.scope {
            Scope::Namespaced if !namespace.is_empty() => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }

    async fn api_for(&self, obj: &DynamicObject) -> Result<(ObjectKey, Api<DynamicObject>)> {
        let key = ObjectKey::of(obj);
        let api = self.api(&key.api_version, &key.kind, &key.namespace).await?;
        Ok((key, api))
    }
}

fn unknown_kind(api_version: &str, kind: &str) -> Error {
    Error::UnknownKind {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
    }
}

#[async_trait]
impl KubeClient for ClusterClient {
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool> {
        let (_, caps) = self.resolve(api_version, kind).await?;
        Ok(matches!(caps.scope, Scope::Namespaced))
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self.api(&key.api_version, &key.kind, &key.namespace).await?;
        api.get_opt(&key.name)
            .await
            .map_err(|e| Error::resource("get", &key.kind, &key.name, &key.namespace, e.into()))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(api_version, kind, namespace).await?;
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    #[instrument(skip(self, obj), fields(kind = %super::kind(obj), name = %super::name(obj)))]
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let (key, api) = self.api_for(obj).await?;
        debug!("Creating resource");
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::resource("create", &key.kind, &key.name, &key.namespace, e.into()))
    }

    #[instrument(skip(self, obj), fields(kind = %super::kind(obj), name = %super::name(obj)))]
    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let (key, api) = self.api_for(obj).await?;
        debug!("Applying resource");
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&key.name, &params, &Patch::Apply(obj))
            .await
            .map_err(|e| Error::resource("apply", &key.kind, &key.name, &key.namespace, e.into()))
    }

    #[instrument(skip(self, obj), fields(kind = %super::kind(obj), name = %super::name(obj)))]
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let (key, api) = self.api_for(obj).await?;
        debug!("Replacing resource");
        api.replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::resource("replace", &key.kind, &key.name, &key.namespace, e.into()))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let api = self.api(&key.api_version, &key.kind, &key.namespace).await?;
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(KubeError::Api(err)) if err.code == 404 => Ok(false),
            Err(e) => Err(Error::resource(
                "delete",
                &key.kind,
                &key.name,
                &key.namespace,
                e.into(),
            )),
        }
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &[u8],
        strategy: PatchStrategy,
    ) -> Result<DynamicObject> {
        let api = self.api(&key.api_version, &key.kind, &key.namespace).await?;
        let body: serde_json::Value = serde_json::from_slice(patch)?;
        let result = match strategy {
            PatchStrategy::Json => {
                let operations = serde_json::from_value(body)?;
                api.patch(&key.name, &PatchParams::default(), &Patch::Json::<()>(operations))
                    .await
            }
            PatchStrategy::Merge => {
                api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
            }
            PatchStrategy::StrategicMerge => {
                api.patch(&key.name, &PatchParams::default(), &Patch::Strategic(&body))
                    .await
            }
            PatchStrategy::Apply => {
                api.patch(
                    &key.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&body),
                )
                .await
            }
        };
        result.map_err(|e| Error::resource("patch", &key.kind, &key.name, &key.namespace, e.into()))
    }
}

/// Connects to the cluster described by a task's kubeconfig.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeconfigClientFactory;

#[async_trait]
impl ClientFactory for KubeconfigClientFactory {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn KubeClient>> {
        Ok(Arc::new(ClusterClient::from_kubeconfig(kubeconfig).await?))
    }
}
