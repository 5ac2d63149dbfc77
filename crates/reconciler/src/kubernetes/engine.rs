//! Applies and deletes manifests against one cluster.

use std::sync::Arc;

use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::interceptor::{run_all, ResourceInterceptor};
use super::resources::ResourceList;
use super::strategy::{UpdateStrategy, UpdateStrategyResolver};
use super::{api_version, kind, manifest, KubeClient, ObjectKey, PatchStrategy, Resource};
use crate::error::{Error, Result};
use crate::progress::{State, Tracker, TrackerConfig, WatchableKind};

/// Namespaces that are never removed by a delete.
pub const PROTECTED_NAMESPACES: &[&str] =
    &["default", "kube-system", "kube-public", "kube-node-lease"];

const DEFAULT_NAMESPACE: &str = "default";

/// Deploys manifests through the interceptor pipeline and waits for convergence.
#[derive(Clone)]
pub struct ManifestEngine {
    client: Arc<dyn KubeClient>,
    tracker_config: TrackerConfig,
}

impl ManifestEngine {
    pub fn new(client: Arc<dyn KubeClient>, tracker_config: TrackerConfig) -> Self {
        Self {
            client,
            tracker_config,
        }
    }

    /// Apply every document of `manifest` and block until its workloads are ready.
    #[instrument(skip(self, cancel, manifest, interceptors), fields(namespace = %namespace))]
    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        manifest: &str,
        namespace: &str,
        interceptors: &[Arc<dyn ResourceInterceptor>],
    ) -> Result<Vec<Resource>> {
        let mut resources = ResourceList::new(manifest::parse(manifest)?);

        if namespace != DEFAULT_NAMESPACE && !resources.contains("Namespace", namespace, "") {
            debug!("Adding namespace document to manifest");
            resources.prepend(namespace_object(namespace));
        }

        run_all(interceptors, &mut resources, namespace).await?;

        let mut tracker = Tracker::new(self.client.clone(), self.tracker_config)?;
        let resolver = UpdateStrategyResolver::new(self.client.as_ref());
        let mut deployed = Vec::with_capacity(resources.len());

        for mut obj in resources.into_vec() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("deployment interrupted".to_string()));
            }

            self.default_namespace(&mut obj, namespace).await?;
            let strategy = resolver.resolve(&obj).await?;
            let key = ObjectKey::of(&obj);
            debug!(resource = %key, strategy = %strategy, "Applying resource");

            self.apply_with_strategy(&mut obj, strategy).await?;

            if WatchableKind::is_watchable(&key.kind) {
                tracker.add_resource(&key.kind, &key.namespace, &key.name)?;
            }
            deployed.push(Resource::from(&key));
        }

        info!(
            resources = deployed.len(),
            "Manifest applied, waiting for resources to become ready"
        );
        tracker.watch(cancel, State::Ready).await?;
        Ok(deployed)
    }

    /// Delete every document of `manifest` in reverse order, then the namespace itself.
    #[instrument(skip(self, cancel, manifest), fields(namespace = %namespace))]
    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        manifest: &str,
        namespace: &str,
    ) -> Result<Vec<Resource>> {
        let objects = manifest::parse(manifest)?;
        let mut tracker = Tracker::new(self.client.clone(), self.tracker_config)?;
        let mut deleted = Vec::with_capacity(objects.len());

        for mut obj in objects.into_iter().rev() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("deletion interrupted".to_string()));
            }

            match self.default_namespace(&mut obj, namespace).await {
                Ok(()) => {}
                Err(err) if err.is_unknown_kind() => {
                    debug!(kind = kind(&obj), "Kind not served by cluster, nothing to delete");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let key = ObjectKey::of(&obj);
            let existed = match self.client.delete(&key).await {
                Ok(existed) => existed,
                Err(err) if err.is_not_found() || err.is_unknown_kind() => false,
                Err(err) => return Err(err),
            };

            if existed {
                debug!(resource = %key, "Deleted resource");
                if WatchableKind::is_watchable(&key.kind) {
                    tracker.add_resource(&key.kind, &key.namespace, &key.name)?;
                }
            } else {
                debug!(resource = %key, "Resource already absent");
            }
            deleted.push(Resource::from(&key));
        }

        tracker.watch(cancel, State::Terminated).await?;
        self.delete_namespace(namespace).await?;
        Ok(deleted)
    }

    /// Patch a live object. An empty `kind` group is resolved through discovery.
    #[instrument(skip(self, patch), fields(kind = %kind, name = %name, namespace = %namespace))]
    pub async fn patch_using_strategy(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        patch: &[u8],
        strategy: PatchStrategy,
    ) -> Result<()> {
        let key = ObjectKey::new("", kind, name, namespace);
        self.client.patch(&key, patch, strategy).await?;
        Ok(())
    }

    async fn default_namespace(&self, obj: &mut DynamicObject, namespace: &str) -> Result<()> {
        if obj.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
            return Ok(());
        }
        if self.client.is_namespaced(api_version(obj), kind(obj)).await? {
            obj.metadata.namespace = Some(namespace.to_string());
        }
        Ok(())
    }

    async fn apply_with_strategy(
        &self,
        obj: &mut DynamicObject,
        strategy: UpdateStrategy,
    ) -> Result<()> {
        let key = ObjectKey::of(obj);
        match strategy {
            UpdateStrategy::Skip => {
                if self.client.get(&key).await?.is_some() {
                    debug!(resource = %key, "Resource exists, leaving it untouched");
                } else {
                    self.client.create(obj).await?;
                }
            }
            UpdateStrategy::Patch => {
                self.client.apply(obj).await?;
            }
            UpdateStrategy::Replace => match self.client.get(&key).await? {
                Some(live) => {
                    obj.metadata.resource_version = live.metadata.resource_version;
                    match self.client.replace(obj).await {
                        Ok(_) => {}
                        Err(err) if err.is_invalid() => {
                            warn!(
                                resource = %key,
                                error = %err,
                                "Replace rejected, recreating resource"
                            );
                            obj.metadata.resource_version = None;
                            self.client.delete(&key).await?;
                            self.client.create(obj).await?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    self.client.create(obj).await?;
                }
            },
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        if namespace.is_empty() || PROTECTED_NAMESPACES.contains(&namespace) {
            debug!(namespace = %namespace, "Keeping protected namespace");
            return Ok(());
        }
        let key = ObjectKey::new("v1", "Namespace", namespace, "");
        match self.client.delete(&key).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn namespace_object(name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        data: json!({}),
    }
}
