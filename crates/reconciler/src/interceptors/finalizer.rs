use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{KubeClient, ObjectKey, ResourceInterceptor, ResourceList};

/// Keeps finalizers that other controllers added to live objects.
pub struct FinalizerInterceptor {
    client: Arc<dyn KubeClient>,
    kinds: Vec<String>,
}

impl FinalizerInterceptor {
    /// Preserve finalizers of Namespaces.
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self::for_kinds(client, vec!["Namespace".to_string()])
    }

    pub fn for_kinds(client: Arc<dyn KubeClient>, kinds: Vec<String>) -> Self {
        Self { client, kinds }
    }
}

#[async_trait]
impl ResourceInterceptor for FinalizerInterceptor {
    fn name(&self) -> &'static str {
        "FinalizerInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()> {
        for kind in &self.kinds {
            let keys: Vec<ObjectKey> = resources
                .by_kind(kind)
                .into_iter()
                .map(|obj| {
                    let mut key = ObjectKey::of(obj);
                    key.namespace = resolve_namespace(obj, namespace).to_string();
                    key
                })
                .collect();

            for key in keys {
                let Some(live) = self.client.get(&key).await? else {
                    continue;
                };
                let Some(live_finalizers) = live.metadata.finalizers.filter(|f| !f.is_empty())
                else {
                    continue;
                };
                let Some(mut desired) = resources.get_mut(&key.kind, &key.name, &key.namespace)
                else {
                    continue;
                };

                let finalizers = desired.metadata.finalizers.get_or_insert_with(Vec::new);
                for finalizer in live_finalizers {
                    if !finalizers.contains(&finalizer) {
                        debug!(resource = %key, finalizer = %finalizer, "Keeping live finalizer");
                        finalizers.push(finalizer);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::{object, FakeCluster};

    #[tokio::test]
    async fn live_finalizers_are_merged_into_desired_namespace() {
        let cluster = FakeCluster::new();
        let mut live = object("v1", "Namespace", "finalizer-test", "");
        live.metadata.finalizers = Some(vec!["kubernetes".to_string()]);
        cluster.insert(live);

        let mut desired = object("v1", "Namespace", "finalizer-test", "");
        desired.metadata.finalizers = Some(vec!["example.com/cleanup".to_string()]);
        let mut list = ResourceList::new(vec![desired, object("v1", "Namespace", "fresh", "")]);

        FinalizerInterceptor::new(Arc::new(cluster))
            .intercept(&mut list, "")
            .await
            .unwrap();

        assert_eq!(
            list.get("Namespace", "finalizer-test", "")
                .unwrap()
                .metadata
                .finalizers
                .as_deref()
                .unwrap(),
            ["example.com/cleanup", "kubernetes"]
        );
        assert!(list.get("Namespace", "fresh", "").unwrap().metadata.finalizers.is_none());
    }

    #[tokio::test]
    async fn other_kinds_are_left_alone() {
        let cluster = FakeCluster::new();
        let mut live = object("v1", "ConfigMap", "settings", "apps");
        live.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
        cluster.insert(live);

        let mut list = ResourceList::new(vec![object("v1", "ConfigMap", "settings", "apps")]);
        FinalizerInterceptor::new(Arc::new(cluster.clone()))
            .intercept(&mut list, "apps")
            .await
            .unwrap();
        assert!(list.iter().next().unwrap().metadata.finalizers.is_none());
        assert!(cluster.calls().is_empty());
    }
}
