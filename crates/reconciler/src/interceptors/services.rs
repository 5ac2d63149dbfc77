use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{KubeClient, ObjectKey, ResourceInterceptor, ResourceList};

/// Copies the cluster IP of a live Service onto the desired one when it is unset,
/// so a replace does not try to change the immutable field.
pub struct ServicesInterceptor {
    client: Arc<dyn KubeClient>,
}

impl ServicesInterceptor {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

fn needs_cluster_ip(spec: &Value) -> bool {
    let service_type = spec["type"].as_str().unwrap_or_default();
    if !matches!(service_type, "" | "ClusterIP" | "NodePort") {
        return false;
    }
    let cluster_ip = spec["clusterIP"].as_str().unwrap_or_default();
    cluster_ip.is_empty() || cluster_ip.eq_ignore_ascii_case("None")
}

#[async_trait]
impl ResourceInterceptor for ServicesInterceptor {
    fn name(&self) -> &'static str {
        "ServicesInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()> {
        let candidates: Vec<ObjectKey> = resources
            .by_kind("Service")
            .into_iter()
            .filter(|svc| needs_cluster_ip(&svc.data["spec"]))
            .map(|svc| {
                let mut key = ObjectKey::of(svc);
                key.namespace = resolve_namespace(svc, namespace).to_string();
                key
            })
            .collect();

        for key in candidates {
            let Some(live) = self.client.get(&key).await? else {
                continue;
            };
            let Some(cluster_ip) = live.data["spec"]["clusterIP"]
                .as_str()
                .filter(|ip| !ip.is_empty())
            else {
                continue;
            };
            if let Some(mut desired) = resources.get_mut(&key.kind, &key.name, &key.namespace) {
                debug!(resource = %key, cluster_ip = %cluster_ip, "Using live cluster IP");
                if !desired.data["spec"].is_object() {
                    desired.data["spec"] = Value::Object(serde_json::Map::new());
                }
                desired.data["spec"]["clusterIP"] = Value::String(cluster_ip.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::{object_with, FakeCluster};
    use serde_json::json;

    fn service(name: &str, spec: Value) -> kube::api::DynamicObject {
        object_with("v1", "Service", name, "apps", json!({ "spec": spec }))
    }

    #[tokio::test]
    async fn live_cluster_ip_is_copied_when_unset() {
        let cluster = FakeCluster::new();
        cluster.insert(service("api", json!({"type": "ClusterIP", "clusterIP": "10.0.0.12"})));
        cluster.insert(service("nodes", json!({"type": "NodePort", "clusterIP": "10.0.0.13"})));
        cluster.insert(service("lb", json!({"type": "LoadBalancer", "clusterIP": "10.0.0.14"})));
        cluster.insert(service("pinned", json!({"clusterIP": "10.0.0.15"})));

        let mut list = ResourceList::new(vec![
            service("api", json!({"ports": [{"port": 80}]})),
            service("nodes", json!({"type": "NodePort"})),
            service("lb", json!({"type": "LoadBalancer"})),
            service("pinned", json!({"clusterIP": "10.0.0.99"})),
            service("fresh", json!({})),
        ]);

        ServicesInterceptor::new(Arc::new(cluster))
            .intercept(&mut list, "apps")
            .await
            .unwrap();

        let ip = |name: &str| {
            list.get("Service", name, "apps").unwrap().data["spec"]["clusterIP"].clone()
        };
        assert_eq!(ip("api"), "10.0.0.12");
        assert_eq!(ip("nodes"), "10.0.0.13");
        assert_eq!(ip("lb"), Value::Null);
        assert_eq!(ip("pinned"), "10.0.0.99");
        assert_eq!(ip("fresh"), Value::Null);
    }
}
