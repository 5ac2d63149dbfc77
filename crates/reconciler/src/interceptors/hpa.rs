use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{to_typed, KubeClient, ObjectKey, ResourceInterceptor, ResourceList};

/// Keeps autoscaled replica counts: the scale target of every HPA in the batch gets the
/// replica count of its live counterpart.
pub struct HpaInterceptor {
    client: Arc<dyn KubeClient>,
}

impl HpaInterceptor {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

struct ScaleTarget {
    key: ObjectKey,
    hpa: String,
    min_replicas: i32,
    max_replicas: i32,
}

#[async_trait]
impl ResourceInterceptor for HpaInterceptor {
    fn name(&self) -> &'static str {
        "HpaInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()> {
        let mut targets = Vec::new();
        for obj in resources.by_kind("HorizontalPodAutoscaler") {
            let hpa_namespace = resolve_namespace(obj, namespace);
            let hpa: HorizontalPodAutoscaler = to_typed(obj)?;
            let hpa_name = hpa.metadata.name.clone().unwrap_or_default();
            let Some(spec) = hpa.spec else { continue };
            let target_ref = spec.scale_target_ref;

            let Some(target) = resources.get(&target_ref.kind, &target_ref.name, hpa_namespace)
            else {
                warn!(
                    hpa = %hpa_name,
                    kind = %target_ref.kind,
                    name = %target_ref.name,
                    namespace = %hpa_namespace,
                    "Scale target of HPA is not part of the manifest"
                );
                continue;
            };
            if !matches!(target_ref.kind.as_str(), "Deployment" | "StatefulSet") {
                warn!(hpa = %hpa_name, kind = %target_ref.kind, "Unsupported scale target kind");
                continue;
            }

            let mut key = ObjectKey::of(target);
            key.namespace = resolve_namespace(target, hpa_namespace).to_string();
            targets.push(ScaleTarget {
                key,
                hpa: hpa_name,
                min_replicas: spec.min_replicas.unwrap_or(1),
                max_replicas: spec.max_replicas,
            });
        }

        for target in targets {
            let live_replicas = self
                .client
                .get(&target.key)
                .await?
                .map(|live| live.data["spec"]["replicas"].clone());

            let key = &target.key;
            let Some(mut desired) = resources.get_mut(&key.kind, &key.name, &key.namespace) else {
                continue;
            };

            match live_replicas {
                Some(replicas) if !replicas.is_null() => {
                    debug!(
                        resource = %target.key,
                        replicas = %replicas,
                        "Using live replica count"
                    );
                    if !desired.data["spec"].is_object() {
                        desired.data["spec"] = Value::Object(serde_json::Map::new());
                    }
                    desired.data["spec"]["replicas"] = replicas;
                }
                Some(_) => {}
                None => {
                    let replicas = desired.data["spec"]["replicas"].as_i64();
                    if replicas_out_of_range(replicas, target.min_replicas, target.max_replicas) {
                        warn!(
                            resource = %target.key,
                            hpa = %target.hpa,
                            replicas = replicas.unwrap_or(1),
                            min = target.min_replicas,
                            max = target.max_replicas,
                            "Replica count of scale target is outside the HPA range"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn replicas_out_of_range(replicas: Option<i64>, min: i32, max: i32) -> bool {
    let replicas = replicas.unwrap_or(1);
    replicas < i64::from(min) || replicas > i64::from(max)
}
