use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{KubeClient, ObjectKey, ResourceInterceptor, ResourceList};

/// Volume claim templates are immutable; an existing StatefulSet keeps its live ones.
pub struct StatefulSetInterceptor {
    client: Arc<dyn KubeClient>,
}

impl StatefulSetInterceptor {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

fn claim_templates(obj: &Value) -> Option<&Vec<Value>> {
    obj["spec"]["volumeClaimTemplates"]
        .as_array()
        .filter(|templates| !templates.is_empty())
}

fn template_names(templates: Option<&Vec<Value>>) -> Vec<&str> {
    templates
        .into_iter()
        .flatten()
        .filter_map(|t| t["metadata"]["name"].as_str())
        .collect()
}

#[async_trait]
impl ResourceInterceptor for StatefulSetInterceptor {
    fn name(&self) -> &'static str {
        "StatefulSetInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()> {
        let statefulsets: Vec<ObjectKey> = resources
            .by_kind("StatefulSet")
            .into_iter()
            .map(|sts| {
                let mut key = ObjectKey::of(sts);
                key.namespace = resolve_namespace(sts, namespace).to_string();
                key
            })
            .collect();

        for key in statefulsets {
            let Some(live) = self.client.get(&key).await? else {
                continue;
            };
            let Some(live_templates) = claim_templates(&live.data) else {
                continue;
            };
            let Some(mut desired) = resources.get_mut(&key.kind, &key.name, &key.namespace) else {
                continue;
            };

            let live_names = template_names(Some(live_templates));
            let desired_names = template_names(claim_templates(&desired.data));
            if live_names != desired_names {
                warn!(
                    resource = %key,
                    live = ?live_names,
                    desired = ?desired_names,
                    "Volume claim templates cannot change, keeping the live ones"
                );
            } else {
                debug!(resource = %key, "Keeping live volume claim templates");
            }

            if !desired.data["spec"].is_object() {
                desired.data["spec"] = Value::Object(serde_json::Map::new());
            }
            desired.data["spec"]["volumeClaimTemplates"] = Value::Array(live_templates.clone());
        }
        Ok(())
    }
}
