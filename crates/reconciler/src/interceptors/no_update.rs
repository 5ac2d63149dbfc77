use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{kind, InterceptionResult, KubeClient, ObjectKey, SingleResourceInterceptor};

/// Leaves existing Pods and claims alone instead of disrupting them.
pub struct NoUpdateInterceptor {
    client: Arc<dyn KubeClient>,
}

impl NoUpdateInterceptor {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SingleResourceInterceptor for NoUpdateInterceptor {
    fn name(&self) -> &'static str {
        "NoUpdateInterceptor"
    }

    async fn intercept(
        &self,
        resource: &DynamicObject,
        namespace: &str,
    ) -> Result<InterceptionResult> {
        if !matches!(kind(resource), "Pod" | "PersistentVolumeClaim") {
            return Ok(InterceptionResult::Continue);
        }

        let mut key = ObjectKey::of(resource);
        key.namespace = resolve_namespace(resource, namespace).to_string();
        Ok(if self.client.get(&key).await?.is_some() {
            InterceptionResult::IgnoreResource
        } else {
            InterceptionResult::Continue
        })
    }
}
