use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::kubernetes::{api_version, kind, name, ResourceInterceptor, ResourceList};

/// Cluster-scoped kinds by API group.
const CLUSTER_WIDE_KINDS: &[(&str, &str)] = &[
    ("rbac.authorization.k8s.io", "ClusterRole"),
    ("rbac.authorization.k8s.io", "ClusterRoleBinding"),
    ("admissionregistration.k8s.io", "MutatingWebhookConfiguration"),
    ("admissionregistration.k8s.io", "ValidatingWebhookConfiguration"),
    ("policy", "PodSecurityPolicy"),
    ("apiextensions.k8s.io", "CustomResourceDefinition"),
    ("scheduling.k8s.io", "PriorityClass"),
    ("storage.k8s.io", "StorageClass"),
];

/// Clears the namespace of cluster-scoped resources; the API server rejects them otherwise.
pub struct ClusterWideResourceInterceptor;

fn is_cluster_wide(api_version: &str, kind: &str) -> bool {
    let Some((group, _version)) = api_version.split_once('/') else {
        return false;
    };
    CLUSTER_WIDE_KINDS
        .iter()
        .any(|(g, k)| *g == group && *k == kind)
}

#[async_trait]
impl ResourceInterceptor for ClusterWideResourceInterceptor {
    fn name(&self) -> &'static str {
        "ClusterWideResourceInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, _namespace: &str) -> Result<()> {
        resources.for_each_mut(|resource| {
            if resource.metadata.namespace.is_some()
                && is_cluster_wide(api_version(resource), kind(resource))
            {
                debug!(
                    kind = kind(resource),
                    name = name(resource),
                    "Clearing namespace of cluster-wide resource"
                );
                resource.metadata.namespace = None;
            }
        });
        Ok(())
    }
}
