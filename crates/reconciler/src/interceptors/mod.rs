//! Standard resource interceptors.
//!
//! [`default_pipeline`] returns the interceptors the install action runs on every deploy,
//! in the order they must run. [`NoUpdateInterceptor`] is opt-in and can be appended by
//! reconcilers of components whose Pods and claims must never be touched once they exist.

pub mod annotations;
pub mod cluster_wide;
pub mod finalizer;
pub mod hpa;
pub mod labels;
pub mod namespace;
pub mod no_update;
pub mod pvc;
pub mod services;
pub mod statefulset;

use std::sync::Arc;

use crate::kubernetes::{KubeClient, PerResource, ResourceInterceptor};

pub use annotations::AnnotationsInterceptor;
pub use cluster_wide::ClusterWideResourceInterceptor;
pub use finalizer::FinalizerInterceptor;
pub use hpa::HpaInterceptor;
pub use labels::{LabelsInterceptor, MANAGED_BY_LABEL, MANAGED_BY_VALUE, ORIGIN_VERSION_LABEL};
pub use namespace::NamespaceInterceptor;
pub use no_update::NoUpdateInterceptor;
pub use pvc::PvcInterceptor;
pub use services::ServicesInterceptor;
pub use statefulset::StatefulSetInterceptor;

/// Interceptors applied to every reconcile of `version`.
pub fn default_pipeline(
    client: &Arc<dyn KubeClient>,
    version: &str,
) -> Vec<Arc<dyn ResourceInterceptor>> {
    vec![
        Arc::new(LabelsInterceptor::new(version)),
        Arc::new(AnnotationsInterceptor),
        Arc::new(NamespaceInterceptor::new()),
        Arc::new(ClusterWideResourceInterceptor),
        Arc::new(FinalizerInterceptor::new(client.clone())),
        Arc::new(ServicesInterceptor::new(client.clone())),
        Arc::new(HpaInterceptor::new(client.clone())),
        Arc::new(PvcInterceptor::new(client.clone())),
        Arc::new(StatefulSetInterceptor::new(client.clone())),
    ]
}

/// The no-update interceptor lifted into the batch contract.
pub fn no_update_interceptor(client: &Arc<dyn KubeClient>) -> Arc<dyn ResourceInterceptor> {
    Arc::new(PerResource(NoUpdateInterceptor::new(client.clone())))
}
