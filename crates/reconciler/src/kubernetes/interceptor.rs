//! Interceptor contracts run over a manifest batch before it is applied.

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::debug;

use super::{kind, name, namespace, ResourceList};
use crate::error::{Error, Result};

/// Mutates the whole batch; may consult the live cluster.
#[async_trait]
pub trait ResourceInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()>;
}

/// Outcome of a single-resource interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptionResult {
    Continue,
    /// Drop the resource from the batch without applying it
    IgnoreResource,
    /// Stop the whole batch
    Abort,
}

/// Decides about one resource at a time.
#[async_trait]
pub trait SingleResourceInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn intercept(
        &self,
        resource: &DynamicObject,
        namespace: &str,
    ) -> Result<InterceptionResult>;
}

/// Runs a [`SingleResourceInterceptor`] over every resource of a batch.
pub struct PerResource<T>(pub T);

#[async_trait]
impl<T: SingleResourceInterceptor> ResourceInterceptor for PerResource<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn intercept(&self, resources: &mut ResourceList, target_ns: &str) -> Result<()> {
        let mut ignored = Vec::new();

        for resource in resources.iter() {
            match self.0.intercept(resource, target_ns).await? {
                InterceptionResult::Continue => {}
                InterceptionResult::IgnoreResource => ignored.push((
                    kind(resource).to_string(),
                    name(resource).to_string(),
                    namespace(resource).to_string(),
                )),
                InterceptionResult::Abort => {
                    return Err(Error::Other(format!(
                        "processing aborted at {} '{}'",
                        kind(resource),
                        name(resource)
                    )))
                }
            }
        }

        for (kind, name, ns) in ignored {
            debug!(interceptor = self.0.name(), kind = %kind, name = %name, "Ignoring resource");
            resources.remove(&kind, &name, &ns);
        }
        Ok(())
    }
}

/// Run interceptors in order; the first failure aborts the batch.
pub async fn run_all(
    interceptors: &[std::sync::Arc<dyn ResourceInterceptor>],
    resources: &mut ResourceList,
    namespace: &str,
) -> Result<()> {
    for interceptor in interceptors {
        debug!(interceptor = interceptor.name(), "Running interceptor");
        interceptor
            .intercept(resources, namespace)
            .await
            .map_err(|source| Error::Interceptor {
                interceptor: interceptor.name(),
                source: Box::new(source),
            })?;
    }
    Ok(())
}
