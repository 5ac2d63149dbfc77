//! Default main action: render the component and apply or delete it.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::action::{Action, ActionContext};
use crate::error::{Error, Result};
use crate::interceptors::default_pipeline;
use crate::kubernetes::manifest;
use crate::model::{OperationType, CRD_COMPONENT};

/// Deploys the rendered manifest through the standard interceptors, or deletes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Install;

impl Install {
    async fn render(ctx: &ActionContext) -> Result<String> {
        let task = &ctx.task;

        if task.component == CRD_COMPONENT {
            let crds = ctx.chart_provider.render_crd(&task.version).await.map_err(|e| {
                error!(version = %task.version, error = %e, "Failed to get CRD manifests");
                Error::Chart(format!(
                    "failed to get CRD manifests for version '{}': {e}",
                    task.version
                ))
            })?;
            let manifests: Vec<&str> = crds.iter().map(|m| m.manifest.as_str()).collect();
            return Ok(manifest::merge(&manifests));
        }

        let rendered = ctx
            .chart_provider
            .render_manifest(&ctx.component())
            .await
            .map_err(|e| {
                let mut msg = format!(
                    "failed to get manifest for component '{}' in version '{}'",
                    task.component, task.version
                );
                if !task.repository.url.is_empty() {
                    msg.push_str(&format!(" using repository '{}'", task.repository.url));
                }
                error!(error = %e, "{msg}");
                Error::Chart(format!("{msg}: {e}"))
            })?;
        Ok(rendered.manifest)
    }
}

#[async_trait]
impl Action for Install {
    fn name(&self) -> &str {
        "install"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<()> {
        let task = &ctx.task;

        if task.operation == OperationType::Delete && task.component == CRD_COMPONENT {
            debug!("CRDs are never deleted");
            return Ok(());
        }

        debug!(install_crd = task.install_crd, "Rendering component manifest");
        let manifest = Self::render(ctx).await?;

        match task.operation {
            OperationType::Reconcile => {
                let mut interceptors = default_pipeline(&ctx.kube_client, &task.version);
                interceptors.extend(ctx.interceptors.iter().cloned());

                match ctx
                    .engine
                    .deploy(&ctx.cancel, &manifest, &task.namespace, &interceptors)
                    .await
                {
                    Ok(resources) => {
                        info!(resources = resources.len(), "Deployment of manifest finished");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to deploy manifest on target cluster");
                        Err(e)
                    }
                }
            }
            OperationType::Delete => {
                match ctx.engine.delete(&ctx.cancel, &manifest, &task.namespace).await {
                    Ok(resources) => {
                        info!(resources = resources.len(), "Deletion of manifest finished");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to delete manifest on target cluster");
                        Err(e)
                    }
                }
            }
        }
    }
}
