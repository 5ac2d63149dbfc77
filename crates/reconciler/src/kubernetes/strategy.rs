//! Update strategy resolution per resource kind.

use std::fmt;

use kube::api::DynamicObject;
use tracing::warn;

use super::{kind, KubeClient, ObjectKey};
use crate::error::Result;

/// How an object that may already exist on the cluster gets applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Create if absent, otherwise leave the live object alone
    Skip,
    /// Three-way merge with the live object
    Patch,
    /// Overwrite the live object
    Replace,
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Patch => write!(f, "patch"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// Strategy of kinds that never need a live read.
pub fn static_strategy(kind: &str) -> Option<UpdateStrategy> {
    match kind {
        "Pod" | "Job" => Some(UpdateStrategy::Skip),
        "PersistentVolumeClaim" | "ServiceAccount" => Some(UpdateStrategy::Patch),
        "StatefulSet" => None,
        _ => Some(UpdateStrategy::Replace),
    }
}

pub struct UpdateStrategyResolver<'a> {
    client: &'a dyn KubeClient,
}

impl<'a> UpdateStrategyResolver<'a> {
    pub fn new(client: &'a dyn KubeClient) -> Self {
        Self { client }
    }

    /// Resolve the strategy for `obj`.
    ///
    /// StatefulSets are patched when the live object cannot be fetched or already owns
    /// volume claim templates, since replacing them would orphan bound storage.
    /// The live read is not atomic with the following write.
    pub async fn resolve(&self, obj: &DynamicObject) -> Result<UpdateStrategy> {
        if let Some(strategy) = static_strategy(kind(obj)) {
            return Ok(strategy);
        }

        let key = ObjectKey::of(obj);
        match self.client.get(&key).await {
            Ok(Some(live)) if has_volume_claim_templates(&live) => Ok(UpdateStrategy::Patch),
            Ok(Some(_)) => Ok(UpdateStrategy::Replace),
            Ok(None) => Ok(UpdateStrategy::Patch),
            Err(err) => {
                warn!(
                    resource = %key,
                    error = %err,
                    "Failed to read live StatefulSet, falling back to patch"
                );
                Ok(UpdateStrategy::Patch)
            }
        }
    }
}

fn has_volume_claim_templates(obj: &DynamicObject) -> bool {
    obj.data["spec"]["volumeClaimTemplates"]
        .as_array()
        .is_some_and(|templates| !templates.is_empty())
}
