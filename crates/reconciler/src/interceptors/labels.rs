use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::error::Result;
use crate::kubernetes::{ResourceInterceptor, ResourceList};

pub const MANAGED_BY_LABEL: &str = "reconciler.cto.dev/managed-by";
pub const MANAGED_BY_VALUE: &str = "component-reconciler";
pub const ORIGIN_VERSION_LABEL: &str = "reconciler.cto.dev/origin-version";

/// Marks every resource as managed by the reconciler and records the version it came from.
pub struct LabelsInterceptor {
    version: String,
}

impl LabelsInterceptor {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[async_trait]
impl ResourceInterceptor for LabelsInterceptor {
    fn name(&self) -> &'static str {
        "LabelsInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, _namespace: &str) -> Result<()> {
        resources.for_each_mut(|resource| {
            set_label(resource, MANAGED_BY_LABEL, MANAGED_BY_VALUE);
            set_label(resource, ORIGIN_VERSION_LABEL, &self.version);
        });
        Ok(())
    }
}

pub(crate) fn set_label(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}
