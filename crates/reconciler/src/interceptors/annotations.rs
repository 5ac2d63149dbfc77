use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::kubernetes::{ResourceInterceptor, ResourceList};

pub const DISCLAIMER_ANNOTATION: &str = "reconciler.cto.dev/managed-by-reconciler-disclaimer";

pub const DISCLAIMER: &str = "DO NOT EDIT - This resource is managed by the component reconciler.\n\
Any modifications are discarded and the resource is reverted to the original state.";

pub struct AnnotationsInterceptor;

#[async_trait]
impl ResourceInterceptor for AnnotationsInterceptor {
    fn name(&self) -> &'static str {
        "AnnotationsInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, _namespace: &str) -> Result<()> {
        resources.for_each_mut(|resource| {
            resource
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(DISCLAIMER_ANNOTATION.to_string(), DISCLAIMER.to_string());
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::object;

    #[tokio::test]
    async fn disclaimer_is_added() {
        let mut list = ResourceList::new(vec![object("v1", "ConfigMap", "settings", "apps")]);
        AnnotationsInterceptor
            .intercept(&mut list, "apps")
            .await
            .unwrap();
        let annotations = list.iter().next().unwrap().metadata.annotations.clone().unwrap();
        assert_eq!(annotations[DISCLAIMER_ANNOTATION], DISCLAIMER);
    }
}
