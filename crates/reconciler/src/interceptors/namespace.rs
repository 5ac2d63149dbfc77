use std::collections::BTreeMap;

use async_trait::async_trait;

use super::labels::set_label;
use crate::error::Result;
use crate::kubernetes::{name, ResourceInterceptor, ResourceList};

pub const NAME_LABEL: &str = "name";

/// Labels Namespace documents with their own name plus a configured label set.
#[derive(Default)]
pub struct NamespaceInterceptor {
    labels: BTreeMap<String, String>,
}

impl NamespaceInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ResourceInterceptor for NamespaceInterceptor {
    fn name(&self) -> &'static str {
        "NamespaceInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, _namespace: &str) -> Result<()> {
        resources.visit_kind_mut("Namespace", |ns| {
            let ns_name = name(ns).to_string();
            set_label(ns, NAME_LABEL, &ns_name);
            for (key, value) in &self.labels {
                set_label(ns, key, value);
            }
        });
        Ok(())
    }
}
