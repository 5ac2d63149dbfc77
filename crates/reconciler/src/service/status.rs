//! Reconciliation summary kept in a ConfigMap next to the component.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tracing::debug;

use crate::error::Result;
use crate::interceptors::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, ORIGIN_VERSION_LABEL};
use crate::kubernetes::{from_typed, get_typed, KubeClient, ObjectKey};
use crate::model::{Status, Task};

pub const SUMMARY_LABEL: &str = "reconciler.cto.dev/reconciliation-summary";

const DEFAULT_NAMESPACE: &str = "default";

pub fn config_map_name(component: &str) -> String {
    format!("{}-status", component.to_lowercase())
}

/// Create or update the summary of `task`. Skipped while its namespace does not exist.
pub async fn record(client: &dyn KubeClient, task: &Task, status: Status) -> Result<()> {
    let namespace = if task.namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        task.namespace.as_str()
    };

    let namespace_key = ObjectKey::new("v1", "Namespace", namespace, "");
    if client.get(&namespace_key).await?.is_none() {
        debug!(namespace, "Namespace not found, skipping status ConfigMap");
        return Ok(());
    }

    let name = config_map_name(&task.component);
    let key = ObjectKey::new("v1", "ConfigMap", &name, namespace);

    let mut data = BTreeMap::from([
        ("name".to_string(), task.component.clone()),
        ("version".to_string(), task.version.clone()),
        ("status".to_string(), status.to_string()),
    ]);
    if !matches!(status, Status::Running | Status::NotStarted) {
        data.insert(
            "last-reconciliation".to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
    }

    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (ORIGIN_VERSION_LABEL.to_string(), task.version.clone()),
        (SUMMARY_LABEL.to_string(), "true".to_string()),
    ]);

    match get_typed::<ConfigMap>(client, &key).await? {
        None => {
            let config_map = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(namespace.to_string()),
                    labels: Some(labels),
                    ..ObjectMeta::default()
                },
                data: Some(data),
                ..ConfigMap::default()
            };
            client.create(&from_typed(&config_map)?).await?;
            debug!(resource = %key, "Status ConfigMap created");
        }
        Some(mut config_map) => {
            config_map
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels);
            config_map.data.get_or_insert_with(BTreeMap::new).extend(data);
            client.replace(&from_typed(&config_map)?).await?;
            debug!(resource = %key, "Status ConfigMap updated");
        }
    }
    Ok(())
}
