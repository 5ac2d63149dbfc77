use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::kubernetes::resources::resolve_namespace;
use crate::kubernetes::{KubeClient, ObjectKey, ResourceInterceptor, ResourceList};

/// Claims cannot shrink: a requested size below the live one is snapped back to the live size.
pub struct PvcInterceptor {
    client: Arc<dyn KubeClient>,
}

impl PvcInterceptor {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

fn storage_request(obj: &Value) -> Option<&str> {
    obj["spec"]["resources"]["requests"]["storage"].as_str()
}

#[async_trait]
impl ResourceInterceptor for PvcInterceptor {
    fn name(&self) -> &'static str {
        "PvcInterceptor"
    }

    async fn intercept(&self, resources: &mut ResourceList, namespace: &str) -> Result<()> {
        let claims: Vec<ObjectKey> = resources
            .by_kind("PersistentVolumeClaim")
            .into_iter()
            .map(|pvc| {
                let mut key = ObjectKey::of(pvc);
                key.namespace = resolve_namespace(pvc, namespace).to_string();
                key
            })
            .collect();

        for key in claims {
            let Some(live) = self.client.get(&key).await? else {
                continue;
            };
            let Some(live_size) = storage_request(&live.data).map(ToString::to_string) else {
                continue;
            };
            let Some(mut desired) = resources.get_mut(&key.kind, &key.name, &key.namespace) else {
                continue;
            };
            let Some(desired_size) = storage_request(&desired.data) else {
                continue;
            };

            match (parse_quantity(desired_size), parse_quantity(&live_size)) {
                (Some(wanted), Some(current)) if wanted < current => {
                    info!(
                        resource = %key,
                        desired = %desired_size,
                        live = %live_size,
                        "Claims cannot shrink, keeping live storage request"
                    );
                    desired.data["spec"]["resources"]["requests"]["storage"] =
                        Value::String(live_size);
                }
                (Some(_), Some(_)) => {}
                _ => warn!(
                    resource = %key,
                    desired = %desired_size,
                    live = %live_size,
                    "Unable to compare storage requests"
                ),
            }
        }
        Ok(())
    }
}

/// Parse a Kubernetes resource quantity (`1Gi`, `500M`, `1.5e3`, `100m`) into a number.
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let bytes = quantity.as_bytes();
    // an `e`/`E` followed by a digit or sign is a decimal exponent, not the exa suffix
    let split = (0..bytes.len())
        .find(|&i| {
            let c = bytes[i];
            c.is_ascii_alphabetic()
                && !(matches!(c, b'e' | b'E')
                    && bytes
                        .get(i + 1)
                        .is_some_and(|next| next.is_ascii_digit() || matches!(next, b'+' | b'-')))
        })
        .unwrap_or(bytes.len());
    let (number, suffix) = quantity.split_at(split);

    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => return None,
    };
    number.parse::<f64>().ok().map(|n| n * multiplier)
}
