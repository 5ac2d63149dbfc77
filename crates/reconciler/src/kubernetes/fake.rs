//! In-memory cluster for unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::{json, Value};

use super::{ClientFactory, KubeClient, ObjectKey, PatchStrategy};
use crate::error::{Error, Result};

const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "PodSecurityPolicy",
    "PriorityClass",
    "StorageClass",
];

/// Build an unstructured object with an empty body.
pub fn object(api_version: &str, kind: &str, name: &str, namespace: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: json!({}),
    }
}

/// Build an unstructured object with the given body fields.
pub fn object_with(
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: &str,
    data: Value,
) -> DynamicObject {
    let mut obj = object(api_version, kind, name, namespace);
    obj.data = data;
    obj
}

type StoreKey = (String, String, String);

fn store_key(kind: &str, name: &str, namespace: &str) -> StoreKey {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<StoreKey, DynamicObject>,
    calls: Vec<String>,
    failing_gets: Vec<String>,
    failing_writes: Vec<String>,
    invalid_replaces: Vec<String>,
}

/// A cluster that keeps objects in a map and records every call.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if it already existed on the cluster.
    pub fn insert(&self, obj: DynamicObject) {
        let key = ObjectKey::of(&obj);
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(store_key(&key.kind, &key.name, &key.namespace), obj);
    }

    pub fn get_object(&self, kind: &str, name: &str, namespace: &str) -> Option<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&store_key(kind, name, namespace))
            .cloned()
    }

    pub fn remove(&self, kind: &str, name: &str, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&store_key(kind, name, namespace));
    }

    /// Calls in the order they were made, e.g. `delete Deployment/apps/web`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, verb: &str) -> Vec<String> {
        let prefix = format!("{verb} ");
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(ToString::to_string))
            .collect()
    }

    /// Make reads of `kind` fail with a server error.
    pub fn fail_gets_of(&self, kind: &str) {
        self.state.lock().unwrap().failing_gets.push(kind.to_string());
    }

    /// Make writes of `kind` fail with a server error.
    pub fn fail_writes_of(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .push(kind.to_string());
    }

    /// Make replaces of `kind` fail like an immutable-field violation.
    pub fn reject_replaces_of(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .invalid_replaces
            .push(kind.to_string());
    }

    fn record(&self, verb: &str, key: &ObjectKey) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("{verb} {key}"));
    }

    fn check_write(&self, kind: &str) -> Result<()> {
        if self.state.lock().unwrap().failing_writes.iter().any(|k| k == kind) {
            return Err(Error::Other(format!("injected write failure for {kind}")));
        }
        Ok(())
    }

    fn store(&self, obj: &DynamicObject) -> DynamicObject {
        let key = ObjectKey::of(obj);
        let mut state = self.state.lock().unwrap();
        let version = state.objects.len() + state.calls.len();
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(version.to_string());
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(format!("uid-{}", key));
        }
        state
            .objects
            .insert(store_key(&key.kind, &key.name, &key.namespace), stored.clone());
        stored
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn is_namespaced(&self, _api_version: &str, kind: &str) -> Result<bool> {
        Ok(!CLUSTER_SCOPED.contains(&kind))
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        if self.state.lock().unwrap().failing_gets.contains(&key.kind) {
            return Err(Error::Other(format!("injected read failure for {key}")));
        }
        Ok(self.get_object(&key.kind, &key.name, &key.namespace))
    }

    async fn list(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: &str,
        _label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && (namespace.is_empty() || ns == namespace))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        self.record("create", &key);
        self.check_write(&key.kind)?;
        if self.get_object(&key.kind, &key.name, &key.namespace).is_some() {
            return Err(Error::Other(format!("{key} already exists")));
        }
        Ok(self.store(obj))
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        self.record("apply", &key);
        self.check_write(&key.kind)?;
        Ok(self.store(obj))
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        self.record("replace", &key);
        self.check_write(&key.kind)?;
        if self.state.lock().unwrap().invalid_replaces.contains(&key.kind) {
            return Err(Error::resource(
                "replace",
                &key.kind,
                &key.name,
                &key.namespace,
                Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "field is immutable".to_string(),
                    reason: "Invalid".to_string(),
                    code: 422,
                })),
            ));
        }
        Ok(self.store(obj))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        self.record("delete", key);
        self.check_write(&key.kind)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .remove(&store_key(&key.kind, &key.name, &key.namespace))
            .is_some())
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &[u8],
        strategy: PatchStrategy,
    ) -> Result<DynamicObject> {
        self.record("patch", key);
        let mut live = self
            .get_object(&key.kind, &key.name, &key.namespace)
            .ok_or_else(|| Error::Other(format!("{key} not found")))?;
        let patch: Value = serde_json::from_slice(patch)?;
        match strategy {
            PatchStrategy::Json => json_patch(&mut live.data, &patch)?,
            _ => merge_json(&mut live.data, &patch),
        }
        Ok(self.store(&live))
    }
}

fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if key == "metadata" || key == "apiVersion" || key == "kind" {
                    continue;
                }
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_json(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Subset of RFC 6902 (`add`, `replace`, `remove`) on object paths.
fn json_patch(target: &mut Value, operations: &Value) -> Result<()> {
    let operations = operations
        .as_array()
        .ok_or_else(|| Error::Other("JSON patch must be an array".to_string()))?;
    for operation in operations {
        let path = operation["path"].as_str().unwrap_or_default();
        let (parent, leaf) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = target
            .pointer_mut(parent)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::Other(format!("JSON patch path {path} not found")))?;
        match operation["op"].as_str() {
            Some("add" | "replace") => {
                parent.insert(leaf.to_string(), operation["value"].clone());
            }
            Some("remove") => {
                parent.remove(leaf);
            }
            other => return Err(Error::Other(format!("unsupported JSON patch op {other:?}"))),
        }
    }
    Ok(())
}

/// Hands out the same fake cluster for every kubeconfig.
pub struct FakeClientFactory(pub FakeCluster);

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn connect(&self, _kubeconfig: &str) -> Result<Arc<dyn KubeClient>> {
        Ok(Arc::new(self.0.clone()))
    }
}
