//! Ordered set of not-yet-applied manifest documents.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use kube::api::DynamicObject;

use super::{kind, name, namespace};

/// Documents of one reconciliation in declaration order with a lower-cased kind index.
///
/// Every mutation rebuilds the index from the ordered list, so both always agree.
/// Mutable access goes through visitors or [`ResourceMut`], which reindex afterwards.
/// Lookups treat an empty namespace on a stored document as matching any namespace.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    items: Vec<DynamicObject>,
    by_kind: HashMap<String, Vec<usize>>,
}

impl ResourceList {
    pub fn new(items: Vec<DynamicObject>) -> Self {
        let mut list = Self {
            items,
            by_kind: HashMap::new(),
        };
        list.reindex();
        list
    }

    fn reindex(&mut self) {
        self.by_kind.clear();
        for (position, obj) in self.items.iter().enumerate() {
            self.by_kind
                .entry(kind(obj).to_lowercase())
                .or_default()
                .push(position);
        }
    }

    fn position(&self, kind: &str, name: &str, namespace: &str) -> Option<usize> {
        self.by_kind
            .get(&kind.to_lowercase())?
            .iter()
            .copied()
            .find(|&pos| matches(&self.items[pos], name, namespace))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynamicObject> {
        self.items.iter()
    }

    /// Apply `visit` to every document in declaration order.
    pub fn for_each_mut<F>(&mut self, visit: F)
    where
        F: FnMut(&mut DynamicObject),
    {
        self.items.iter_mut().for_each(visit);
        self.reindex();
    }

    /// Documents of `kind` (case-insensitive) in declaration order.
    pub fn by_kind(&self, kind: &str) -> Vec<&DynamicObject> {
        self.by_kind
            .get(&kind.to_lowercase())
            .map(|positions| positions.iter().map(|&pos| &self.items[pos]).collect())
            .unwrap_or_default()
    }

    /// Apply `visit` to every document of `kind`.
    pub fn visit_kind_mut<F>(&mut self, kind: &str, mut visit: F)
    where
        F: FnMut(&mut DynamicObject),
    {
        if let Some(positions) = self.by_kind.get(&kind.to_lowercase()) {
            for &pos in positions {
                visit(&mut self.items[pos]);
            }
        }
        self.reindex();
    }

    pub fn get(&self, kind: &str, name: &str, namespace: &str) -> Option<&DynamicObject> {
        self.position(kind, name, namespace)
            .map(|pos| &self.items[pos])
    }

    pub fn get_mut(&mut self, kind: &str, name: &str, namespace: &str) -> Option<ResourceMut<'_>> {
        let pos = self.position(kind, name, namespace)?;
        let kind = self::kind(&self.items[pos]).to_string();
        Some(ResourceMut {
            list: self,
            pos,
            kind,
        })
    }

    pub fn contains(&self, kind: &str, name: &str, namespace: &str) -> bool {
        self.position(kind, name, namespace).is_some()
    }

    /// Append a document, replacing an existing one with the same identity in place.
    pub fn add(&mut self, obj: DynamicObject) {
        let existing = self.items.iter().position(|item| same_identity(item, &obj));
        match existing {
            Some(pos) => self.items[pos] = obj,
            None => self.items.push(obj),
        }
        self.reindex();
    }

    /// Put a document in front of all others.
    pub fn prepend(&mut self, obj: DynamicObject) {
        self.items.retain(|item| !same_identity(item, &obj));
        self.items.insert(0, obj);
        self.reindex();
    }

    /// Remove the document with the given identity; returns it if present.
    pub fn remove(&mut self, kind: &str, name: &str, namespace: &str) -> Option<DynamicObject> {
        let pos = self.items.iter().position(|item| {
            self::kind(item).eq_ignore_ascii_case(kind)
                && self::name(item) == name
                && self::namespace(item) == namespace
        })?;
        let removed = self.items.remove(pos);
        self.reindex();
        Some(removed)
    }

    pub fn into_vec(self) -> Vec<DynamicObject> {
        self.items
    }
}

/// Mutable borrow of one document of a [`ResourceList`].
///
/// Rebuilds the kind index on drop when the document's kind was changed.
pub struct ResourceMut<'a> {
    list: &'a mut ResourceList,
    pos: usize,
    kind: String,
}

impl Deref for ResourceMut<'_> {
    type Target = DynamicObject;

    fn deref(&self) -> &DynamicObject {
        &self.list.items[self.pos]
    }
}

impl DerefMut for ResourceMut<'_> {
    fn deref_mut(&mut self) -> &mut DynamicObject {
        &mut self.list.items[self.pos]
    }
}

impl Drop for ResourceMut<'_> {
    fn drop(&mut self) {
        if kind(&self.list.items[self.pos]) != self.kind {
            self.list.reindex();
        }
    }
}

fn matches(obj: &DynamicObject, name: &str, namespace: &str) -> bool {
    let candidate_ns = self::namespace(obj);
    self::name(obj) == name && (candidate_ns.is_empty() || candidate_ns == namespace)
}

fn same_identity(a: &DynamicObject, b: &DynamicObject) -> bool {
    kind(a).eq_ignore_ascii_case(kind(b)) && name(a) == name(b) && namespace(a) == namespace(b)
}

/// Namespace of `obj`, or `fallback` when it declares none.
pub fn resolve_namespace<'a>(obj: &'a DynamicObject, fallback: &'a str) -> &'a str {
    let ns = namespace(obj);
    if ns.is_empty() {
        fallback
    } else {
        ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::object;

    fn sample() -> ResourceList {
        ResourceList::new(vec![
            object("v1", "Namespace", "apps", ""),
            object("apps/v1", "Deployment", "web", "apps"),
            object("v1", "Service", "web", ""),
            object("apps/v1", "Deployment", "worker", "apps"),
        ])
    }

    #[test]
    fn kind_lookup_is_case_insensitive_and_ordered() {
        let list = sample();
        let names: Vec<&str> = list.by_kind("DEPLOYMENT").iter().map(|o| name(o)).collect();
        assert_eq!(names, vec!["web", "worker"]);
        assert!(list.by_kind("ConfigMap").is_empty());
    }

    #[test]
    fn empty_candidate_namespace_is_a_wildcard() {
        let list = sample();
        assert!(list.get("service", "web", "anything").is_some());
        assert!(list.get("Deployment", "web", "apps").is_some());
        assert!(list.get("Deployment", "web", "other").is_none());
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut list = sample();
        assert!(list.remove("Deployment", "web", "apps").is_some());
        assert_eq!(list.len(), 3);
        let names: Vec<&str> = list.by_kind("deployment").iter().map(|o| name(o)).collect();
        assert_eq!(names, vec!["worker"]);
        assert!(list.get("Service", "web", "apps").is_some());
        assert!(list.remove("Deployment", "web", "apps").is_none());
    }

    #[test]
    fn add_replaces_existing_in_place() {
        let mut list = sample();
        let mut updated = object("apps/v1", "Deployment", "web", "apps");
        updated.data["spec"] = serde_json::json!({"replicas": 7});
        list.add(updated);

        assert_eq!(list.len(), 4);
        assert_eq!(name(list.iter().nth(1).unwrap()), "web");
        assert_eq!(
            list.get("Deployment", "web", "apps").unwrap().data["spec"]["replicas"],
            7
        );

        list.add(object("v1", "ConfigMap", "settings", "apps"));
        assert_eq!(list.len(), 5);
        assert_eq!(list.by_kind("configmap").len(), 1);
    }

    #[test]
    fn changing_a_kind_keeps_index_consistent() {
        let mut list = sample();
        list.for_each_mut(|obj| {
            if name(obj) == "worker" {
                obj.types.as_mut().unwrap().kind = "StatefulSet".to_string();
            }
        });
        let names: Vec<&str> = list.by_kind("Deployment").iter().map(|o| name(o)).collect();
        assert_eq!(names, vec!["web"]);
        assert!(list.get("StatefulSet", "worker", "apps").is_some());

        {
            let mut web = list.get_mut("Deployment", "web", "apps").unwrap();
            web.types.as_mut().unwrap().kind = "DaemonSet".to_string();
        }
        assert!(list.by_kind("deployment").is_empty());
        assert_eq!(list.by_kind("daemonset").len(), 1);

        list.visit_kind_mut("Service", |svc| {
            svc.types.as_mut().unwrap().kind = "Endpoints".to_string();
        });
        assert!(list.by_kind("Service").is_empty());
        assert!(list.get("Endpoints", "web", "apps").is_some());
    }

    #[test]
    fn prepend_moves_document_to_front() {
        let mut list = sample();
        list.prepend(object("v1", "Namespace", "extra", ""));
        assert_eq!(name(list.iter().next().unwrap()), "extra");
        assert_eq!(list.by_kind("Namespace").len(), 2);
    }

    #[test]
    fn resolve_namespace_falls_back() {
        let obj = object("v1", "ConfigMap", "x", "");
        assert_eq!(resolve_namespace(&obj, "default"), "default");
        let obj = object("v1", "ConfigMap", "x", "apps");
        assert_eq!(resolve_namespace(&obj, "default"), "apps");
    }
}
