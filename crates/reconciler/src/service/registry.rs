//! Component reconcilers known to the process, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::reconciler::ComponentReconciler;
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};

/// Reconciler used for components without a dedicated registration.
pub const BASE_COMPONENT: &str = "base";

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    reconcilers: HashMap<String, Arc<ComponentReconciler>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add `reconciler`. Names are unique.
    pub fn register(&mut self, mut reconciler: ComponentReconciler) -> Result<()> {
        reconciler.validate()?;
        let name = reconciler.name().to_string();
        if self.reconcilers.contains_key(&name) {
            return Err(Error::Config(format!(
                "component reconciler '{name}' is already registered"
            )));
        }
        self.reconcilers.insert(name, Arc::new(reconciler));
        Ok(())
    }

    pub fn get(&self, component: &str) -> Option<Arc<ComponentReconciler>> {
        self.reconcilers.get(component).cloned()
    }

    /// The reconciler for `component`, falling back to the base reconciler.
    pub fn resolve(&self, component: &str) -> Result<Arc<ComponentReconciler>> {
        self.get(component)
            .or_else(|| self.get(BASE_COMPONENT))
            .ok_or_else(|| Error::UnknownComponent(component.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.reconcilers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.reconcilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reconcilers.is_empty()
    }

    /// One reconciler per configured component plus the base reconciler.
    pub fn from_config(config: &ReconcilerConfig) -> Result<Self> {
        let mut registry = Self::new();

        let reconciler_for = |name: &str| {
            ComponentReconciler::new(name)
                .with_retry(config.retry.max_retries, config.retry_delay())
                .with_timeout(config.task_timeout())
                .with_heartbeat_config(config.heartbeat_config())
                .with_tracker_config(config.tracker_config())
        };

        for (name, component) in &config.components {
            let max_retries = component.max_retries.unwrap_or(config.retry.max_retries);
            let retry_delay = component
                .retry_delay_seconds
                .map_or_else(|| config.retry_delay(), std::time::Duration::from_secs);

            registry.register(
                reconciler_for(name)
                    .with_dependencies(component.dependencies.iter().cloned())
                    .with_retry(max_retries, retry_delay),
            )?;
        }

        if registry.get(BASE_COMPONENT).is_none() {
            registry.register(reconciler_for(BASE_COMPONENT))?;
        }

        info!(components = ?registry.names(), "Component reconcilers registered");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;
    use std::time::Duration;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentReconciler::new("istio")).unwrap();
        let err = registry.register(ComponentReconciler::new("istio")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_falls_back_to_base() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentReconciler::new("istio")).unwrap();
        assert!(matches!(
            registry.resolve("monitoring"),
            Err(Error::UnknownComponent(name)) if name == "monitoring"
        ));

        registry.register(ComponentReconciler::new(BASE_COMPONENT)).unwrap();
        assert_eq!(registry.resolve("istio").unwrap().name(), "istio");
        assert_eq!(registry.resolve("monitoring").unwrap().name(), BASE_COMPONENT);
    }

    #[test]
    fn from_config_applies_component_overrides() {
        let mut config = ReconcilerConfig::default();
        config.components.insert(
            "istio".to_string(),
            ComponentConfig {
                dependencies: vec!["cluster-essentials".to_string()],
                max_retries: Some(8),
                retry_delay_seconds: Some(2),
            },
        );
        config.components.insert("monitoring".to_string(), ComponentConfig::default());

        let registry = ComponentRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), ["base", "istio", "monitoring"]);

        let istio = registry.get("istio").unwrap();
        assert_eq!(istio.dependencies(), ["cluster-essentials"]);
        assert_eq!(istio.max_retries(), 8);
        assert_eq!(istio.retry_delay(), Duration::from_secs(2));

        let monitoring = registry.get("monitoring").unwrap();
        assert_eq!(monitoring.max_retries(), config.retry.max_retries);
        assert_eq!(monitoring.timeout(), config.task_timeout());
    }
}
