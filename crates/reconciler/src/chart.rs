//! Chart provider: where the manifests of a component version come from.
//!
//! The runtime only depends on the [`ChartProvider`] contract. The bundled
//! [`WorkspaceChartProvider`] serves manifests from a directory tree:
//!
//! ```text
//! <root>/<version>/<component>.yaml         manifest of a component
//! <root>/<version>/<component>.values.yaml  default configuration (optional)
//! <root>/<version>/crds/*.yaml              CRDs of the version
//! ```
//!
//! Placeholders like `{{ .Values.global.domain }}` in a component manifest are filled
//! from its default configuration merged with the task's overrides.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Rendered manifest of one chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub manifest: String,
}

/// A component to render, with its per-task configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub name: String,
    pub version: String,
    pub profile: String,
    pub namespace: String,
    pub url: String,
    configuration: HashMap<String, Value>,
}

impl Component {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: HashMap<String, Value>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Overrides as a nested map; `a.b.c = v` becomes `{"a": {"b": {"c": v}}}`.
    pub fn configuration(&self) -> Value {
        let mut keys: Vec<&String> = self.configuration.keys().collect();
        keys.sort();

        let mut result = Value::Object(Map::new());
        for key in keys {
            let nested = key
                .rsplit('.')
                .fold(self.configuration[key].clone(), |value, token| {
                    let mut map = Map::new();
                    map.insert(token.to_string(), value);
                    Value::Object(map)
                });
            merge_values(&mut result, nested);
        }
        result
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Deep-merge `overlay` into `base`; overlay values win.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Source of component manifests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChartProvider: Send + Sync {
    async fn render_manifest(&self, component: &Component) -> Result<Manifest>;

    /// CRD manifests shipped with `version`.
    async fn render_crd(&self, version: &str) -> Result<Vec<Manifest>>;

    /// Default values merged with the component's overrides.
    async fn configuration(&self, component: &Component) -> Result<Value>;
}

/// Serves component manifests from a workspace directory.
pub struct WorkspaceChartProvider {
    root: PathBuf,
}

impl WorkspaceChartProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Chart(format!(
                "workspace directory '{}' does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    async fn read(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ChartProvider for WorkspaceChartProvider {
    async fn render_manifest(&self, component: &Component) -> Result<Manifest> {
        let path = self
            .version_dir(&component.version)
            .join(format!("{}.yaml", component.name));
        debug!(path = %path.display(), "Reading component manifest");

        let template = Self::read(&path).await?.ok_or_else(|| {
            Error::Chart(format!(
                "no manifest for component '{}' in version '{}'",
                component.name, component.version
            ))
        })?;
        let values = self.configuration(component).await?;
        Ok(Manifest {
            name: component.name.clone(),
            manifest: substitute(&template, &values)?,
        })
    }

    async fn render_crd(&self, version: &str) -> Result<Vec<Manifest>> {
        let dir = self.version_dir(version).join("crds");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut manifests = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let manifest = tokio::fs::read_to_string(&path).await?;
            manifests.push(Manifest { name, manifest });
        }
        Ok(manifests)
    }

    async fn configuration(&self, component: &Component) -> Result<Value> {
        let path = self
            .version_dir(&component.version)
            .join(format!("{}.values.yaml", component.name));
        let mut values = match Self::read(&path).await? {
            Some(content) => serde_yaml::from_str::<Value>(&content)?,
            None => Value::Object(Map::new()),
        };
        if values.is_null() {
            values = Value::Object(Map::new());
        }
        merge_values(&mut values, component.configuration());
        Ok(values)
    }
}

/// Replace `{{ .Values.<path> }}` placeholders; other `{{ }}` blocks are kept as-is.
fn substitute(template: &str, values: &Value) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        let end = start + len + 2;
        rendered.push_str(&rest[..start]);
        match rest[start + 2..start + len].trim().strip_prefix(".Values.") {
            Some(path) => rendered.push_str(&lookup(values, path)?),
            None => rendered.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn lookup(values: &Value, path: &str) -> Result<String> {
    let value = path
        .split('.')
        .try_fold(values, |value, key| value.get(key))
        .ok_or_else(|| Error::Chart(format!("value '{path}' is not set")))?;
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Creates the process-wide chart provider on first use.
pub struct WorkspaceFactory {
    root: PathBuf,
    provider: Mutex<Option<Arc<dyn ChartProvider>>>,
}

impl WorkspaceFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            provider: Mutex::new(None),
        }
    }

    /// A factory that always hands out `provider`.
    pub fn with_provider(provider: Arc<dyn ChartProvider>) -> Self {
        Self {
            root: PathBuf::new(),
            provider: Mutex::new(Some(provider)),
        }
    }

    pub fn provider(&self) -> Result<Arc<dyn ChartProvider>> {
        let mut guard = self.provider.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = guard.as_ref() {
            return Ok(provider.clone());
        }

        debug!(root = %self.root.display(), "Creating workspace chart provider");
        let provider: Arc<dyn ChartProvider> = Arc::new(WorkspaceChartProvider::new(&self.root)?);
        *guard = Some(provider.clone());
        Ok(provider)
    }
}
