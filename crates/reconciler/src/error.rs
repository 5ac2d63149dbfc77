//! Error types for the reconciliation runtime.

use kube::Error as KubeError;
use thiserror::Error;

use crate::progress::State;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while admitting, running or applying a reconciliation.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("Invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// A cluster call on one object failed
    #[error("Failed to {operation} {kind} '{name}' (namespace: '{namespace}'): {source}")]
    Resource {
        operation: &'static str,
        kind: String,
        name: String,
        namespace: String,
        source: Box<Error>,
    },

    #[error("Kind '{kind}' (apiVersion: '{api_version}') is not served by the cluster")]
    UnknownKind { api_version: String, kind: String },

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interceptor '{interceptor}' failed: {source}")]
    Interceptor {
        interceptor: &'static str,
        source: Box<Error>,
    },

    #[error("Progress tracker timed out after {timeout_secs} secs waiting for resources to become {state}")]
    ProgressTimeout { timeout_secs: u64, state: State },

    /// The surrounding context was cancelled (process shutdown)
    #[error("Context closed: {0}")]
    Cancelled(String),

    #[error("Reconciliation did not finish within {0} secs")]
    Timeout(u64),

    #[error("Component '{component}' is missing dependencies: {}", .missing.join(", "))]
    DependencyMissing {
        component: String,
        required: Vec<String>,
        missing: Vec<String>,
    },

    #[error("Worker pool is saturated: all {size} workers are busy")]
    PoolSaturated { size: usize },

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("No component reconciler registered for '{0}'")]
    UnknownComponent(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("Status change rejected: {0}")]
    StatusTransition(String),

    /// The original error plus a failure to report it
    #[error("{source} (heartbeat failed: {heartbeat})")]
    Heartbeat { source: Box<Error>, heartbeat: Box<Error> },

    #[error("{stage} action failed: {source}")]
    Action { stage: String, source: Box<Error> },

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a cluster error with the object it was raised for.
    pub fn resource(
        operation: &'static str,
        kind: &str,
        name: &str,
        namespace: &str,
        source: Error,
    ) -> Self {
        Self::Resource {
            operation,
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            source: Box::new(source),
        }
    }

    /// Attach a heartbeat delivery failure to this error.
    #[must_use]
    pub fn with_heartbeat(self, heartbeat: Error) -> Self {
        Self::Heartbeat {
            source: Box::new(self),
            heartbeat: Box::new(heartbeat),
        }
    }

    /// True if the API server answered 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kube(KubeError::Api(err)) => err.code == 404,
            Self::Resource { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True if the API server rejected the object as invalid (422).
    pub fn is_invalid(&self) -> bool {
        match self {
            Self::Kube(KubeError::Api(err)) => err.code == 422,
            Self::Resource { source, .. } => source.is_invalid(),
            _ => false,
        }
    }

    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, Self::UnknownKind { .. })
    }

    /// True if the error was caused by a closed context.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Resource { source, .. }
            | Self::Interceptor { source, .. }
            | Self::Heartbeat { source, .. }
            | Self::Action { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Errors that reject a task before any work is scheduled.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::DependencyMissing { .. }
                | Self::PoolSaturated { .. }
                | Self::PoolClosed
                | Self::UnknownComponent(_)
                | Self::InvalidTask(_)
        )
    }
}
