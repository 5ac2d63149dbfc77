//! Reconciliation request and callback payloads.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Name of the pseudo component that installs the CRDs of a release.
pub const CRD_COMPONENT: &str = "CRDs";

/// Kind of work requested for a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    #[default]
    Reconcile,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile => write!(f, "reconcile"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Reconciliation status reported through callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    NotStarted,
    Running,
    Failed,
    Error,
    Success,
}

impl Status {
    /// `Error` and `Success` end a reconciliation.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Error | Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "notstarted",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single configuration override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Chart repository a component is rendered from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub url: String,
}

/// One reconciliation request for a component, version and namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub components_ready: Vec<String>,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub configuration: Vec<Configuration>,
    #[serde(default)]
    pub kubeconfig: String,
    #[serde(rename = "callbackURL", default)]
    pub callback_url: String,
    #[serde(rename = "installCRD", default)]
    pub install_crd: bool,
    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,
    #[serde(default)]
    pub repository: Repository,
    #[serde(rename = "type", default)]
    pub operation: OperationType,
}

impl Task {
    /// Trim and check the mandatory fields of a task received over HTTP.
    pub fn validate(&mut self) -> Result<()> {
        self.check_mandatory(true)
    }

    /// Same as [`Task::validate`] for tasks reporting to an in-process callback.
    pub fn validate_embedded(&mut self) -> Result<()> {
        self.check_mandatory(false)
    }

    fn check_mandatory(&mut self, callback_url_required: bool) -> Result<()> {
        let mut missing = Vec::new();

        for (field, value) in [
            ("Component", &mut self.component),
            ("Namespace", &mut self.namespace),
            ("Version", &mut self.version),
            ("Kubeconfig", &mut self.kubeconfig),
        ] {
            *value = value.trim().to_string();
            if value.is_empty() {
                missing.push(field);
            }
        }

        self.callback_url = self.callback_url.trim().to_string();
        if callback_url_required && self.callback_url.is_empty() {
            missing.push("CallbackURL");
        }

        self.correlation_id = self.correlation_id.trim().to_string();
        if self.correlation_id.is_empty() {
            missing.push("CorrelationID");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidTask(format!(
                "mandatory fields are undefined: {}",
                missing.join(", ")
            )))
        }
    }

    /// Configuration overrides as a map; later entries win.
    pub fn configuration_map(&self) -> HashMap<String, Value> {
        self.configuration
            .iter()
            .map(|c| (c.key.clone(), c.value.clone()))
            .collect()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task [component={}, version={}, namespace={}, profile={}, type={}]",
            self.component, self.version, self.namespace, self.profile, self.operation
        )
    }
}

/// Status report sent to the task's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackMessage {
    pub status: Status,
    #[serde(default)]
    pub error: String,
    #[serde(rename = "retryID", default)]
    pub retry_id: String,
}

/// Body of the processing duration report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingDuration {
    /// Milliseconds between the first attempt and the final outcome
    pub duration: u64,
}

/// Body of the worker pool occupancy report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyRequest {
    pub component: String,
    pub running_workers: usize,
    pub pool_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_deserializes_wire_names() {
        let task: Task = serde_json::from_value(json!({
            "componentsReady": ["cluster-essentials"],
            "component": "istio",
            "namespace": "istio-system",
            "version": "2.4.0",
            "configuration": [{"key": "global.domain", "value": "example.com"}],
            "kubeconfig": "apiVersion: v1",
            "callbackURL": "http://mothership:8080/v1/callback/123",
            "correlationID": "abc",
            "type": "delete"
        }))
        .unwrap();

        assert_eq!(task.components_ready, vec!["cluster-essentials"]);
        assert_eq!(task.callback_url, "http://mothership:8080/v1/callback/123");
        assert_eq!(task.operation, OperationType::Delete);
        assert_eq!(
            task.configuration_map().get("global.domain"),
            Some(&json!("example.com"))
        );
    }

    #[test]
    fn operation_defaults_to_reconcile() {
        let task: Task = serde_json::from_value(json!({"component": "x"})).unwrap();
        assert_eq!(task.operation, OperationType::Reconcile);
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let mut task = Task {
            component: "  istio ".to_string(),
            namespace: " ".to_string(),
            ..Task::default()
        };
        let err = task.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid task: mandatory fields are undefined: Namespace, Version, Kubeconfig, CallbackURL, CorrelationID"
        );
        assert_eq!(task.component, "istio");
    }

    #[test]
    fn embedded_tasks_do_not_need_a_callback_url() {
        let mut task = Task {
            component: "istio".to_string(),
            namespace: "istio-system".to_string(),
            version: "1.0.0".to_string(),
            kubeconfig: "kubeconfig".to_string(),
            correlation_id: "id".to_string(),
            ..Task::default()
        };
        assert!(task.validate_embedded().is_ok());
        assert!(task.validate().is_err());
    }

    #[test]
    fn final_statuses() {
        assert!(Status::Success.is_final());
        assert!(Status::Error.is_final());
        assert!(!Status::Failed.is_final());
        assert!(!Status::Running.is_final());
        assert_eq!(
            serde_json::to_value(Status::NotStarted).unwrap(),
            json!("notstarted")
        );
    }

    #[test]
    fn callback_message_uses_retry_id_field() {
        let msg = CallbackMessage {
            status: Status::Failed,
            error: "boom".to_string(),
            retry_id: "r1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"status": "failed", "error": "boom", "retryID": "r1"})
        );
    }
}
