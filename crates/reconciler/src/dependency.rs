//! Component dependency check run before a task is admitted.

use crate::error::Error;

/// Required dependencies of a component compared against the ready components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub component: String,
    pub required: Vec<String>,
    pub missing: Vec<String>,
}

impl DependencyCheck {
    /// Missing = required minus ready, in the order they were required.
    pub fn new(component: &str, required: &[String], ready: &[String]) -> Self {
        let missing = required
            .iter()
            .filter(|dep| !ready.contains(dep))
            .cloned()
            .collect();

        Self {
            component: component.to_string(),
            required: required.to_vec(),
            missing,
        }
    }

    pub fn dependency_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Admission error for this check.
    pub fn into_error(self) -> Error {
        Error::DependencyMissing {
            component: self.component,
            required: self.required,
            missing: self.missing,
        }
    }
}
