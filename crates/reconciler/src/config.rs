//! Process configuration loaded from a mounted YAML file.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::heartbeat::HeartbeatConfig;
use crate::progress::TrackerConfig;

/// Main reconciler configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub heartbeat: IntervalConfig,

    #[serde(default)]
    pub progress: IntervalConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Component reconcilers to register, keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Number of concurrently running reconciliations
    #[serde(default = "default_workers")]
    pub size: usize,

    /// Tasks accepted while all workers are busy (0 = same as `size`)
    #[serde(rename = "queueSize", default)]
    pub queue_size: usize,

    /// Upper bound for one reconciliation including all retries
    #[serde(rename = "timeoutSeconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// How often pool occupancy is reported to the caller
    #[serde(
        rename = "occupancyIntervalSeconds",
        default = "default_occupancy_interval"
    )]
    pub occupancy_interval_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            size: default_workers(),
            queue_size: 0,
            timeout_seconds: default_timeout_seconds(),
            occupancy_interval_seconds: default_occupancy_interval(),
        }
    }
}

fn default_workers() -> usize {
    100
}

fn default_timeout_seconds() -> u64 {
    600 // 10 minutes
}

fn default_occupancy_interval() -> u64 {
    30
}

/// Retry configuration shared by all components unless overridden
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "delaySeconds", default = "default_retry_delay")]
    pub delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_seconds: default_retry_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    30
}

/// Interval/timeout pair; 0 selects the built-in default
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IntervalConfig {
    #[serde(rename = "intervalSeconds", default)]
    pub interval_seconds: u64,

    #[serde(rename = "timeoutSeconds", default)]
    pub timeout_seconds: u64,
}

/// Chart workspace configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Directory holding `<version>/<component>.yaml` manifests
    #[serde(default = "default_workspace_root")]
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> String {
    "/var/lib/reconciler/workspace".to_string()
}

/// Per-component overrides
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComponentConfig {
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(rename = "maxRetries", default)]
    pub max_retries: Option<u32>,

    #[serde(rename = "retryDelaySeconds", default)]
    pub retry_delay_seconds: Option<u64>,
}

impl ReconcilerConfig {
    /// Load configuration from mounted config file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ReconcilerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.workers.size == 0 {
            return Err(anyhow::anyhow!("workers.size must be greater than 0"));
        }
        if self.workers.timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "workers.timeoutSeconds must be greater than 0"
            ));
        }
        if self.workers.occupancy_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "workers.occupancyIntervalSeconds must be greater than 0"
            ));
        }

        self.heartbeat_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("heartbeat: {e}"))?;
        self.tracker_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("progress: {e}"))?;

        for (name, component) in &self.components {
            if component.dependencies.iter().any(|dep| dep == name) {
                return Err(anyhow::anyhow!(
                    "component '{name}' cannot depend on itself"
                ));
            }
        }

        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        if self.workers.queue_size == 0 {
            self.workers.size
        } else {
            self.workers.queue_size
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.timeout_seconds)
    }

    pub fn occupancy_interval(&self) -> Duration {
        Duration::from_secs(self.workers.occupancy_interval_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry.delay_seconds)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(self.heartbeat.interval_seconds),
            timeout: Duration::from_secs(self.heartbeat.timeout_seconds),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            interval: Duration::from_secs(self.progress.interval_seconds),
            timeout: Duration::from_secs(self.progress.timeout_seconds),
        }
    }
}
