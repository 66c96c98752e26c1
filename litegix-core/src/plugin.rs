//! Plugin metadata and the streamed records a driver emits.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TaskId;

/// Name the driver registers under.
pub const PLUGIN_NAME: &str = "litegix-fc-driver";

/// Driver plugin version reported to the orchestrator.
pub const PLUGIN_VERSION: &str = "v0.1.0";

/// Driver API version implemented.
pub const PLUGIN_API_VERSION: &str = "0.1.0";

/// Static description of the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PluginInfo {
    pub name: String,
    pub plugin_version: String,
    pub api_versions: Vec<String>,
}

impl Default for PluginInfo {
    fn default() -> Self {
        Self {
            name: PLUGIN_NAME.to_owned(),
            plugin_version: PLUGIN_VERSION.to_owned(),
            api_versions: vec![PLUGIN_API_VERSION.to_owned()],
        }
    }
}

/// Optional features the driver supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Capabilities {
    pub send_signals: bool,
    pub exec: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            send_signals: true,
            exec: false,
        }
    }
}

/// Driver health as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum HealthState {
    Undetected,
    Unhealthy,
    Healthy,
}

/// One fingerprint sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Fingerprint {
    pub health: HealthState,
    pub health_description: String,
    /// Node attributes advertised to the scheduler.
    pub attributes: BTreeMap<String, String>,
}

impl Fingerprint {
    /// A healthy fingerprint with no attributes.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            health: HealthState::Healthy,
            health_description: "Healthy".to_owned(),
            attributes: BTreeMap::new(),
        }
    }
}

/// CPU usage figures for one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CpuStats {
    pub system_mode: f64,
    pub user_mode: f64,
    pub total_ticks: f64,
    pub percent: f64,
}

/// Memory usage figures for one sample, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MemoryStats {
    pub rss: u64,
    pub cache: u64,
    pub swap: u64,
    pub usage: u64,
}

/// Resource usage of a task at one instant.
///
/// VM resource sampling is not implemented, so every figure is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskResourceUsage {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
    pub pids: BTreeMap<String, (CpuStats, MemoryStats)>,
}

impl TaskResourceUsage {
    /// A zero-valued sample taken at `at`.
    #[must_use]
    pub fn zeroed(at: DateTime<Utc>) -> Self {
        Self {
            cpu: CpuStats::default(),
            memory: MemoryStats::default(),
            timestamp: at.timestamp_nanos_opt().unwrap_or_default(),
            pids: BTreeMap::new(),
        }
    }
}

/// An event the driver broadcasts about one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub annotations: BTreeMap<String, String>,
}

impl TaskEvent {
    /// Create an event stamped with the current time.
    pub fn new(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            message: message.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Attach an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}
