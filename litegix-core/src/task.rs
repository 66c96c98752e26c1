//! Task lifecycle types shared between the driver and its host.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::TaskSpec;
use crate::error::CoreError;
use crate::id::TaskId;

/// Version stamped on every [`DriverHandle`] this driver produces.
pub const TASK_HANDLE_VERSION: u32 = 1;

/// Orchestrator-facing run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TaskState {
    /// The VM is believed to be alive.
    Running,
    /// The VM process is gone.
    Exited,
    /// The driver cannot tell; treated as terminal.
    Unknown,
}

impl TaskState {
    /// `true` for the states after which the monitor has stopped.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Unknown)
    }
}

/// How a task ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: i32,
    pub oom_killed: bool,
    /// Set when the driver lost track of the VM rather than seeing it exit.
    pub err: Option<String>,
}

impl ExitResult {
    /// `true` if the task exited cleanly with no recorded error.
    #[must_use]
    pub fn successful(&self) -> bool {
        self.exit_code == 0 && self.signal == 0 && self.err.is_none()
    }
}

/// The orchestrator's description of a task to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskConfig {
    pub id: TaskId,
    /// Task name within its allocation.
    pub name: String,
    pub alloc_id: String,
    /// Opaque driver-specific configuration, decoded into a [`TaskSpec`].
    pub driver_config: serde_json::Value,
}

impl TaskConfig {
    /// Create a new task config envelope.
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        alloc_id: impl Into<String>,
        driver_config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            alloc_id: alloc_id.into(),
            driver_config,
        }
    }

    /// Decode the driver-specific part of the envelope.
    ///
    /// # Errors
    /// See [`TaskSpec::decode`].
    pub fn decode_driver_config(&self) -> Result<TaskSpec, CoreError> {
        TaskSpec::decode(&self.driver_config)
    }
}

/// Handle the orchestrator keeps for a started task and hands back on recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DriverHandle {
    pub version: u32,
    pub config: TaskConfig,
    /// Opaque state written by the driver.
    pub driver_state: Option<serde_json::Value>,
}

impl DriverHandle {
    /// Create an empty handle for `config`.
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            version: TASK_HANDLE_VERSION,
            config,
            driver_state: None,
        }
    }

    /// Store driver state on the handle.
    ///
    /// # Errors
    /// Returns [`CoreError::DriverState`] if `state` cannot be serialized.
    pub fn set_driver_state<T: Serialize>(&mut self, state: &T) -> Result<(), CoreError> {
        let value =
            serde_json::to_value(state).map_err(|e| CoreError::DriverState(e.to_string()))?;
        self.driver_state = Some(value);
        Ok(())
    }

    /// Decode previously stored driver state.
    ///
    /// # Errors
    /// Returns [`CoreError::DriverState`] if no state was stored or it does not
    /// decode into `T`.
    pub fn driver_state<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        let value = self
            .driver_state
            .as_ref()
            .ok_or_else(|| CoreError::DriverState("handle carries no driver state".to_owned()))?;
        serde_json::from_value(value.clone()).map_err(|e| CoreError::DriverState(e.to_string()))
    }
}

/// State persisted through the orchestrator for recovery.
///
/// It holds neither the control socket nor the PID, so a recovered task can
/// never be reattached to its VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskStateSnapshot {
    pub task_config: TaskConfig,
    pub started_at: DateTime<Utc>,
    pub container_name: String,
}

impl TaskStateSnapshot {
    /// Build the snapshot for a task started at `started_at`.
    #[must_use]
    pub fn new(task_config: TaskConfig, started_at: DateTime<Utc>) -> Self {
        let container_name = format!("{}-{}", task_config.name, task_config.alloc_id);
        Self {
            task_config,
            started_at,
            container_name,
        }
    }
}

/// Point-in-time view of a task, returned by inspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_result: Option<ExitResult>,
    /// Driver-specific attributes: `pid` and `vm_id`.
    pub driver_attributes: BTreeMap<String, String>,
}

impl TaskStatus {
    /// Assemble a status view.
    #[must_use]
    pub fn new(
        id: TaskId,
        name: String,
        state: TaskState,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        exit_result: Option<ExitResult>,
        driver_attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            name,
            state,
            started_at,
            completed_at,
            exit_result,
            driver_attributes,
        }
    }
}
