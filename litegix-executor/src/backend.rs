//! Hypervisor abstraction traits.
//!
//! The VM manager drives micro-VMs only through these traits, so the
//! Firecracker client can be swapped for another VMM or a test double.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{ExecutorError, MachineConfig};

/// Exit of a hypervisor process, once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct MachineExit {
    /// Process exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if it was killed.
    pub signal: Option<i32>,
    pub exited_at: DateTime<Utc>,
}

impl MachineExit {
    /// Record an exit observed now.
    #[must_use]
    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self {
            code,
            signal,
            exited_at: Utc::now(),
        }
    }
}

/// Factory for machines bound to a control socket.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Validate `config` and return an unstarted machine.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] or [`ExecutorError::KvmUnavailable`]
    /// if the host cannot run VMs.
    async fn configure(&self, config: MachineConfig) -> Result<Arc<dyn Machine>, ExecutorError>;
}

/// One configured micro-VM.
///
/// Implementations must be `Send + Sync`: the task monitor, stop and signal
/// paths all reach the same machine concurrently.
#[async_trait]
pub trait Machine: Send + Sync + std::fmt::Debug {
    /// Boot the VM. Returns once the guest has begun executing.
    ///
    /// # Errors
    /// Returns [`ExecutorError::SpawnFailed`] or [`ExecutorError::ApiError`].
    async fn start(&self) -> Result<(), ExecutorError>;

    /// Ask the guest to power off and wait for the VM process to exit.
    ///
    /// Callers bound this with their own deadline.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ApiError`] if the request cannot be delivered.
    async fn shutdown(&self) -> Result<(), ExecutorError>;

    /// Kill the VM process and remove its control socket.
    ///
    /// Succeeds if the VM is already stopped.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ForceStop`] if the process cannot be killed.
    async fn force_stop(&self) -> Result<(), ExecutorError>;

    /// Host PID of the running VM process.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotRunning`] once the process has exited.
    async fn pid(&self) -> Result<u32, ExecutorError>;

    /// Exit details, if the process exit has been observed.
    async fn exit(&self) -> Option<MachineExit>;
}
