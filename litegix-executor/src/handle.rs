//! VM record: represents a provisioned microVM and its host artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use litegix_core::TaskId;

use crate::backend::Machine;

/// A provisioned microVM.
///
/// Dropping this record does NOT terminate the VM. Call
/// [`VmLifecycle::destroy`](crate::VmLifecycle::destroy) to clean up.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct VmRecord {
    /// Task that owns this VM.
    pub task_id: TaskId,

    /// VM identifier; equal to the task id.
    pub vm_id: String,

    /// Hypervisor handle owning the control socket and process.
    pub machine: Option<Arc<dyn Machine>>,

    /// Path to the Firecracker API Unix socket.
    pub socket_path: PathBuf,

    /// Block image backing the root drive.
    pub rootfs_path: PathBuf,

    /// Per-task workspace directory holding every artifact above.
    pub workspace: PathBuf,

    /// Host PID of the VM process at boot.
    pub pid: u32,

    /// Timestamp when the VM was created.
    pub created_at: DateTime<Utc>,
}

impl VmRecord {
    /// Create a VM record stamped with the current time.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        machine: Option<Arc<dyn Machine>>,
        workspace: PathBuf,
        socket_path: PathBuf,
        rootfs_path: PathBuf,
        pid: u32,
    ) -> Self {
        Self {
            vm_id: task_id.to_string(),
            task_id,
            machine,
            socket_path,
            rootfs_path,
            workspace,
            pid,
            created_at: Utc::now(),
        }
    }
}
