//! Per-task VM lifecycle: workspace, rootfs, boot, stop, teardown.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litegix_core::{DriverConfig, TaskId, TaskSpec};

use crate::backend::{Hypervisor, Machine};
use crate::firecracker::FirecrackerHypervisor;
use crate::image::{DockerMaterializer, ImageMaterializer};
use crate::process;
use crate::{ExecutorError, MachineConfig, VmRecord};

/// Name of the block image inside a task workspace.
pub const ROOTFS_FILE: &str = "rootfs.ext4";
/// Name of the hypervisor control socket inside a task workspace.
pub const SOCKET_FILE: &str = "firecracker.sock";
/// Image scratch directory inside a task workspace.
pub const IMAGE_DIR: &str = "image";

/// Coarse VM state reported by [`VmLifecycle::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VmState {
    Running,
    Stopped,
    Unknown,
}

/// Result of probing a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct VmStatus {
    pub state: VmState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl VmStatus {
    #[must_use]
    pub fn running(pid: u32) -> Self {
        Self {
            state: VmState::Running,
            pid: Some(pid),
            exit_code: None,
            exit_signal: None,
            exited_at: None,
        }
    }

    #[must_use]
    pub fn stopped() -> Self {
        Self {
            state: VmState::Stopped,
            pid: None,
            exit_code: None,
            exit_signal: None,
            exited_at: None,
        }
    }

    /// A stopped VM with whatever exit details were observed.
    #[must_use]
    pub fn exited(
        exit_code: Option<i32>,
        exit_signal: Option<i32>,
        exited_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            exit_code,
            exit_signal,
            exited_at,
            ..Self::stopped()
        }
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self {
            state: VmState::Unknown,
            ..Self::stopped()
        }
    }
}

/// Lifecycle operations the driver performs on task VMs.
#[async_trait]
pub trait VmLifecycle: Send + Sync {
    /// Provision the task workspace, build its rootfs and boot the VM.
    ///
    /// On failure nothing is left behind: a started VM is killed and the
    /// workspace is removed.
    ///
    /// # Errors
    /// Returns the image, rootfs or hypervisor error that aborted the boot.
    async fn create_and_start(
        &self,
        spec: &TaskSpec,
        task_id: &TaskId,
    ) -> Result<VmRecord, ExecutorError>;

    /// Stop the VM, cooperatively within `timeout`, forcibly otherwise.
    ///
    /// A zero timeout skips the cooperative attempt.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ForceStop`] only if the forced stop fails.
    async fn stop(&self, record: &VmRecord, timeout: Duration) -> Result<(), ExecutorError>;

    /// Kill the VM if still running and remove its workspace.
    ///
    /// # Errors
    /// Returns an I/O error if the workspace cannot be removed.
    async fn destroy(&self, record: &VmRecord) -> Result<(), ExecutorError>;

    /// Probe whether the VM is still running.
    ///
    /// # Errors
    /// Implementations return an error when the probe itself fails.
    async fn status(&self, record: &VmRecord) -> Result<VmStatus, ExecutorError>;

    /// Remove the workspace of `task_id` if one exists.
    ///
    /// # Errors
    /// Returns an I/O error other than `NotFound`.
    async fn remove_workspace(&self, task_id: &TaskId) -> Result<(), ExecutorError>;
}

/// [`VmLifecycle`] over a hypervisor and an image materializer.
pub struct VmManager<H: Hypervisor, I: ImageMaterializer> {
    hypervisor: H,
    materializer: I,
    kernel_path: PathBuf,
    rootfs_base: PathBuf,
}

/// The production manager: Firecracker VMs with Docker-sourced images.
pub type FirecrackerVmManager = VmManager<FirecrackerHypervisor, DockerMaterializer>;

impl FirecrackerVmManager {
    /// Build the production manager from a validated driver config.
    #[must_use]
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            FirecrackerHypervisor::new(config.firecracker_binary.clone()),
            DockerMaterializer::new(config.docker_binary.clone()),
            config.kernel_image_path.clone(),
            config.rootfs_base_directory.clone(),
        )
    }
}

impl<H: Hypervisor, I: ImageMaterializer> VmManager<H, I> {
    #[must_use]
    pub fn new(hypervisor: H, materializer: I, kernel_path: PathBuf, rootfs_base: PathBuf) -> Self {
        Self {
            hypervisor,
            materializer,
            kernel_path,
            rootfs_base,
        }
    }

    /// Workspace directory of `task_id`.
    #[must_use]
    pub fn workspace_for(&self, task_id: &TaskId) -> PathBuf {
        self.rootfs_base.join(task_id.workspace_name())
    }

    async fn provision(
        &self,
        spec: &TaskSpec,
        task_id: &TaskId,
        workspace: &Path,
        machine: &mut Option<Arc<dyn Machine>>,
    ) -> Result<VmRecord, ExecutorError> {
        let rootfs_path = workspace.join(ROOTFS_FILE);
        let socket_path = workspace.join(SOCKET_FILE);

        let rootfs = self
            .materializer
            .materialize(&spec.image, &workspace.join(IMAGE_DIR), &rootfs_path)
            .await?;

        let config = MachineConfig::new(
            socket_path.clone(),
            self.kernel_path.clone(),
            rootfs.path,
            spec.vcpu_count,
            spec.memory_mib,
        );
        let configured = self.hypervisor.configure(config).await?;
        *machine = Some(Arc::clone(&configured));
        configured.start().await?;
        let pid = configured.pid().await?;

        Ok(VmRecord::new(
            task_id.clone(),
            Some(configured),
            workspace.to_path_buf(),
            socket_path,
            rootfs_path,
            pid,
        ))
    }
}

fn remove_dir(path: &Path) -> Result<(), ExecutorError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl<H: Hypervisor, I: ImageMaterializer> VmLifecycle for VmManager<H, I> {
    async fn create_and_start(
        &self,
        spec: &TaskSpec,
        task_id: &TaskId,
    ) -> Result<VmRecord, ExecutorError> {
        let workspace = self.workspace_for(task_id);
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&workspace)?;

        let mut machine = None;
        match self.provision(spec, task_id, &workspace, &mut machine).await {
            Ok(record) => {
                tracing::info!(
                    task_id = %task_id,
                    pid = record.pid,
                    vcpus = spec.vcpu_count,
                    memory_mib = spec.memory_mib,
                    "microVM started"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "microVM provisioning failed");
                if let Some(machine) = machine {
                    if let Err(stop_err) = machine.force_stop().await {
                        tracing::warn!(task_id = %task_id, error = %stop_err, "cleanup stop failed");
                    }
                }
                if let Err(rm_err) = remove_dir(&workspace) {
                    tracing::warn!(task_id = %task_id, error = %rm_err, "workspace cleanup failed");
                }
                Err(e)
            }
        }
    }

    async fn stop(&self, record: &VmRecord, timeout: Duration) -> Result<(), ExecutorError> {
        let Some(machine) = &record.machine else {
            return Ok(());
        };

        if timeout.is_zero() {
            tracing::debug!(task_id = %record.task_id, "zero timeout, forcing stop");
            return machine.force_stop().await;
        }

        match tokio::time::timeout(timeout, machine.shutdown()).await {
            Ok(Ok(())) => {
                tracing::info!(task_id = %record.task_id, "microVM shut down");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(task_id = %record.task_id, error = %e, "graceful shutdown failed, forcing stop");
                machine.force_stop().await
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %record.task_id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "graceful shutdown timed out, forcing stop"
                );
                machine.force_stop().await
            }
        }
    }

    async fn destroy(&self, record: &VmRecord) -> Result<(), ExecutorError> {
        if let Some(machine) = &record.machine {
            if let Err(e) = machine.force_stop().await {
                tracing::warn!(task_id = %record.task_id, error = %e, "force stop during destroy failed");
            }
        }
        remove_dir(&record.workspace)?;
        tracing::info!(task_id = %record.task_id, "microVM destroyed");
        Ok(())
    }

    async fn status(&self, record: &VmRecord) -> Result<VmStatus, ExecutorError> {
        let Some(machine) = &record.machine else {
            return Ok(VmStatus::unknown());
        };

        let pid = match machine.pid().await {
            Ok(pid) if pid != 0 => pid,
            Ok(_) | Err(_) => {
                let status = match machine.exit().await {
                    Some(exit) => VmStatus::exited(exit.code, exit.signal, Some(exit.exited_at)),
                    None => VmStatus::stopped(),
                };
                return Ok(status);
            }
        };

        if process::is_alive(pid) {
            Ok(VmStatus::running(pid))
        } else {
            Ok(VmStatus {
                pid: Some(pid),
                ..VmStatus::stopped()
            })
        }
    }

    async fn remove_workspace(&self, task_id: &TaskId) -> Result<(), ExecutorError> {
        remove_dir(&self.workspace_for(task_id))
    }
}
