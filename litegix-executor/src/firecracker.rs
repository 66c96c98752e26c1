//! Firecracker hypervisor implementation.
//!
//! Manages Firecracker microVM processes via the Firecracker Management API
//! (HTTP over Unix domain socket).
//!
//! # API Reference
//! Firecracker API spec: `firecracker/src/api_server/swagger/firecracker.yaml`

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::backend::{Hypervisor, Machine, MachineExit};
use crate::unix_client::api_request;
use crate::{ExecutorError, MachineConfig};

/// How long to wait for the API socket after spawning the process.
const SOCKET_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the socket or for process exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Firecracker hypervisor.
///
/// Produces [`FirecrackerMachine`]s, each of which owns one Firecracker
/// process and its API socket.
#[derive(Debug, Clone)]
pub struct FirecrackerHypervisor {
    /// Path to the `firecracker` binary.
    binary_path: PathBuf,
}

impl FirecrackerHypervisor {
    /// Create a hypervisor that launches `binary_path`.
    #[must_use]
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Check that KVM and the Firecracker binary are usable.
    ///
    /// # Errors
    /// Returns [`ExecutorError::KvmUnavailable`] or [`ExecutorError::BinaryNotFound`].
    pub async fn health_check(&self) -> Result<(), ExecutorError> {
        tokio::fs::metadata("/dev/kvm")
            .await
            .map_err(|e| ExecutorError::KvmUnavailable {
                reason: format!("cannot access /dev/kvm: {e}"),
            })?;
        which_binary(&self.binary_path).map(|_| ())
    }
}

impl Default for FirecrackerHypervisor {
    fn default() -> Self {
        Self::new(PathBuf::from("firecracker"))
    }
}

#[async_trait]
impl Hypervisor for FirecrackerHypervisor {
    async fn configure(&self, config: MachineConfig) -> Result<Arc<dyn Machine>, ExecutorError> {
        self.health_check().await?;
        let binary = which_binary(&self.binary_path)?;

        if config.drives.iter().filter(|d| d.is_root_device).count() != 1 {
            return Err(ExecutorError::SpawnFailed(
                "exactly one root drive is required".to_owned(),
            ));
        }
        if !config.kernel_path.exists() {
            return Err(ExecutorError::SpawnFailed(format!(
                "kernel image {} not found",
                config.kernel_path.display()
            )));
        }

        Ok(Arc::new(FirecrackerMachine::new(binary, config)))
    }
}

/// One Firecracker microVM process.
#[derive(Debug)]
pub struct FirecrackerMachine {
    binary_path: PathBuf,
    config: MachineConfig,
    process: Mutex<Option<Child>>,
    exit: Mutex<Option<MachineExit>>,
}

impl FirecrackerMachine {
    fn new(binary_path: PathBuf, config: MachineConfig) -> Self {
        Self {
            binary_path,
            config,
            process: Mutex::new(None),
            exit: Mutex::new(None),
        }
    }

    fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Wait for the Firecracker API socket to become available.
    async fn wait_for_socket(socket_path: &Path) -> Result<(), ExecutorError> {
        let attempts = SOCKET_WAIT.as_millis() / POLL_INTERVAL.as_millis();
        for _ in 0..attempts {
            if socket_path.exists() {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(ExecutorError::SpawnFailed(format!(
            "socket {} did not appear within {}s",
            socket_path.display(),
            SOCKET_WAIT.as_secs()
        )))
    }

    /// Configure the VM via the Firecracker API and boot it.
    async fn configure_and_boot(config: &MachineConfig) -> Result<(), ExecutorError> {
        let socket = config.socket_path.as_path();

        let boot_source = serde_json::json!({
            "kernel_image_path": config.kernel_path,
            "boot_args": config.kernel_cmdline,
        });
        api_request(socket, Method::PUT, "/boot-source", Some(&boot_source)).await?;

        for drive in &config.drives {
            let body = serde_json::json!({
                "drive_id": drive.drive_id,
                "path_on_host": drive.path_on_host,
                "is_root_device": drive.is_root_device,
                "is_read_only": drive.is_read_only,
            });
            let path = format!("/drives/{}", drive.drive_id);
            api_request(socket, Method::PUT, &path, Some(&body)).await?;
        }

        let machine_body = serde_json::json!({
            "vcpu_count": config.vcpu_count,
            "mem_size_mib": config.mem_size_mib,
        });
        api_request(socket, Method::PUT, "/machine-config", Some(&machine_body)).await?;

        let boot_body = serde_json::json!({ "action_type": "InstanceStart" });
        api_request(socket, Method::PUT, "/actions", Some(&boot_body)).await?;

        Ok(())
    }

    /// Reap the child if it has exited, recording how it ended.
    ///
    /// Returns the pid while the process is still running.
    async fn poll_process(&self) -> Option<u32> {
        let mut guard = self.process.lock().await;
        let child = guard.as_mut()?;
        match child.try_wait() {
            Ok(None) => child.id(),
            Ok(Some(status)) => {
                *self.exit.lock().await = Some(MachineExit::new(status.code(), status.signal()));
                *guard = None;
                None
            }
            Err(e) => {
                tracing::warn!(socket = %self.socket_path().display(), error = %e, "failed to poll firecracker process");
                child.id()
            }
        }
    }

    async fn remove_socket(&self) {
        match tokio::fs::remove_file(self.socket_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(socket = %self.socket_path().display(), error = %e, "failed to remove API socket");
            }
        }
    }
}

#[async_trait]
impl Machine for FirecrackerMachine {
    async fn start(&self) -> Result<(), ExecutorError> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            return Err(ExecutorError::SpawnFailed("VM already started".to_owned()));
        }

        // A stale socket from a previous run would make the wait below succeed early.
        self.remove_socket().await;

        tracing::info!(socket = %self.socket_path().display(), "spawning Firecracker VM");

        let child = Command::new(&self.binary_path)
            .arg("--api-sock")
            .arg(self.socket_path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(format!("exec firecracker: {e}")))?;
        *guard = Some(child);
        drop(guard);

        let booted = async {
            Self::wait_for_socket(self.socket_path()).await?;
            Self::configure_and_boot(&self.config).await
        }
        .await;

        if let Err(e) = booted {
            if let Err(stop_err) = self.force_stop().await {
                tracing::warn!(error = %stop_err, "failed to reap firecracker after boot failure");
            }
            return Err(ExecutorError::SpawnFailed(e.to_string()));
        }

        tracing::info!(socket = %self.socket_path().display(), "VM booted successfully");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExecutorError> {
        let body = serde_json::json!({ "action_type": "SendCtrlAltDel" });
        api_request(self.socket_path(), Method::PUT, "/actions", Some(&body)).await?;

        // With `reboot=k` the guest's reboot makes Firecracker exit.
        while self.poll_process().await.is_some() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.remove_socket().await;
        Ok(())
    }

    async fn force_stop(&self) -> Result<(), ExecutorError> {
        let child = self.process.lock().await.take();

        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                // InvalidInput means the child was already reaped.
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    return Err(ExecutorError::ForceStop {
                        vm_id: self.socket_path().display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
            match child.wait().await {
                Ok(status) => {
                    let mut exit = self.exit.lock().await;
                    if exit.is_none() {
                        *exit = Some(MachineExit::new(status.code(), status.signal()));
                    }
                }
                Err(e) => {
                    return Err(ExecutorError::ForceStop {
                        vm_id: self.socket_path().display().to_string(),
                        reason: format!("wait: {e}"),
                    });
                }
            }
        }

        self.remove_socket().await;
        Ok(())
    }

    async fn pid(&self) -> Result<u32, ExecutorError> {
        self.poll_process()
            .await
            .ok_or_else(|| ExecutorError::NotRunning(self.socket_path().display().to_string()))
    }

    async fn exit(&self) -> Option<MachineExit> {
        *self.exit.lock().await
    }
}

/// Resolve a binary either at the given path or in PATH.
fn which_binary(path: &Path) -> Result<PathBuf, ExecutorError> {
    if path.is_absolute() || path.components().count() > 1 {
        if path.exists() {
            return Ok(path.to_owned());
        }
        return Err(ExecutorError::BinaryNotFound {
            path: path.to_owned(),
        });
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .map(|dir| dir.join(path))
        .find(|p| p.is_file())
        .ok_or_else(|| ExecutorError::BinaryNotFound {
            path: path.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_machine(binary: &str, socket: PathBuf) -> FirecrackerMachine {
        let config = MachineConfig::new(
            socket,
            PathBuf::from("/tmp/vmlinux"),
            PathBuf::from("/tmp/rootfs.ext4"),
            1,
            128,
        );
        FirecrackerMachine::new(PathBuf::from(binary), config)
    }

    #[test]
    fn which_binary_finds_sh_in_path() {
        let found = which_binary(Path::new("sh"));
        assert!(found.is_ok(), "sh must be on PATH: {found:?}");
    }

    #[test]
    fn which_binary_missing_absolute_path_errors() {
        let result = which_binary(Path::new("/nonexistent/firecracker"));
        assert!(matches!(result, Err(ExecutorError::BinaryNotFound { .. })));
    }

    #[tokio::test]
    async fn unstarted_machine_has_no_pid() {
        let machine = test_machine("firecracker", PathBuf::from("/tmp/litegix-none.sock"));
        assert!(matches!(machine.pid().await, Err(ExecutorError::NotRunning(_))));
        assert!(machine.exit().await.is_none());
    }

    #[tokio::test]
    async fn force_stop_on_unstarted_machine_succeeds() {
        let machine = test_machine("firecracker", PathBuf::from("/tmp/litegix-none.sock"));
        assert!(machine.force_stop().await.is_ok(), "force_stop must tolerate a stopped VM");
        assert!(machine.force_stop().await.is_ok(), "force_stop must be idempotent");
    }

    #[tokio::test]
    async fn start_fails_when_socket_never_appears() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        // `true` exits immediately without creating the API socket.
        let machine = test_machine("true", dir.path().join("firecracker.sock"));
        let result = machine.start().await;
        assert!(matches!(result, Err(ExecutorError::SpawnFailed(_))), "got {result:?}");
        assert!(machine.pid().await.is_err(), "failed boot must not leave a running process");
    }

    #[tokio::test]
    async fn force_stop_kills_running_process_and_records_exit() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let machine = test_machine("sleep", dir.path().join("firecracker.sock"));
        let child = match Command::new("sleep").arg("30").kill_on_drop(true).spawn() {
            Ok(c) => c,
            Err(e) => panic!("spawn sleep: {e}"),
        };
        *machine.process.lock().await = Some(child);

        let pid = match machine.pid().await {
            Ok(p) => p,
            Err(e) => panic!("pid: {e}"),
        };
        assert!(pid > 0);

        assert!(machine.force_stop().await.is_ok());
        assert!(machine.pid().await.is_err(), "killed VM must not report a pid");
        let exit = machine.exit().await;
        assert_eq!(exit.and_then(|e| e.signal), Some(libc_sigkill()));
    }

    #[tokio::test]
    async fn pid_observes_natural_exit() {
        let machine = test_machine("true", PathBuf::from("/tmp/litegix-none.sock"));
        let mut child = match Command::new("sh").arg("-c").arg("exit 3").spawn() {
            Ok(c) => c,
            Err(e) => panic!("spawn sh: {e}"),
        };
        // Let the child finish before handing it over.
        let _ = child.wait().await;
        *machine.process.lock().await = Some(child);

        assert!(machine.pid().await.is_err());
        let exit = machine.exit().await;
        assert_eq!(exit.and_then(|e| e.code), Some(3));
    }

    fn libc_sigkill() -> i32 {
        nix::sys::signal::Signal::SIGKILL as i32
    }
}
