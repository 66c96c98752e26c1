//! Driver-level and task-level configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kernel command line used for every VM.
///
/// Serial console on, reboot and panic halt the VM, PCI probing disabled.
pub const KERNEL_CMDLINE: &str = "console=ttyS0 reboot=k panic=1 pci=off";

/// Process-wide driver configuration, set once at driver init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DriverConfig {
    /// Uncompressed guest kernel image. Must exist on disk.
    #[serde(alias = "vmlinux_path")]
    pub kernel_image_path: PathBuf,

    /// Directory holding one workspace per task. Created if missing.
    #[serde(alias = "rootfs_base_path")]
    pub rootfs_base_directory: PathBuf,

    /// Container runtime socket. Accepted for compatibility, currently unused.
    #[serde(default, alias = "containerd_socket")]
    pub container_runtime_socket: Option<PathBuf>,

    /// Firecracker binary; a bare name is resolved through `PATH`.
    #[serde(default = "default_firecracker_binary")]
    pub firecracker_binary: PathBuf,

    /// Container CLI used to pull and export images.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: PathBuf,
}

fn default_firecracker_binary() -> PathBuf {
    PathBuf::from("firecracker")
}

fn default_docker_binary() -> PathBuf {
    PathBuf::from("docker")
}

impl DriverConfig {
    /// Create a config with default helper binaries.
    #[must_use]
    pub fn new(kernel_image_path: PathBuf, rootfs_base_directory: PathBuf) -> Self {
        Self {
            kernel_image_path,
            rootfs_base_directory,
            container_runtime_socket: None,
            firecracker_binary: default_firecracker_binary(),
            docker_binary: default_docker_binary(),
        }
    }

    /// Decode a config from a JSON document.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigInvalid`] if the document is malformed or a
    /// required field is missing.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::ConfigInvalid {
            field: "driver_config",
            reason: e.to_string(),
        })
    }

    /// Read and decode a JSON config file.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigInvalid`] if the file cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let bytes = std::fs::read(path).map_err(|e| CoreError::ConfigInvalid {
            field: "driver_config",
            reason: format!("read {}: {e}", path.display()),
        })?;
        Self::from_json(&bytes)
    }

    /// Validate the config and prepare the rootfs base directory.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigInvalid`] if the kernel image is missing or
    /// the base directory cannot be created.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.kernel_image_path.as_os_str().is_empty() {
            return Err(CoreError::ConfigInvalid {
                field: "kernel_image_path",
                reason: "is required".to_owned(),
            });
        }
        if self.rootfs_base_directory.as_os_str().is_empty() {
            return Err(CoreError::ConfigInvalid {
                field: "rootfs_base_directory",
                reason: "is required".to_owned(),
            });
        }

        match std::fs::metadata(&self.kernel_image_path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(CoreError::ConfigInvalid {
                    field: "kernel_image_path",
                    reason: format!("{} is not a file", self.kernel_image_path.display()),
                });
            }
            Err(e) => {
                return Err(CoreError::ConfigInvalid {
                    field: "kernel_image_path",
                    reason: format!("{}: {e}", self.kernel_image_path.display()),
                });
            }
        }

        create_dir_0755(&self.rootfs_base_directory).map_err(|e| CoreError::ConfigInvalid {
            field: "rootfs_base_directory",
            reason: format!("create {}: {e}", self.rootfs_base_directory.display()),
        })
    }
}

#[cfg(unix)]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Per-task configuration decoded from the orchestrator's opaque envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskSpec {
    /// OCI image reference, e.g. `alpine:latest`.
    pub image: String,

    /// Number of vCPUs for the VM.
    #[serde(alias = "vpu_count")]
    pub vcpu_count: u32,

    /// Guest memory in MiB.
    #[serde(alias = "mem_size")]
    pub memory_mib: u32,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Option<String>,

    /// Environment entries in `KEY=VALUE` form, order preserved.
    #[serde(default)]
    pub env: Vec<String>,
}

impl TaskSpec {
    /// Create a spec with no command, args or environment.
    pub fn new(image: impl Into<String>, vcpu_count: u32, memory_mib: u32) -> Self {
        Self {
            image: image.into(),
            vcpu_count,
            memory_mib,
            command: None,
            args: None,
            env: Vec::new(),
        }
    }

    /// Decode and validate a spec from the orchestrator's driver config value.
    ///
    /// # Errors
    /// Returns [`CoreError::SpecDecode`] if the value does not match the schema
    /// and [`CoreError::InvalidSpec`] if a field fails validation.
    pub fn decode(value: &serde_json::Value) -> Result<Self, CoreError> {
        let spec: Self = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::SpecDecode(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants a task must satisfy at acceptance.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSpec`] naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.image.trim().is_empty() {
            return Err(CoreError::InvalidSpec {
                field: "image",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.vcpu_count == 0 {
            return Err(CoreError::InvalidSpec {
                field: "vcpu_count",
                reason: "must be positive".to_owned(),
            });
        }
        if self.memory_mib == 0 {
            return Err(CoreError::InvalidSpec {
                field: "memory_mib",
                reason: "must be positive".to_owned(),
            });
        }
        if let Some(bad) = self.env.iter().find(|entry| !entry.contains('=')) {
            return Err(CoreError::InvalidSpec {
                field: "env",
                reason: format!("entry '{bad}' is not KEY=VALUE"),
            });
        }
        Ok(())
    }
}
