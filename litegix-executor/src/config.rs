//! Hypervisor machine configuration types.

use std::path::PathBuf;

use litegix_core::KERNEL_CMDLINE;
use serde::{Deserialize, Serialize};

/// Drive id of the root filesystem.
pub const ROOTFS_DRIVE_ID: &str = "rootfs";

/// A block device attached to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

impl Drive {
    /// The writable root device backed by `path`.
    #[must_use]
    pub fn rootfs(path: PathBuf) -> Self {
        Self {
            drive_id: ROOTFS_DRIVE_ID.to_owned(),
            path_on_host: path,
            is_root_device: true,
            is_read_only: false,
        }
    }
}

/// Configuration for one microVM, bound to its control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MachineConfig {
    /// Path of the hypervisor's API socket.
    pub socket_path: PathBuf,

    /// Path to the Linux kernel image (vmlinux).
    pub kernel_path: PathBuf,

    /// Kernel boot arguments.
    pub kernel_cmdline: String,

    pub drives: Vec<Drive>,

    /// Number of virtual CPUs to allocate.
    pub vcpu_count: u32,

    /// Memory size in mebibytes.
    pub mem_size_mib: u32,
}

impl MachineConfig {
    /// Config with the fixed kernel cmdline and a single writable rootfs drive.
    #[must_use]
    pub fn new(
        socket_path: PathBuf,
        kernel_path: PathBuf,
        rootfs_path: PathBuf,
        vcpu_count: u32,
        mem_size_mib: u32,
    ) -> Self {
        Self {
            socket_path,
            kernel_path,
            kernel_cmdline: KERNEL_CMDLINE.to_owned(),
            drives: vec![Drive::rootfs(rootfs_path)],
            vcpu_count,
            mem_size_mib,
        }
    }
}
