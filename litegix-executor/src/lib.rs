//! Firecracker microVM lifecycle management for the litegix task driver.
//!
//! Turns container images into ext4 root filesystems, boots them as
//! Firecracker microVMs and stops, probes and tears those VMs down.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod error;
pub mod firecracker;
pub mod handle;
pub mod image;
pub mod layers;
pub mod manager;
pub mod process;
pub mod rootfs;
mod unix_client;

pub use backend::{Hypervisor, Machine, MachineExit};
pub use config::{Drive, MachineConfig, ROOTFS_DRIVE_ID};
pub use error::{ExecutorError, RootfsStage};
pub use firecracker::{FirecrackerHypervisor, FirecrackerMachine};
pub use handle::VmRecord;
pub use image::{DockerMaterializer, ImageMaterializer};
pub use manager::{FirecrackerVmManager, VmLifecycle, VmManager, VmState, VmStatus};
pub use nix::sys::signal::Signal;
pub use rootfs::RootfsInfo;
