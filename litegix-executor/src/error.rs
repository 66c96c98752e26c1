//! Error types for the executor crate.

use std::fmt;
use std::path::PathBuf;

/// Step of rootfs assembly that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RootfsStage {
    /// Measuring the merged layer tree.
    Size,
    /// Allocating or formatting the block image.
    Format,
    /// Loop-mounting the block image.
    Mount,
    /// Copying the merged tree into the mounted image.
    Copy,
}

impl fmt::Display for RootfsStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Size => "size",
            Self::Format => "format",
            Self::Mount => "mount",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Firecracker binary not found at the configured path.
    #[error("firecracker binary not found at {path}")]
    BinaryNotFound { path: PathBuf },

    /// KVM device is not available or not accessible.
    #[error("KVM not available: {reason}")]
    KvmUnavailable { reason: String },

    /// Pulling or exporting the image failed.
    #[error("image pull failed for {image}: {reason}")]
    ImagePull { image: String, reason: String },

    /// The exported image manifest is missing, malformed or empty.
    #[error("image manifest invalid: {0}")]
    Manifest(String),

    /// A layer archive could not be applied to the merged tree.
    #[error("layer {layer} extraction failed: {reason}")]
    LayerExtraction { layer: String, reason: String },

    /// A step of block-image assembly failed.
    #[error("rootfs {stage} failed: {reason}")]
    Rootfs { stage: RootfsStage, reason: String },

    /// VM failed to spawn or boot.
    #[error("VM spawn failed: {0}")]
    SpawnFailed(String),

    /// Firecracker API request failed.
    #[error("API request failed: {0}")]
    ApiError(String),

    /// The VM process is not running.
    #[error("VM {0} is not running")]
    NotRunning(String),

    /// Forced termination of the VM process failed.
    #[error("forced stop of VM {vm_id} failed: {reason}")]
    ForceStop { vm_id: String, reason: String },

    /// Delivering a signal to the VM process failed.
    #[error("signal delivery to pid {pid} failed: {reason}")]
    Signal { pid: u32, reason: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// `true` for failures acquiring or unpacking the image.
    #[must_use]
    pub fn is_image_error(&self) -> bool {
        matches!(
            self,
            Self::ImagePull { .. } | Self::Manifest(_) | Self::LayerExtraction { .. }
        )
    }

    /// `true` for failures building the block image.
    #[must_use]
    pub fn is_rootfs_error(&self) -> bool {
        matches!(self, Self::Rootfs { .. })
    }

    /// `true` for failures configuring or booting the VM.
    #[must_use]
    pub fn is_hypervisor_error(&self) -> bool {
        matches!(
            self,
            Self::BinaryNotFound { .. }
                | Self::KvmUnavailable { .. }
                | Self::SpawnFailed(_)
                | Self::ApiError(_)
        )
    }

    pub(crate) fn rootfs(stage: RootfsStage, reason: impl Into<String>) -> Self {
        Self::Rootfs {
            stage,
            reason: reason.into(),
        }
    }
}
