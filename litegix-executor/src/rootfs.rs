//! ext4 block image assembly from a merged layer tree.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::RootfsStage;
use crate::ExecutorError;

const MIB: u64 = 1024 * 1024;

/// Smallest block image ever produced, in MiB.
pub const MIN_ROOTFS_MIB: u64 = 100;

/// Block image produced for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RootfsInfo {
    /// Path of the ext4 image on the host.
    pub path: PathBuf,
    /// Allocated size of the image in MiB.
    pub size_mib: u64,
    /// Apparent byte size of the tree copied into it.
    pub content_bytes: u64,
}

/// Image size for `content_bytes` of payload: 1.5x headroom, rounded up to a
/// whole MiB, never below [`MIN_ROOTFS_MIB`].
#[must_use]
pub fn rootfs_size_mib(content_bytes: u64) -> u64 {
    content_bytes
        .saturating_mul(3)
        .div_ceil(2 * MIB)
        .max(MIN_ROOTFS_MIB)
}

/// Apparent size of a tree, like `du -sb`: the sum of every entry's length,
/// symlinks counted by their own length and never followed.
///
/// # Errors
/// Propagates I/O errors from walking the tree.
pub fn apparent_size(root: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(root)?;
    let mut total = meta.len();
    if meta.is_dir() {
        for entry in fs::read_dir(root)? {
            total = total.saturating_add(apparent_size(&entry?.path())?);
        }
    }
    Ok(total)
}

async fn run(stage: RootfsStage, program: &str, args: &[&OsStr]) -> Result<(), ExecutorError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ExecutorError::rootfs(stage, format!("spawn {program}: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ExecutorError::rootfs(
        stage,
        format!("{program} exited with {}: {}", output.status, stderr.trim()),
    ))
}

async fn populate(merged: &Path, mount_point: &Path) -> Result<(), ExecutorError> {
    // `cp -a src/. dst/` copies contents, not the directory itself.
    let source = merged.join(".");
    run(
        RootfsStage::Copy,
        "cp",
        &[OsStr::new("-a"), source.as_os_str(), mount_point.as_os_str()],
    )
    .await
}

async fn format_and_fill(
    merged: &Path,
    rootfs_path: &Path,
    mount_point: &Path,
    size_mib: u64,
) -> Result<(), ExecutorError> {
    let file = fs::File::create(rootfs_path)
        .map_err(|e| ExecutorError::rootfs(RootfsStage::Format, format!("create image: {e}")))?;
    file.set_len(size_mib * MIB)
        .map_err(|e| ExecutorError::rootfs(RootfsStage::Format, format!("allocate image: {e}")))?;
    drop(file);

    run(
        RootfsStage::Format,
        "mkfs.ext4",
        &[OsStr::new("-F"), OsStr::new("-q"), rootfs_path.as_os_str()],
    )
    .await?;

    fs::create_dir_all(mount_point)
        .map_err(|e| ExecutorError::rootfs(RootfsStage::Mount, format!("create mount point: {e}")))?;
    run(
        RootfsStage::Mount,
        "mount",
        &[
            OsStr::new("-o"),
            OsStr::new("loop"),
            rootfs_path.as_os_str(),
            mount_point.as_os_str(),
        ],
    )
    .await?;

    let copied = populate(merged, mount_point).await;
    let unmounted = run(RootfsStage::Mount, "umount", &[mount_point.as_os_str()]).await;
    if let Err(e) = &unmounted {
        tracing::warn!(mount = %mount_point.display(), error = %e, "failed to unmount rootfs image");
    }
    copied?;
    unmounted
}

/// Build an ext4 image at `rootfs_path` holding the contents of `merged`.
///
/// The image is mounted on `mount_point` only while it is filled and is
/// always unmounted again. A partially built image is removed on error.
///
/// # Errors
/// Returns [`ExecutorError::Rootfs`] naming the failing stage.
pub async fn build_rootfs(
    merged: &Path,
    rootfs_path: &Path,
    mount_point: &Path,
) -> Result<RootfsInfo, ExecutorError> {
    let tree = merged.to_path_buf();
    let content_bytes = tokio::task::spawn_blocking(move || apparent_size(&tree))
        .await
        .map_err(|e| ExecutorError::rootfs(RootfsStage::Size, e.to_string()))?
        .map_err(|e| ExecutorError::rootfs(RootfsStage::Size, e.to_string()))?;
    let size_mib = rootfs_size_mib(content_bytes);
    tracing::debug!(content_bytes, size_mib, "sizing rootfs image");

    let result = format_and_fill(merged, rootfs_path, mount_point, size_mib).await;
    if let Err(e) = fs::remove_dir(mount_point) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(mount = %mount_point.display(), error = %e, "mount point not removed");
        }
    }
    if let Err(e) = result {
        if let Err(rm_err) = fs::remove_file(rootfs_path) {
            if rm_err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(rootfs = %rootfs_path.display(), error = %rm_err, "partial rootfs image not removed");
            }
        }
        return Err(e);
    }

    Ok(RootfsInfo {
        path: rootfs_path.to_path_buf(),
        size_mib,
        content_bytes,
    })
}
