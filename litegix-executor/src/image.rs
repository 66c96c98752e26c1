//! Turning a container image reference into a bootable root filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use uuid::Uuid;

use crate::layers;
use crate::rootfs::{self, RootfsInfo};
use crate::ExecutorError;

/// Produces an ext4 root filesystem image for a container image reference.
#[async_trait]
pub trait ImageMaterializer: Send + Sync {
    /// Acquire `image_ref`, flatten its layers and write the block image to
    /// `rootfs_path`. `image_dir` is scratch space owned by the caller.
    ///
    /// # Errors
    /// Returns an image error (`ImagePull`, `Manifest`, `LayerExtraction`)
    /// or a [`ExecutorError::Rootfs`] error naming the failed stage.
    async fn materialize(
        &self,
        image_ref: &str,
        image_dir: &Path,
        rootfs_path: &Path,
    ) -> Result<RootfsInfo, ExecutorError>;
}

/// One image entry of a `docker save` manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// Parse a `docker save` `manifest.json` and return its first entry.
///
/// # Errors
/// Returns [`ExecutorError::Manifest`] for malformed or empty manifests.
pub fn parse_manifest(raw: &[u8]) -> Result<ManifestEntry, ExecutorError> {
    let entries: Vec<ManifestEntry> =
        serde_json::from_slice(raw).map_err(|e| ExecutorError::Manifest(e.to_string()))?;
    entries
        .into_iter()
        .next()
        .ok_or_else(|| ExecutorError::Manifest("manifest lists no images".to_owned()))
}

fn read_manifest(export_dir: &Path) -> Result<ManifestEntry, ExecutorError> {
    let path = export_dir.join("manifest.json");
    let raw = fs::read(&path)
        .map_err(|e| ExecutorError::Manifest(format!("read {}: {e}", path.display())))?;
    parse_manifest(&raw)
}

fn remove_scratch(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "scratch cleanup failed");
        }
    }
}

/// [`ImageMaterializer`] backed by the Docker CLI.
///
/// Only `docker pull` and `docker save` are delegated; the export and its
/// layers are unpacked in-process.
#[derive(Debug, Clone)]
pub struct DockerMaterializer {
    docker_binary: PathBuf,
}

impl DockerMaterializer {
    /// Create a materializer invoking the given docker binary.
    #[must_use]
    pub fn new(docker_binary: impl Into<PathBuf>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
        }
    }

    async fn docker(&self, image_ref: &str, args: &[&str]) -> Result<(), ExecutorError> {
        let output = Command::new(&self.docker_binary)
            .args(args)
            .output()
            .await
            .map_err(|e| ExecutorError::ImagePull {
                image: image_ref.to_owned(),
                reason: format!("spawn {}: {e}", self.docker_binary.display()),
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(ExecutorError::ImagePull {
            image: image_ref.to_owned(),
            reason: format!(
                "docker {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }

    /// Pull and export `image_ref` into `export_dir`.
    async fn acquire(&self, image_ref: &str, image_dir: &Path, export_dir: &Path) -> Result<(), ExecutorError> {
        tracing::info!(image = image_ref, "pulling image");
        self.docker(image_ref, &["pull", image_ref]).await?;

        let archive = image_dir.join("image.tar");
        let archive_arg = archive.to_string_lossy().into_owned();
        self.docker(image_ref, &["save", "-o", &archive_arg, image_ref])
            .await?;

        let image = image_ref.to_owned();
        let dest = export_dir.to_path_buf();
        let source = archive.clone();
        let extracted =
            tokio::task::spawn_blocking(move || layers::extract_archive(&source, &dest, &image))
                .await
                .map_err(|e| ExecutorError::ImagePull {
                    image: image_ref.to_owned(),
                    reason: e.to_string(),
                })?;
        remove_scratch(&archive);
        extracted
    }

    async fn flatten(export_dir: &Path, merged: &Path) -> Result<(), ExecutorError> {
        let manifest = read_manifest(export_dir)?;
        tracing::debug!(
            config = %manifest.config,
            tags = ?manifest.repo_tags,
            layers = manifest.layers.len(),
            "applying image layers"
        );
        let paths: Vec<PathBuf> = manifest
            .layers
            .iter()
            .map(|layer| export_dir.join(layer))
            .collect();
        let root = merged.to_path_buf();
        tokio::task::spawn_blocking(move || layers::apply_layers(&paths, &root))
            .await
            .map_err(|e| ExecutorError::LayerExtraction {
                layer: "<all>".to_owned(),
                reason: e.to_string(),
            })?
    }
}

impl Default for DockerMaterializer {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ImageMaterializer for DockerMaterializer {
    async fn materialize(
        &self,
        image_ref: &str,
        image_dir: &Path,
        rootfs_path: &Path,
    ) -> Result<RootfsInfo, ExecutorError> {
        fs::create_dir_all(image_dir)?;
        let export_dir = image_dir.join("export");
        let scratch = Uuid::new_v4();
        let merged = image_dir.join(format!("merged-{scratch}"));
        let mount_point = image_dir.join(format!("mnt-{scratch}"));

        let result = async {
            self.acquire(image_ref, image_dir, &export_dir).await?;
            Self::flatten(&export_dir, &merged).await?;
            rootfs::build_rootfs(&merged, rootfs_path, &mount_point).await
        }
        .await;

        remove_scratch(&merged);
        remove_scratch(&export_dir);
        remove_scratch(&image_dir.join("image.tar"));

        match result {
            Ok(info) => {
                tracing::info!(
                    image = image_ref,
                    rootfs = %info.path.display(),
                    size_mib = info.size_mib,
                    "root filesystem ready"
                );
                Ok(info)
            }
            Err(e) => {
                remove_scratch(rootfs_path);
                Err(e)
            }
        }
    }
}
