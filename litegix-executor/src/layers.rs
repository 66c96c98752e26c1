//! In-process application of image layer archives.
//!
//! Layers are applied in manifest order over one merged directory: later
//! layers overwrite earlier files, and OCI whiteout entries remove what lower
//! layers put there. Plain and gzip-compressed tar layers are supported.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use nix::unistd::geteuid;
use tar::{Archive, EntryType};

use crate::ExecutorError;

/// Prefix marking a whiteout entry that deletes its lower-layer sibling.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Entry marking its directory as opaque: lower-layer contents are hidden.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a layer archive, transparently decompressing gzip.
fn open_layer(path: &Path) -> io::Result<Archive<Box<dyn Read>>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    // chown only works for root; unprivileged unpacks keep the caller's ids.
    archive.set_preserve_ownerships(geteuid().is_root());
    archive.set_unpack_xattrs(true);
    archive.set_overwrite(true);
    Ok(archive)
}

/// Normalise an entry path, rejecting anything that could escape the root.
fn sanitize(path: &Path) -> Result<PathBuf, String> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("unsafe entry path {}", path.display()));
            }
        }
    }
    Ok(clean)
}

/// Join `rel` onto `root` one component at a time without following
/// symlinks. Returns `Ok(None)` if a component does not exist.
///
/// A symlink anywhere along `rel` is an error: a lower layer may point it at
/// the host, and removal through it would escape the root.
fn resolve_in_root(root: &Path, rel: &Path) -> Result<Option<PathBuf>, String> {
    let mut current = root.to_path_buf();
    for component in rel.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(format!(
                    "{} passes through symlink {}",
                    rel.display(),
                    current.display()
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("stat {}: {e}", current.display())),
        }
    }
    Ok(Some(current))
}

/// Remove whatever is at `path`, directory or not. Missing paths are fine.
fn remove_any(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove every child of `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        remove_any(&entry?.path())?;
    }
    Ok(())
}

/// Whiteouts found in one layer.
#[derive(Debug, Default)]
struct Whiteouts {
    /// Directories whose lower contents are hidden.
    opaque: Vec<PathBuf>,
    /// Paths deleted from lower layers.
    removed: Vec<PathBuf>,
}

fn scan_whiteouts(layer: &Path) -> Result<Whiteouts, String> {
    let mut archive = open_layer(layer).map_err(|e| e.to_string())?;
    let mut found = Whiteouts::default();

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let entry = entry.map_err(|e| e.to_string())?;
        let path = sanitize(&entry.path().map_err(|e| e.to_string())?)?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

        if name == OPAQUE_WHITEOUT {
            found.opaque.push(parent);
        } else if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
            if !target.is_empty() {
                found.removed.push(parent.join(target));
            }
        }
    }
    Ok(found)
}

fn unpack_layer(layer: &Path, root: &Path) -> Result<u64, String> {
    let mut archive = open_layer(layer).map_err(|e| e.to_string())?;
    let mut unpacked = 0u64;

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = sanitize(&entry.path().map_err(|e| e.to_string())?)?;
        if path.as_os_str().is_empty() {
            continue;
        }
        let is_whiteout = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(WHITEOUT_PREFIX));
        if is_whiteout {
            continue;
        }

        // A lower file and an upper directory (or vice versa) cannot share a
        // path. Parents behind symlinks are left to `unpack_in`, which keeps
        // every write inside the root.
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if let Ok(Some(dir)) = resolve_in_root(root, parent) {
            let dest = path.file_name().map_or_else(|| dir.clone(), |name| dir.join(name));
            if let Ok(existing) = fs::symlink_metadata(&dest) {
                let entry_is_dir = entry.header().entry_type() == EntryType::Directory;
                if existing.is_dir() != entry_is_dir || existing.file_type().is_symlink() {
                    remove_any(&dest).map_err(|e| format!("replace {}: {e}", path.display()))?;
                }
            }
        }

        entry
            .unpack_in(root)
            .map_err(|e| format!("unpack {}: {e}", path.display()))?;
        unpacked += 1;
    }
    Ok(unpacked)
}

/// Apply one layer archive over `root`.
///
/// Whiteouts are applied first against the lower layers, then the layer's
/// regular entries are unpacked. Returns the number of entries unpacked.
///
/// # Errors
/// Returns [`ExecutorError::LayerExtraction`] on unreadable archives, unsafe
/// entry paths or filesystem failures.
pub fn apply_layer(layer: &Path, root: &Path) -> Result<u64, ExecutorError> {
    let fail = |reason: String| ExecutorError::LayerExtraction {
        layer: layer.display().to_string(),
        reason,
    };

    let whiteouts = scan_whiteouts(layer).map_err(fail)?;
    for dir in &whiteouts.opaque {
        let Some(target) = resolve_in_root(root, dir).map_err(fail)? else {
            continue;
        };
        if target.is_dir() {
            clear_dir(&target).map_err(|e| fail(format!("opaque {}: {e}", dir.display())))?;
        }
    }
    for path in &whiteouts.removed {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let resolved = resolve_in_root(root, parent).map_err(fail)?;
        let (Some(dir), Some(name)) = (resolved, path.file_name()) else {
            continue;
        };
        remove_any(&dir.join(name))
            .map_err(|e| fail(format!("whiteout {}: {e}", path.display())))?;
    }

    unpack_layer(layer, root).map_err(fail)
}

/// Apply `layers` in order over `root`, creating it if needed.
///
/// # Errors
/// Returns the first [`ExecutorError::LayerExtraction`] encountered.
pub fn apply_layers(layers: &[PathBuf], root: &Path) -> Result<(), ExecutorError> {
    fs::create_dir_all(root)?;
    for (index, layer) in layers.iter().enumerate() {
        let entries = apply_layer(layer, root)?;
        tracing::debug!(layer = index + 1, path = %layer.display(), entries, "applied image layer");
    }
    Ok(())
}

/// Unpack a plain archive (such as a `docker save` export) into `dest`.
///
/// # Errors
/// Returns [`ExecutorError::ImagePull`] naming `image` if the archive cannot
/// be read or unpacked.
pub fn extract_archive(archive: &Path, dest: &Path, image: &str) -> Result<(), ExecutorError> {
    let fail = |reason: String| ExecutorError::ImagePull {
        image: image.to_owned(),
        reason,
    };
    fs::create_dir_all(dest)?;
    let mut archive = open_layer(archive).map_err(|e| fail(format!("open export: {e}")))?;
    archive
        .unpack(dest)
        .map_err(|e| fail(format!("extract export: {e}")))
}
