//! Layer extraction onto the bundle rootfs
//!
//! Each layer is a gzipped tar applied in order on top of the previous
//! ones. Entry paths are re-rooted under the rootfs; anything trying to
//! step outside it is rejected outright rather than sanitized.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use tracing::warn;

use super::ImageError;

/// Join an archive entry path onto the rootfs, refusing any component
/// that would escape it.
fn safe_join(rootfs: &Path, entry_path: &Path) -> Result<PathBuf, ImageError> {
    let mut target = rootfs.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ImageError::PathTraversal(
                    entry_path.display().to_string(),
                ));
            }
        }
    }
    Ok(target)
}

/// Extract one gzip-compressed layer blob into the rootfs
pub fn extract_layer(blob: &[u8], rootfs: &Path) -> Result<(), ImageError> {
    let decoder = GzDecoder::new(blob);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = safe_join(rootfs, &entry_path)?;
        let mode = entry.header().mode().unwrap_or(0o644);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&target)?;
                io::copy(&mut entry, &mut file)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
            EntryType::Symlink => {
                let link = entry.link_name()?.ok_or_else(|| {
                    ImageError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("symlink entry without target: {}", entry_path.display()),
                    ))
                })?;
                if let Err(e) = std::os::unix::fs::symlink(&link, &target) {
                    if e.kind() != io::ErrorKind::AlreadyExists {
                        return Err(e.into());
                    }
                }
            }
            other => {
                warn!(entry = %entry_path.display(), kind = ?other, "ignoring unsupported tar entry");
            }
        }
    }

    Ok(())
}
