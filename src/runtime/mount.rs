//! Mount option translation and the root-switch sequence
//!
//! The sequence that converts the freshly-entered mount namespace into one
//! rooted at the bundle's rootfs is strictly ordered and has no rollback:
//! propagation must be private before the rootfs self-bind, the declared
//! mounts go in before the pivot, and the old root is detached last. A
//! failed step aborts the launch; the kernel tears the namespace down when
//! the child exits.

use nix::mount::MsFlags;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::sys::Sys;
use crate::bundle::Mount;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error("pivot root failed: {0}")]
    PivotFailed(String),

    #[error("mount destination escapes the root filesystem: {0}")]
    PathTraversal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed mount request, ready for the mount syscall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDirective {
    pub destination: String,
    pub fstype: String,
    pub source: String,
    pub flags: MsFlags,
    pub data: String,
}

impl MountDirective {
    pub fn from_mount(mount: &Mount) -> Self {
        let (flags, data) = parse_mount_options(&mount.options);
        Self {
            destination: mount.destination.clone(),
            fstype: mount.fstype.clone(),
            source: mount.source.clone(),
            flags,
            data,
        }
    }
}

/// Map one OCI mount option string to mount flag bits. Returns None for
/// strings the mount syscall does not understand itself; those are
/// filesystem-specific data tokens.
fn option_flag(option: &str) -> Option<MsFlags> {
    Some(match option {
        "defaults" | "rw" => MsFlags::empty(),
        "ro" => MsFlags::MS_RDONLY,
        "nosuid" => MsFlags::MS_NOSUID,
        "nodev" => MsFlags::MS_NODEV,
        "noexec" => MsFlags::MS_NOEXEC,
        "sync" => MsFlags::MS_SYNCHRONOUS,
        "dirsync" => MsFlags::MS_DIRSYNC,
        "remount" => MsFlags::MS_REMOUNT,
        "mand" => MsFlags::MS_MANDLOCK,
        "noatime" => MsFlags::MS_NOATIME,
        "nodiratime" => MsFlags::MS_NODIRATIME,
        "relatime" => MsFlags::MS_RELATIME,
        "strictatime" => MsFlags::MS_STRICTATIME,
        "lazytime" => MsFlags::MS_LAZYTIME,
        "silent" => MsFlags::MS_SILENT,
        "bind" => MsFlags::MS_BIND,
        "rbind" => MsFlags::MS_BIND | MsFlags::MS_REC,
        "private" => MsFlags::MS_PRIVATE,
        "rprivate" => MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        "shared" => MsFlags::MS_SHARED,
        "rshared" => MsFlags::MS_SHARED | MsFlags::MS_REC,
        "slave" => MsFlags::MS_SLAVE,
        "rslave" => MsFlags::MS_SLAVE | MsFlags::MS_REC,
        "unbindable" => MsFlags::MS_UNBINDABLE,
        "runbindable" => MsFlags::MS_UNBINDABLE | MsFlags::MS_REC,
        _ => return None,
    })
}

/// Convert OCI mount options into the flags/data pair the mount syscall
/// expects. Unrecognized options are passed through as filesystem data in
/// their original order; some filesystems are sensitive to option ordering.
pub fn parse_mount_options(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data: Vec<&str> = Vec::new();

    for option in options {
        match option_flag(option) {
            Some(bits) => flags |= bits,
            None => data.push(option),
        }
    }

    (flags, data.join(","))
}

/// Switch the mount namespace over to the bundle rootfs.
///
/// Runs in the re-executed child, already inside the new namespaces. The
/// `pivot_root(".", ".")` form stacks the old root on top of the new one so
/// it can be detached immediately, without a scratch directory to hold it.
pub fn switch_root(
    sys: &dyn Sys,
    rootfs: &Path,
    mounts: &[Mount],
    hostname: &str,
) -> Result<(), MountError> {
    // 1. recursively mark all mounts private so nothing leaks to the host
    debug!("marking all mounts as private");
    sys.mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| MountError::MountFailed(format!("make mount tree private: {e}")))?;

    // 2. bind the rootfs to itself; pivot_root needs a mount point
    debug!(rootfs = %rootfs.display(), "creating bind mount for rootfs");
    sys.mount(
        Some(rootfs),
        rootfs,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| MountError::MountFailed(format!("bind rootfs {}: {e}", rootfs.display())))?;

    // 3. declared mounts, in config order
    for mount in mounts {
        let directive = MountDirective::from_mount(mount);
        apply_mount(sys, rootfs, &directive)?;
    }

    // 4. pivot into the rootfs and drop the old root
    debug!("pivoting root to rootfs");
    sys.chdir(rootfs)
        .map_err(|e| MountError::PivotFailed(format!("chdir to rootfs: {e}")))?;
    sys.pivot_root(Path::new("."), Path::new("."))
        .map_err(|e| MountError::PivotFailed(format!("pivot_root: {e}")))?;
    sys.chdir(Path::new("/"))
        .map_err(|e| MountError::PivotFailed(format!("chdir /: {e}")))?;
    sys.umount_detach(Path::new("."))
        .map_err(|e| MountError::PivotFailed(format!("detach old root: {e}")))?;

    // 5. hostname, visible only because of the new UTS namespace
    if !hostname.is_empty() {
        debug!(hostname, "setting hostname");
        sys.sethostname(hostname)
            .map_err(|e| MountError::MountFailed(format!("sethostname {hostname}: {e}")))?;
    }

    Ok(())
}

/// Join a mount destination onto the rootfs, refusing any component that
/// would escape it. Destinations come straight from the config and must
/// never resolve to a host path.
fn contained_join(rootfs: &Path, destination: &str) -> Result<PathBuf, MountError> {
    let mut target = rootfs.to_path_buf();
    for component in Path::new(destination.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => return Err(MountError::PathTraversal(destination.to_string())),
        }
    }
    Ok(target)
}

fn apply_mount(sys: &dyn Sys, rootfs: &Path, directive: &MountDirective) -> Result<(), MountError> {
    let target = contained_join(rootfs, &directive.destination)?;
    debug!(destination = %directive.destination, "creating mount from config");

    sys.create_dir_all(&target)?;

    let source = (!directive.source.is_empty()).then(|| Path::new(&directive.source));
    let fstype = (!directive.fstype.is_empty()).then_some(directive.fstype.as_str());
    let data = (!directive.data.is_empty()).then_some(directive.data.as_str());

    sys.mount(source, &target, fstype, directive.flags, data)
        .map_err(|e| MountError::MountFailed(format!("mount {}: {e}", directive.destination)))
}
