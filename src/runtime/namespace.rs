//! Namespace setup and child process launch
//!
//! The launcher unshares the requested namespaces, maps the invoking user
//! to root inside the new user namespace, then re-executes itself as the
//! hidden `child` subcommand. The child lands inside the new namespaces
//! with a clean address space and drives the mount switch from there.

use nix::sched::{CloneFlags, unshare};
use nix::unistd::{getgid, getuid};
use std::fmt;
use std::fs;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

use crate::bundle::{LinuxNamespace, NamespaceKind};

/// Subcommand name the launcher re-executes itself with
pub const CHILD_COMMAND: &str = "child";

#[derive(Error, Debug)]
pub enum NamespaceError {
    #[error("no namespaces requested by runtime config")]
    NoneRequested,

    #[error("failed to unshare namespace: {0}")]
    UnshareError(String),

    #[error("failed to write UID/GID map: {0}")]
    MappingError(#[from] std::io::Error),

    #[error("failed to spawn container child: {0}")]
    SpawnError(std::io::Error),
}

/// One user or group ID remapping (container id, host id, range size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl fmt::Display for IdMapping {
    /// The /proc/<pid>/{uid,gid}_map line format
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// The single mapping per axis this runtime uses: container root is the
/// invoking host user, nothing else is mapped.
pub fn identity_mappings() -> (IdMapping, IdMapping) {
    let uid = IdMapping {
        container_id: 0,
        host_id: getuid().as_raw(),
        size: 1,
    };
    let gid = IdMapping {
        container_id: 0,
        host_id: getgid().as_raw(),
        size: 1,
    };
    (uid, gid)
}

/// Map the declared namespace kinds to clone flags. An empty list is an
/// error; a container with zero isolation is not meaningful here.
pub fn clone_flags(namespaces: &[LinuxNamespace]) -> Result<CloneFlags, NamespaceError> {
    if namespaces.is_empty() {
        return Err(NamespaceError::NoneRequested);
    }

    let mut flags = CloneFlags::empty();
    for ns in namespaces {
        flags |= match ns.kind {
            NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
            NamespaceKind::Network => CloneFlags::CLONE_NEWNET,
            NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
            NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
            NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        };
    }
    Ok(flags)
}

/// Enter the requested namespaces.
///
/// The user namespace is created unconditionally, whether or not `flags`
/// carries CLONE_NEWUSER: writing the ID maps requires the new user
/// namespace to exist, and holding CAP_SYS_ADMIN inside it is what lets an
/// unprivileged user unshare the rest. The child spawned afterwards
/// inherits all of them and becomes PID 1 of the PID namespace.
pub fn enter_namespaces(flags: CloneFlags) -> Result<(), NamespaceError> {
    let (uid_map, gid_map) = identity_mappings();

    debug!(%uid_map, %gid_map, "creating user namespace");
    unshare(CloneFlags::CLONE_NEWUSER)
        .map_err(|e| NamespaceError::UnshareError(format!("CLONE_NEWUSER: {e}")))?;

    fs::write("/proc/self/uid_map", uid_map.to_string())?;
    fs::write("/proc/self/setgroups", "deny")?;
    fs::write("/proc/self/gid_map", gid_map.to_string())?;

    let rest = flags & !CloneFlags::CLONE_NEWUSER;
    if !rest.is_empty() {
        debug!(?rest, "unsharing remaining namespaces");
        unshare(rest).map_err(|e| NamespaceError::UnshareError(format!("{rest:?}: {e}")))?;
    }

    Ok(())
}

/// Re-execute this binary as the hidden child subcommand, inside the
/// namespaces created by [`enter_namespaces`]. Blocks until the child
/// exits and returns its exit condition. One shot; namespace creation
/// failures are not transient, so nothing is retried.
pub fn spawn_child(bundle_dir: &Path) -> Result<ExitStatus, NamespaceError> {
    let self_exe = std::env::current_exe().map_err(NamespaceError::SpawnError)?;

    let status = Command::new(self_exe)
        .arg(CHILD_COMMAND)
        .arg(bundle_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(NamespaceError::SpawnError)?
        .wait()
        .map_err(NamespaceError::SpawnError)?;

    Ok(status)
}
