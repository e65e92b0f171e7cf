//! OCI runtime bundle loading
//!
//! A bundle is a directory holding `config.json` (the container spec) and
//! `rootfs/` (the filesystem the container pivots into). Both the launcher
//! and the re-executed child load the bundle independently; loading is a
//! pure read with no side effects.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{CONFIG_FILE, ROOTFS_DIR};

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to read runtime config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse runtime config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("failed to write runtime config {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to resolve rootfs path: {0}")]
    RootfsPath(std::io::Error),

    #[error("no process provided by runtime config")]
    NoProcess,
}

/// Container user identity (inside the user namespace)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

/// Declared capability sets. Recorded but not yet enforced; see exec.rs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub permitted: Vec<String>,
}

/// POSIX resource limit entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub hard: u64,
    pub soft: u64,
}

/// The process to execute inside the container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Process {
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    pub rlimits: Vec<Rlimit>,
    pub no_new_privileges: bool,
}

/// One declared mount. Order in the config is significant: later entries
/// may target paths created by earlier ones (e.g. /dev/pts under /dev).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub fstype: String,
    pub source: String,
    pub options: Vec<String>,
}

/// Namespace kinds the runtime knows how to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    Mount,
    Pid,
    Network,
    Ipc,
    Uts,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxNamespace {
    #[serde(rename = "type")]
    pub kind: NamespaceKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Linux {
    pub namespaces: Vec<LinuxNamespace>,
    pub masked_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
}

/// OCI runtime config subset consumed by the runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerSpec {
    pub oci_version: String,
    pub process: Process,
    pub hostname: String,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

impl ContainerSpec {
    /// Check the invariants a bundle must satisfy before any namespace or
    /// mount mutation happens. A spec with no program to run is invalid.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.process.args.is_empty() {
            return Err(BundleError::NoProcess);
        }
        Ok(())
    }
}

/// A loaded bundle: the parsed spec plus the absolute rootfs path
#[derive(Debug, Clone)]
pub struct RuntimeBundle {
    pub spec: ContainerSpec,
    pub rootfs: PathBuf,
}

/// Load a runtime bundle from disk.
///
/// Fails with a descriptive error if the config file is missing, unreadable
/// or malformed; no partial result is returned. The rootfs path is made
/// absolute without requiring it to exist yet.
pub fn load(bundle_dir: &Path) -> Result<RuntimeBundle, BundleError> {
    let config_path = bundle_dir.join(CONFIG_FILE);
    let raw = fs::read_to_string(&config_path).map_err(|source| BundleError::ConfigRead {
        path: config_path,
        source,
    })?;
    let spec: ContainerSpec = serde_json::from_str(&raw)?;

    let rootfs = std::path::absolute(bundle_dir.join(ROOTFS_DIR)).map_err(BundleError::RootfsPath)?;

    Ok(RuntimeBundle { spec, rootfs })
}

/// Write a container spec as the bundle's config.json
pub fn write_config(bundle_dir: &Path, spec: &ContainerSpec) -> Result<(), BundleError> {
    let config_path = bundle_dir.join(CONFIG_FILE);
    let raw = serde_json::to_string_pretty(spec)?;
    fs::write(&config_path, raw).map_err(|source| BundleError::ConfigWrite {
        path: config_path,
        source,
    })?;
    Ok(())
}
