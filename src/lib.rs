//! Cubby - a minimal OCI-compatible container runtime
//!
//! Turns an OCI runtime bundle (rootfs + config.json) into a running,
//! isolated process using Linux user namespaces.

pub mod bundle;
pub mod cli;
pub mod image;
pub mod runtime;

pub use bundle::{ContainerSpec, RuntimeBundle};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "cubby";

/// Bundle config file name (OCI runtime spec)
pub const CONFIG_FILE: &str = "config.json";

/// Bundle rootfs directory name
pub const ROOTFS_DIR: &str = "rootfs";

/// Default container hostname
pub const CONTAINER_HOSTNAME: &str = "cubby";

/// Default registry host for unqualified image references
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";
