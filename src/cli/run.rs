//! Run command: the launcher phase
//!
//! Loads the bundle, validates it, enters the declared namespaces and
//! re-executes this binary as the hidden child subcommand. The child's
//! exit condition becomes this process's own.

use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::bundle::{self, BundleError};
use crate::runtime::{NamespaceError, clone_flags, enter_namespaces, spawn_child};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("namespace error: {0}")]
    Namespace(#[from] NamespaceError),
}

pub fn run(container_id: &str, bundle_dir: &Path) -> Result<(), RunError> {
    let bundle = bundle::load(bundle_dir)?;
    // configuration errors must surface before any namespace syscall
    bundle.spec.validate()?;
    let flags = clone_flags(&bundle.spec.linux.namespaces)?;

    info!(container = container_id, "run");
    enter_namespaces(flags)?;
    let status = spawn_child(bundle_dir)?;

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
