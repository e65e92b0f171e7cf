//! Child command: runs inside the new namespaces
//!
//! Re-executed by the launcher, never invoked by users directly. Loads the
//! bundle again (separate address space, no shared state with the
//! launcher), switches the mount namespace onto the rootfs and replaces
//! itself with the container process.

use std::path::Path;
use thiserror::Error;

use crate::bundle::{self, BundleError};
use crate::runtime::{ExecError, MountError, RealSys, exec_process, switch_root};

#[derive(Error, Debug)]
pub enum ChildError {
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("exec error: {0}")]
    Exec(#[from] ExecError),
}

pub fn child(bundle_dir: &Path) -> Result<(), ChildError> {
    let bundle = bundle::load(bundle_dir)?;
    // fail fast before the first irreversible mount operation
    bundle.spec.validate()?;

    let sys = RealSys;
    switch_root(
        &sys,
        &bundle.rootfs,
        &bundle.spec.mounts,
        &bundle.spec.hostname,
    )?;
    exec_process(&sys, &bundle.spec.process)?;

    // exec_process only returns through the error path on the real syscall
    // layer, so this is unreachable in practice
    Ok(())
}
