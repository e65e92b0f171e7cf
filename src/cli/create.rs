//! Create command: validate a bundle without starting it

use std::path::Path;
use tracing::info;

use crate::bundle::{self, BundleError};

pub fn create(container_id: &str, bundle_dir: &Path) -> Result<(), BundleError> {
    let bundle = bundle::load(bundle_dir)?;
    bundle.spec.validate()?;

    info!(
        container = container_id,
        rootfs = %bundle.rootfs.display(),
        "bundle is valid"
    );
    Ok(())
}
