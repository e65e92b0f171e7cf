//! Pull command: fetch an image and write a runtime bundle

use std::fs;
use std::path::Path;

use crate::image::{self, ImageError};

pub fn pull(image: &str, bundle_dir: &Path) -> Result<(), ImageError> {
    fs::create_dir_all(bundle_dir)?;
    image::pull(image, bundle_dir)
}
