//! Container runtime - namespaces, mounts, and execution

mod exec;
mod mount;
mod namespace;
pub(crate) mod sys;

pub use exec::*;
pub use mount::*;
pub use namespace::*;
pub use sys::{RealSys, Sys};
