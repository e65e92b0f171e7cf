//! CLI command implementations

pub mod child;
pub mod create;
pub mod pull;
pub mod run;
