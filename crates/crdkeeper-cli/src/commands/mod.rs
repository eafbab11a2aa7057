//! CLI commands

pub mod install;
pub mod plan;
pub mod validate;
