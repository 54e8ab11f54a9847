//! Command line interface module
//!
//! Argument parsing and the runner that turns a parsed command into registry
//! queries and JSON output.

pub mod args;
pub mod runner;

pub use args::{Args, CacheCommand, Command};
pub use runner::Runner;
