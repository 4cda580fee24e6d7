//! # Burrow CLI
//!
//! `burrow-cache` inspects and maintains a node's block cache directory:
//! space statistics, block listing, manual put/get/remove, integrity scans
//! and resizing. Commands that change the cache save its index on exit.

pub mod commands;
pub mod config;

pub use commands::{run, Command};
pub use config::ToolConfig;
