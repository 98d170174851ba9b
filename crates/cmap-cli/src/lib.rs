//! # cmap-cli
//!
//! Command-line interface for the cmap agency.
//!
//! ## Commands
//!
//! - `cmap-agency start` - Bootstrap the agency and serve the control API
//! - `cmap-agency config` - Show the effective configuration
//! - `cmap-agency doctor` - Validate configuration and probe the directory
//! - `cmap-agency version` - Show version and build info

pub mod commands;

pub use commands::Cli;
