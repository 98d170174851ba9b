//! # cmap-config
//!
//! Configuration system for the cmap agency. Reads from `agency.toml` and
//! environment variables; the environment wins over the file.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::AgencyConfig;
pub use schema::{ConfigWarning, WarningSeverity};
