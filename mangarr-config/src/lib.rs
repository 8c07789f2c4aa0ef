//! Configuration loading for Mangarr.
//!
//! Values resolve as command line, then environment (including `.env`),
//! then `mangarr.toml`, then built-in defaults.

#![allow(missing_docs)]

pub mod cli;
pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use cli::CliOverrides;
pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LibraryConfig, PathsConfig};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
