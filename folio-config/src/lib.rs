//! Configuration loading for Folio.
//!
//! A TOML file, the process environment and an optional `.env` file are
//! merged into a [`Config`], which converts into the
//! [`folio_core::LibraryOptions`] a library is opened with. Environment
//! variables override the file.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LibraryPaths, WatchSettings};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
