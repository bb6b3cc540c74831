//! efibuild core: specifier resolution, the lockfile, package extraction,
//! kext and ACPI ordering, and the configuration merge pipeline.

pub mod acpi;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod graph;
pub mod io;
pub mod kexts;
pub mod lockfile;
pub mod manifest;
pub mod ops;
pub mod package;
pub mod parsers;
pub mod reporter;
pub mod resolver;

pub use cache::Cache;
pub use catalog::{CatalogConfig, GithubCatalog, SourceCatalog};
pub use env::Environment;
pub use error::{Error, Result};
pub use lockfile::{Lockfile, ResolveOptions};
pub use manifest::Manifest;
pub use reporter::{NullReporter, ProgressExt, Reporter};

/// User Agent string for catalog and download requests
pub const USER_AGENT: &str = concat!("efibuild/", env!("CARGO_PKG_VERSION"));
