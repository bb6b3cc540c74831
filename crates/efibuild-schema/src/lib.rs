//! Shared data model for efibuild: the ordered document tree that property
//! lists and manifests decode into, component categories, and version
//! matching. Nothing in this crate touches the filesystem or network.

pub mod types;
pub mod value;
pub mod version;

// Re-exports
pub use types::*;
pub use value::{Dict, PathSegment, Uid, Value, ValueError, format_path, parse_path};
pub use version::{
    Comparator, ParsedVersion, VersionSpecifier, compare, is_range_specifier, minimum_version,
    parse_version, resolve_specifier,
};

/// Algorithm label stored alongside digests in lockfiles.
pub const DIGEST_ALGORITHM: &str = "SHA256";
