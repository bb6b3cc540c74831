//! Runtime settings threaded through every phase.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Environment {
    pub verbose: bool,
    /// Bearer token for authenticated catalog queries.
    pub token: Option<String>,
    /// Parent directory for the process cache; the platform temp dir when
    /// unset.
    pub cache_root: Option<PathBuf>,
    /// Root of the assembled EFI tree.
    pub output: PathBuf,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            verbose: false,
            token: None,
            cache_root: None,
            output: PathBuf::from("dist"),
        }
    }
}
