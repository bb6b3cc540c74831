//! efibuild - reproducible OpenCore EFI builds
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! A thin command line over `efibuild_core::ops`: each subcommand runs one
//! phase (or all three) against a manifest, its lockfile and an output
//! directory.
//!
//! ```text
//! efibuild.yml    # build manifest
//! efibuild.lock   # resolved sources and checksums
//! dist/           # assembled EFI/, Docs/, Utilities/
//! ```

pub mod cmd;
pub mod console;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use efibuild_core::ops::PatchOptions;
use efibuild_core::{Environment, ResolveOptions};

/// Manifest read when `--manifest` is not given.
pub const DEFAULT_MANIFEST: &str = "efibuild.yml";

/// Lockfile written when `--lockfile` is not given.
pub const DEFAULT_LOCKFILE: &str = "efibuild.lock";

/// Output directory used when `--output` is not given.
pub const DEFAULT_OUTPUT: &str = "dist";

#[derive(Debug, Parser)]
#[command(name = "efibuild")]
#[command(author, version, about = "efibuild - reproducible OpenCore EFI builds")]
pub struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Token for authenticated GitHub API queries
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Parent directory for the download cache
    #[arg(long, global = true, env = "EFIBUILD_CACHE")]
    pub cache: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Files every phase works on.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Build manifest
    #[arg(short, long, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Lockfile to read and write
    #[arg(short, long, default_value = DEFAULT_LOCKFILE)]
    pub lockfile: PathBuf,

    /// Output directory for the assembled tree
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
}

/// Options of the resolve phase.
#[derive(Debug, Clone, Copy, Args)]
pub struct ResolveArgs {
    /// Re-resolve entries already in the lockfile
    #[arg(short, long)]
    pub update: bool,

    /// Re-resolve every entry and forget recorded checksums
    #[arg(short, long)]
    pub force: bool,

    /// Fail when a local path is missing or any entry cannot be resolved
    #[arg(long)]
    pub strict: bool,
}

impl From<ResolveArgs> for ResolveOptions {
    fn from(args: ResolveArgs) -> Self {
        Self {
            update: args.update,
            force: args.force,
            strict: args.strict,
        }
    }
}

/// Options of the patch phase.
#[derive(Debug, Clone, Args)]
pub struct PatchArgs {
    /// Rebuild component tables without keeping existing record fields
    #[arg(long)]
    pub clean: bool,

    /// Patch file to apply (plist or manifest language); repeatable
    #[arg(short, long = "patch", value_name = "FILE")]
    pub patches: Vec<PathBuf>,
}

impl From<PatchArgs> for PatchOptions {
    fn from(args: PatchArgs) -> Self {
        Self {
            clean: args.clean,
            patches: args.patches,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the manifest into the lockfile
    Resolve {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(flatten)]
        resolve: ResolveArgs,
    },
    /// Fetch locked sources and assemble the output tree
    Build {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Rewrite config.plist to match the output tree
    Patch {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Resolve, build and patch
    Run {
        #[command(flatten)]
        project: ProjectArgs,
        #[command(flatten)]
        resolve: ResolveArgs,
        #[command(flatten)]
        patch: PatchArgs,
    },
}

impl Cli {
    /// Runtime settings for `project`, with this invocation's global flags.
    pub fn environment(&self, project: &ProjectArgs) -> Environment {
        Environment {
            verbose: self.verbose,
            token: self.token.clone().filter(|t| !t.is_empty()),
            cache_root: self.cache.clone(),
            output: project.output.clone(),
        }
    }
}
