//! Side-effecting primitives: downloads, archives, digests, filesystem.

pub mod digest;
pub mod download;
pub mod extract;
pub mod fs;
