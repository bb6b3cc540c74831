//! Document parsers: property lists, the manifest language, ACPI source,
//! and the upstream configuration reference.

pub mod acpi;
pub mod manifest;
pub mod plist;
pub mod schema;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number, 0 when not attributable to a line.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}
