//! Error kinds shared by every phase.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use efibuild_schema::{Kind, ValueError};
use thiserror::Error;

use crate::io::extract::ExtractError;
use crate::parsers::ParseError;

/// Result alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid specifier '{0}'")]
    SpecifierSyntax(String),

    #[error("No version of {name} satisfies '{specifier}'")]
    VersionUnresolved { name: String, specifier: String },

    #[error("API rate limit exceeded, resets at {reset}")]
    RateLimited { reset: DateTime<Utc> },

    #[error("Archive error: {0}")]
    ArchiveFormat(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("{kind} '{name}' is missing from the output tree (expected {path})")]
    PathShapeInvalid {
        kind: Kind,
        name: String,
        path: String,
    },

    #[error("Dependency cycle between: {}", participants.join(", "))]
    DependencyCycle { participants: Vec<String> },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("{tool} failed on {}: {message}", path.display())]
    Tool {
        tool: String,
        path: PathBuf,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl Error {
    /// Whether resolution may record this error against one entry and move
    /// on to the next. Everything else aborts the phase.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SpecifierSyntax(_) | Self::VersionUnresolved { .. } | Self::PathNotFound(_)
        )
    }
}

impl From<ExtractError> for Error {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Io(io) => Self::Io(io),
            other => Self::ArchiveFormat(other.to_string()),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse {
            line: e.line,
            message: e.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(Error::SpecifierSyntax("x".into()).is_recoverable());
        assert!(Error::PathNotFound(PathBuf::from("/nope")).is_recoverable());
        assert!(!Error::RateLimited { reset: Utc::now() }.is_recoverable());
        assert!(
            !Error::DependencyCycle {
                participants: vec!["A".into(), "B".into()]
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_cycle_message_names_participants() {
        let e = Error::DependencyCycle {
            participants: vec!["Lilu".into(), "WhateverGreen".into()],
        };
        assert_eq!(e.to_string(), "Dependency cycle between: Lilu, WhateverGreen");
    }
}
