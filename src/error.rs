//! Error types for artifact resolution and extraction.
//!
//! Inside the resolver core almost nothing is fatal: unresolvable variables,
//! missing registry paths and unreadable entries are logged and skipped.
//! These error types are used at the collaborator boundaries (catalogue,
//! VFS, registry opener, output store) and by the partition driver.

use std::io;
use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors that can occur while resolving or extracting artifacts.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// I/O error while reading evidence or writing output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An artifact definition file could not be parsed.
    #[error("Invalid artifact definition in {path}: {message}")]
    InvalidDefinition {
        path: String,
        message: String,
    },

    /// The requested artifact does not exist in the catalogue.
    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    /// A path-spec did not resolve to an entry on the evidence.
    #[error("Path not found on evidence: {0}")]
    PathNotFound(String),

    /// A registry hive referenced by the mapping table is missing.
    #[error("Registry hive not found: {0}")]
    HiveNotFound(String),

    /// No hive parsing backend is available to open a hive file.
    #[error("Hive parsing unavailable for {0}")]
    HiveUnavailable(String),

    /// A registry key path could not be opened.
    #[error("Registry key not found: {0}")]
    KeyNotFound(String),

    /// No Windows directory was found while bootstrapping a Windows system.
    #[error("No Windows directory found on {0}")]
    NoWindowsDirectory(String),

    /// The output store rejected a record.
    #[error("Store error: {0}")]
    Store(String),

    /// A record could not be serialised.
    #[error("Serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    /// Creates an invalid-definition error with file context.
    pub fn invalid_definition(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a store error from any displayable cause.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
