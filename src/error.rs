//! Error types for doc-migrator
//!
//! This module defines the error hierarchy used across the pipeline:
//! - Configuration errors (fatal, raised before any traversal starts)
//! - Repository errors reported by the source/target collaborators
//! - Per-document errors, isolated to a single work item
//! - Worker thread errors
//!
//! Only `ConfigError` and connectivity failures abort a run. Everything
//! raised while processing a document is recorded on the item and counted.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the migrator
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cannot establish a session with a repository
    #[error("It's not possible to establish connection with the {repository} repository: {reason}")]
    Connectivity { repository: String, reason: String },

    /// Repository errors outside of document processing (traversal, folders)
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Document processing errors surfaced outside of a chunk
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (failed-id lists, output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid thread count
    #[error("Invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Invalid chunk size
    #[error("Invalid chunk size {size}: must be between 1 and {max}")]
    InvalidChunkSize { size: usize, max: usize },

    /// Invalid page size
    #[error("Invalid page size {size}: must be between 1 and {max}")]
    InvalidPageSize { size: usize, max: usize },

    /// Root path in the target repository is malformed
    #[error("Invalid target root path '{path}': {reason}")]
    InvalidRootPath { path: String, reason: String },

    /// A parameter required by the selected profile is missing
    #[error("Missing parameter '{name}' required by the {profile} profile")]
    MissingParameter { name: String, profile: String },

    /// MOVE action configured without a destination folder
    #[error("The {outcome} action is MOVE but no {outcome} folder is configured")]
    MissingActionFolder { outcome: String },

    /// Rules file missing or not valid JSON
    #[error("Invalid rules file '{path}': {reason}")]
    InvalidRules { path: PathBuf, reason: String },

    /// Date pattern rejected by the formatter
    #[error("Invalid date format '{format}'")]
    InvalidDateFormat { format: String },

    /// `KEY=VALUE` argument without a separator
    #[error("Invalid pair '{value}' for --{flag}: expected KEY=VALUE")]
    InvalidPair { flag: String, value: String },

    /// Query is not a valid pattern
    #[error("Invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    /// Failed-id list cannot be read
    #[error("Cannot read failed-id list '{path}': {reason}")]
    InvalidFailedList { path: PathBuf, reason: String },
}

/// Errors reported by a repository collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Object does not exist
    #[error("Object not found: '{what}'")]
    NotFound { what: String },

    /// Object (folder, document, relationship) already exists
    #[error("Object already exists: '{what}'")]
    AlreadyExists { what: String },

    /// Path resolves to something that is not a folder
    #[error("Not a folder: '{path}'")]
    NotAFolder { path: String },

    /// Repository cannot be reached
    #[error("Repository '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// Query rejected by the repository
    #[error("Invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    /// Local storage failure
    #[error("I/O failure on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Stored metadata could not be decoded
    #[error("Corrupt metadata for '{path}': {reason}")]
    Corrupt { path: String, reason: String },

    /// Failure injected by a test double
    #[error("{0}")]
    Injected(String),
}

impl RepositoryError {
    /// Check if the error reports a conflict with an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RepositoryError::AlreadyExists { .. })
    }

    /// Check if the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::AlreadyExists {
            return RepositoryError::AlreadyExists { what: path.into() };
        }
        if err.kind() == std::io::ErrorKind::NotFound {
            return RepositoryError::NotFound { what: path.into() };
        }
        RepositoryError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Errors raised while migrating a single document
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Collaborator failure during one of the document steps
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Source metadata lacks something the writer needs
    #[error("Missing attribute '{name}' on source document {id}")]
    MissingAttribute { id: String, name: String },

    /// No rule, mode or default produced a destination
    #[error("It's not possible to determine the destination path for the document. If there's no default path configured the document migration will fail")]
    NoDestination,

    /// Property value could not be rendered with the rule's date format
    #[error("Cannot format value '{value}' of property '{property}' as a date: {reason}")]
    DateValue {
        property: String,
        value: String,
        reason: String,
    },

    /// Post-write validation failed
    #[error("{0}")]
    Validation(String),

    /// Compensating delete failed after a document error
    #[error("Unable to delete document: {id}, Exception1: {cause}, Exception2: {rollback}")]
    Rollback {
        id: String,
        cause: Box<DocumentError>,
        rollback: RepositoryError,
    },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker initialization failed
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },

    /// Outcome channel closed
    #[error("Outcome channel closed unexpectedly")]
    ChannelClosed,
}

/// Result type alias for MigrateError
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Result type alias for RepositoryError
pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Result type alias for DocumentError
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_message_keeps_both_causes() {
        let err = DocumentError::Rollback {
            id: "node-1".into(),
            cause: Box::new(DocumentError::Validation("upload broke".into())),
            rollback: RepositoryError::Injected("delete refused".into()),
        };

        assert_eq!(
            err.to_string(),
            "Unable to delete document: node-1, Exception1: upload broke, Exception2: delete refused"
        );
    }

    #[test]
    fn test_io_error_mapping() {
        let exists = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists");
        assert!(RepositoryError::io("/a", exists).is_already_exists());

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(RepositoryError::io("/a", missing).is_not_found());
    }

    #[test]
    fn test_error_conversion() {
        let repo_err = RepositoryError::NotFound { what: "/missing".into() };
        let err: MigrateError = repo_err.into();
        assert!(matches!(err, MigrateError::Repository(_)));
    }
}
