//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including identifier validation, hash format checks and index edits.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid note identifier
    #[error("Invalid note ID: {0}")]
    InvalidNoteId(String),

    /// Invalid folder identifier
    #[error("Invalid folder ID: {0}")]
    InvalidFolderId(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid hash format (expected Base64 SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid change-feed token
    #[error("Invalid change token: {0}")]
    InvalidChangeToken(String),

    /// Folder referenced by an index edit does not exist
    #[error("Unknown folder: {0}")]
    UnknownFolder(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
