//! Remote store port (driven/secondary port)
//!
//! This module defines the interface to the remote blob store that plays
//! the role of the "server". The store is generic: it knows nothing about
//! notes, only named blobs with ids, modification times and a resumable
//! change feed.
//!
//! ## Design Notes
//!
//! - Unlike the local-store port, errors here are a typed [`RemoteError`]:
//!   the engine decides between retrying, falling back, and going offline
//!   based on the error kind.
//! - Uses `#[async_trait]` for async trait methods.
//! - `modified` timestamps are assigned by the store, never by a device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ChangeToken, RemoteId};

// ============================================================================
// DTOs
// ============================================================================

/// Metadata the store reports for a blob after a write or lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub id: RemoteId,
    pub name: String,
    /// Store-assigned modification time
    pub modified: DateTime<Utc>,
}

/// One entry of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub id: RemoteId,
    pub name: String,
}

/// Filter for [`IRemoteStore::list_blobs`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobQuery {
    /// Restrict to children of this parent
    pub parent: Option<RemoteId>,
    /// Exact blob name
    pub name: Option<String>,
    /// Blob name prefix
    pub prefix: Option<String>,
}

impl BlobQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn in_parent(mut self, parent: Option<RemoteId>) -> Self {
        self.parent = parent;
        self
    }

    /// Whether an entry with this name and parent matches the query
    pub fn matches(&self, name: &str, parent: Option<&RemoteId>) -> bool {
        if let Some(wanted) = &self.parent {
            if parent != Some(wanted) {
                return false;
            }
        }
        if let Some(exact) = &self.name {
            if exact != name {
                return false;
            }
        }
        if let Some(prefix) = &self.prefix {
            if !name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A single change reported by the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub id: RemoteId,
    /// Blob name, when the store reports it
    pub name: Option<String>,
    pub removed: bool,
}

/// One page of the change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePage {
    pub changes: Vec<RemoteChange>,
    /// Cursor to pass to the next `list_changes` call
    pub new_token: ChangeToken,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by a remote store adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The network is unreachable or the connection dropped
    #[error("Network error: {0}")]
    Network(String),

    /// The request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The store answered with a server-side failure
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The blob does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The credentials are valid but lack access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The credentials are missing, expired or revoked
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// The change-feed cursor is no longer accepted
    #[error("Change token rejected: {0}")]
    InvalidToken(String),

    /// The store returned something the adapter could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Errors worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => true,
            RemoteError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Errors that mean the store is unreachable for this device right now
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::Timeout(_)
                | RemoteError::Unauthenticated(_)
                | RemoteError::PermissionDenied(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Result alias for remote store operations
pub type RemoteResult<T> = Result<T, RemoteError>;

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the remote blob store
///
/// ## Implementation Notes
///
/// - `update_blob` and `delete_blob` on an unknown id return
///   [`RemoteError::NotFound`].
/// - Every successful write returns a `modified` strictly later than any
///   earlier write to the same store.
/// - `list_changes` returns [`RemoteError::InvalidToken`] when the cursor
///   expired; callers restart from [`get_start_token`](Self::get_start_token).
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Creates a new blob named `name` under `parent`
    async fn create_blob(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
        bytes: Vec<u8>,
    ) -> RemoteResult<BlobMetadata>;

    /// Replaces the content of an existing blob
    async fn update_blob(&self, id: &RemoteId, bytes: Vec<u8>) -> RemoteResult<BlobMetadata>;

    /// Deletes a blob
    async fn delete_blob(&self, id: &RemoteId) -> RemoteResult<()>;

    /// Fetches metadata for a blob
    async fn get_metadata(&self, id: &RemoteId) -> RemoteResult<BlobMetadata>;

    /// Lists blobs matching `query`
    async fn list_blobs(&self, query: &BlobQuery) -> RemoteResult<Vec<BlobEntry>>;

    /// Downloads the content of a blob
    async fn download_blob(&self, id: &RemoteId) -> RemoteResult<Vec<u8>>;

    /// Returns a cursor positioned at the current end of the change feed
    async fn get_start_token(&self) -> RemoteResult<ChangeToken>;

    /// Returns changes recorded after `token`
    async fn list_changes(&self, token: &ChangeToken) -> RemoteResult<ChangePage>;
}
