//! NoteSync Sync - Synchronization engine
//!
//! Provides:
//! - Local dirty-state tracking with snapshot revisions
//! - A debounced, per-blob ordered operation queue for remote mutations
//! - Change detection with adaptive polling and reconnect backoff
//! - Three-path reconciliation (push, pull, resolve)
//!
//! ## Modules
//!
//! - [`sync_state`] - Dirty tracking and the agreement point with the remote
//! - [`queue`] - Operation queue with debouncing and cancellation
//! - [`executor`] - Executes queued operations against the remote store
//! - [`poller`] - Change-feed poller driving reconciliation
//! - [`orchestrator`] - The reconciliation algorithm
//! - [`engine`] - Facade wiring everything for a host application
//!
//! ## Flow
//!
//! ```text
//! edit ──→ SyncEngine ──→ SyncState (mark dirty)
//!              │
//!              └──→ OperationQueue ──→ RemoteOpExecutor ──→ IRemoteStore
//!                         │ drained
//!                         ▼
//! ChangePoller ──→ SyncOrchestrator (push | pull | resolve)
//! ```

pub mod engine;
pub mod executor;
pub mod merge;
pub mod notifier;
pub mod orchestrator;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod sync_state;

pub use engine::{EngineStatus, SyncEngine};
pub use executor::RemoteOpExecutor;
pub use notifier::BroadcastNotifier;
pub use orchestrator::{SyncOrchestrator, SyncPath, SyncReport, SyncTrigger};
pub use poller::{Backoff, ChangePoller, PollerHandle, PollerState};
pub use queue::{BlobOperation, DedupKey, OpKind, OpOutcome, OpTicket, OperationQueue, QueueError};
pub use registry::BlobRegistry;
pub use retry::RetryPolicy;
pub use sync_state::{SyncSnapshot, SyncState};

use notesync_core::domain::DomainError;
use notesync_core::ports::RemoteError;
use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote store is unreachable or rejected our credentials
    #[error("Remote store unreachable: {0}")]
    Disconnected(RemoteError),

    /// A remote call failed for a reason other than connectivity
    #[error("Remote store error: {0}")]
    Remote(RemoteError),

    /// Reading or writing a local document failed
    #[error("Local store error: {0:#}")]
    Local(#[from] anyhow::Error),

    /// The remote index cannot be parsed and no cached copy exists
    #[error("Remote index is unreadable: {0}")]
    Corrupt(String),

    /// A domain-level error propagated from notesync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The operation queue refused the request
    #[error("Operation queue error: {0}")]
    Queue(#[from] QueueError),

    /// A document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested note does not exist locally
    #[error("Note not found: {0}")]
    NoteNotFound(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        if err.is_connection_loss() {
            SyncError::Disconnected(err)
        } else {
            SyncError::Remote(err)
        }
    }
}

impl SyncError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, SyncError::Disconnected(_))
    }

    /// Short explanation suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Disconnected(RemoteError::Unauthenticated(_)) => {
                "You are signed out of the sync service. Sign in again to resume syncing.".into()
            }
            SyncError::Disconnected(RemoteError::PermissionDenied(_)) => {
                "The sync service denied access to your notes. Check the account permissions."
                    .into()
            }
            SyncError::Disconnected(_) => {
                "Cannot reach the sync service. Changes are kept and will sync when the connection returns."
                    .into()
            }
            SyncError::Remote(_) => {
                "The sync service reported an error. Syncing will be retried.".into()
            }
            SyncError::Local(_) => {
                "Your notes could not be saved on this device. Check available disk space.".into()
            }
            SyncError::Corrupt(_) => {
                "The synced note list is damaged and no local backup exists. Syncing is paused."
                    .into()
            }
            SyncError::Domain(e) => format!("Invalid note data: {e}"),
            SyncError::Queue(_) => "Sync is shutting down.".into(),
            SyncError::Serialization(_) => "A note could not be prepared for syncing.".into(),
            SyncError::NoteNotFound(id) => format!("Note {id} does not exist."),
        }
    }
}
