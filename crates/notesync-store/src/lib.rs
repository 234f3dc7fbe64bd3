//! NoteSync Store - Local document persistence
//!
//! JSON-file storage for:
//! - Note documents (`notes/<id>.json`)
//! - The index document (`index.json`)
//! - The sync-state document (`sync-state.json`)
//! - The cached last known-good remote index (`cache/remote-index.json`)
//!
//! ## Architecture
//!
//! This crate implements the `ILocalStore` port from `notesync-core`. It is
//! a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`JsonFileStore`] - Durable store rooted at a data directory
//! - [`MemoryLocalStore`] - Volatile store for embedding and tests
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use notesync_core::ports::ILocalStore;
//! use notesync_store::JsonFileStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = JsonFileStore::open("/home/user/.local/share/notesync").await?;
//! let index = store.load_index().await?.unwrap_or_default();
//! # Ok(())
//! # }
//! ```

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryLocalStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored document exists but cannot be parsed
    #[error("Corrupt document {path}: {message}")]
    Corrupt { path: String, message: String },

    /// Serialization of a domain type failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}
