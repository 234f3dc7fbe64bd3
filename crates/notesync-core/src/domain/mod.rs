//! Domain entities and business logic
//!
//! This module contains the core domain types for NoteSync:
//! - Newtypes for validated identifiers and content hashes
//! - Notes and their index metadata
//! - The index document (note list, folders, display order)
//! - The persisted sync-state document
//! - Domain-specific error types

pub mod errors;
pub mod index;
pub mod newtypes;
pub mod note;
pub mod sync_state;

// Re-export commonly used types
pub use errors::DomainError;
pub use index::{Folder, IndexDocument, TopLevelItem, INDEX_VERSION};
pub use newtypes::*;
pub use note::{Note, NoteMetadata};
pub use sync_state::SyncStateDocument;
