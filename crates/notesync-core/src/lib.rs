//! NoteSync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Note`, `NoteMetadata`, `IndexDocument`, `SyncStateDocument`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `ILocalStore`,
//!   `INotificationService`
//! - **Configuration** - Typed YAML configuration with validation
//!
//! # Architecture
//!
//! The domain module holds plain data plus the invariants that can be
//! checked without I/O (content hashing, index placement). Ports define
//! the trait interfaces implemented by the store and remote adapter crates.
//! The synchronization engine in `notesync-sync` drives both through these
//! ports only.

pub mod config;
pub mod domain;
pub mod ports;
