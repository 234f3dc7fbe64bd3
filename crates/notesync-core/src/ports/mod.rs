//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the engine depends on,
//! but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Remote blob store with a change feed
//! - [`ILocalStore`] - Durable local documents (notes, index, sync state)
//! - [`INotificationService`] - Status and message delivery to the host

pub mod local_store;
pub mod notification;
pub mod remote_store;

pub use local_store::ILocalStore;
pub use notification::{
    INotificationService, Notification, NotificationPriority, NullNotifier, SyncEvent, SyncStatus,
};
pub use remote_store::{
    BlobEntry, BlobMetadata, BlobQuery, ChangePage, IRemoteStore, RemoteChange, RemoteError,
    RemoteResult,
};
