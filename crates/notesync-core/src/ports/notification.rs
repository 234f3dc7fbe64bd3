//! Notification service port (driven/secondary port)
//!
//! This module defines the interface through which the engine reports
//! connection status, "notes changed" reload hints and human-readable
//! messages to the host application.
//!
//! ## Design Notes
//!
//! - `publish` is synchronous and must never block: the engine calls it
//!   while holding its reconciliation lock.
//! - Notifications are fire-and-forget; delivery failures are the
//!   adapter's concern.

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::NoteId;

// ============================================================================
// Notification struct and NotificationPriority enum
// ============================================================================

/// Priority level for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Low priority, may not be shown immediately
    Low,
    /// Normal priority, shown in the notification area
    #[default]
    Normal,
    /// High priority, may trigger a banner or sound
    High,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A message to show to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Title of the notification (short, descriptive)
    pub title: String,
    /// Body text with details about the event
    pub body: String,
    /// Priority level affecting how the notification is displayed
    pub priority: NotificationPriority,
    /// Category for grouping/filtering (e.g., "sync", "conflict", "error")
    pub category: String,
}

impl Notification {
    /// Creates a new notification with the given title and body
    ///
    /// Uses `Normal` priority and an empty category by default.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
            category: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Creates a sync summary notification with Low priority
    pub fn sync(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::Low)
            .with_category("sync")
    }

    /// Creates an error notification with High priority
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("error")
    }

    /// Creates a conflict notification
    pub fn conflict(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body).with_category("conflict")
    }
}

// ============================================================================
// Status and events
// ============================================================================

/// Connection status shown by the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Offline,
    Connecting,
    Syncing,
    Synced,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
        };
        write!(f, "{}", s)
    }
}

/// Event published by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Connection status changed
    Status { status: SyncStatus },
    /// Local notes were rewritten by a sync; the host should reload them
    NotesChanged { note_ids: Vec<NoteId> },
    /// A message for the user
    Message { notification: Notification },
}

impl SyncEvent {
    pub fn status(status: SyncStatus) -> Self {
        SyncEvent::Status { status }
    }

    pub fn message(notification: Notification) -> Self {
        SyncEvent::Message { notification }
    }
}

// ============================================================================
// INotificationService trait
// ============================================================================

/// Port trait for engine-to-host notifications
pub trait INotificationService: Send + Sync {
    /// Publishes an event without waiting for any consumer
    fn publish(&self, event: SyncEvent);
}

/// Notification sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl INotificationService for NullNotifier {
    fn publish(&self, _event: SyncEvent) {}
}
