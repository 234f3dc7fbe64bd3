//! NoteSync Remote - Remote blob store adapters
//!
//! This crate provides implementations of the `IRemoteStore` port from
//! `notesync-core`:
//!
//! - [`DirectoryRemoteStore`] - Blobs in a shared directory (for example a
//!   folder mirrored by another sync tool), with an append-only change
//!   journal backing the change feed
//! - [`MemoryRemoteStore`] - In-process store with fault injection and call
//!   counters, used to embed the engine and to test it
//!
//! ## Architecture
//!
//! Both adapters are driven (secondary) adapters in the hexagonal
//! architecture. They assign every blob an opaque id and a strictly
//! increasing modification timestamp, and report failures as typed
//! `RemoteError`s so the engine can classify them.

pub mod directory;
pub mod memory;

pub use directory::DirectoryRemoteStore;
pub use memory::{Fault, MemoryRemoteStore, RemoteOp};

use chrono::{DateTime, Duration, Utc};

/// Next store timestamp: wall clock, bumped past `last` when the clock
/// stalls or runs backwards.
pub(crate) fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + Duration::milliseconds(1),
        _ => now,
    }
}

/// Change-feed token format shared by both adapters: `seq:<n>`.
pub(crate) mod token {
    use notesync_core::domain::ChangeToken;
    use notesync_core::ports::RemoteError;

    pub fn encode(seq: u64) -> Result<ChangeToken, RemoteError> {
        ChangeToken::new(format!("seq:{seq}"))
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    pub fn decode(token: &ChangeToken) -> Result<u64, RemoteError> {
        token
            .as_str()
            .strip_prefix("seq:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| RemoteError::InvalidToken(token.to_string()))
    }
}
