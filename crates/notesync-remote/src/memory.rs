//! In-memory remote store
//!
//! Holds every blob in process memory and records a change feed. Besides
//! serving as an embeddable backend, it is the engine's test double:
//!
//! - **Call counters** per [`RemoteOp`], to assert how many remote calls a
//!   scenario made.
//! - **Fault injection** through [`Fault`], optionally restricted to one
//!   operation kind and one blob name, for a fixed number of calls.
//! - **Offline switch**, making every call fail with a network error.
//! - **Pause points**, parking a call until the test releases it, to
//!   interleave local edits with an in-flight reconciliation.
//! - **Clock floor**, pushing store timestamps forward to model clock skew
//!   between devices.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;

use notesync_core::domain::{ChangeToken, RemoteId};
use notesync_core::ports::{
    BlobEntry, BlobMetadata, BlobQuery, ChangePage, IRemoteStore, RemoteChange, RemoteError,
    RemoteResult,
};

use crate::{next_timestamp, token};

/// Kinds of remote calls, for counters and fault filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    GetMetadata,
    List,
    Download,
    StartToken,
    ListChanges,
}

impl RemoteOp {
    /// Operations that modify the store
    pub fn is_mutation(self) -> bool {
        matches!(self, RemoteOp::Create | RemoteOp::Update | RemoteOp::Delete)
    }
}

/// An injected failure
#[derive(Debug, Clone)]
pub struct Fault {
    /// Only calls of this kind fail; `None` matches every kind
    pub op: Option<RemoteOp>,
    /// Only calls touching this blob name fail; `None` matches every blob
    pub name: Option<String>,
    pub error: RemoteError,
    /// Number of matching calls that fail; `None` fails forever
    pub remaining: Option<usize>,
}

impl Fault {
    /// Fail the next call of `op`
    pub fn once(op: RemoteOp, error: RemoteError) -> Self {
        Self {
            op: Some(op),
            name: None,
            error,
            remaining: Some(1),
        }
    }

    /// Restrict the fault to a blob name
    pub fn on_blob(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fail `times` matching calls instead of one
    pub fn times(mut self, times: usize) -> Self {
        self.remaining = Some(times);
        self
    }

    /// Fail every matching call
    pub fn always(mut self) -> Self {
        self.remaining = None;
        self
    }

    fn matches(&self, op: RemoteOp, name: Option<&str>) -> bool {
        self.op.map_or(true, |o| o == op)
            && self
                .name
                .as_deref()
                .map_or(true, |wanted| name == Some(wanted))
    }
}

/// Handle for a parked call
#[derive(Debug, Clone)]
pub struct PausePoint {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl PausePoint {
    /// Wait until a matching call is parked
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked call continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct Pause {
    op: RemoteOp,
    name: Option<String>,
    point: PausePoint,
}

#[derive(Debug, Clone)]
struct Blob {
    name: String,
    parent: Option<RemoteId>,
    bytes: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    blobs: HashMap<RemoteId, Blob>,
    changes: Vec<(u64, RemoteChange)>,
    seq: u64,
    last_modified: Option<DateTime<Utc>>,
    clock_floor: Option<DateTime<Utc>>,
    calls: BTreeMap<RemoteOp, usize>,
    faults: Vec<Fault>,
    pauses: Vec<Pause>,
}

impl State {
    fn stamp(&mut self) -> DateTime<Utc> {
        let mut ts = next_timestamp(self.last_modified);
        if let Some(floor) = self.clock_floor {
            if ts < floor {
                ts = floor;
                self.clock_floor = None;
            }
        }
        self.last_modified = Some(ts);
        ts
    }

    fn record(&mut self, id: &RemoteId, name: &str, removed: bool) {
        self.seq += 1;
        self.changes.push((
            self.seq,
            RemoteChange {
                id: id.clone(),
                name: Some(name.to_string()),
                removed,
            },
        ));
    }

    fn take_fault(&mut self, op: RemoteOp, name: Option<&str>) -> Option<RemoteError> {
        let pos = self.faults.iter().position(|f| f.matches(op, name))?;
        let fault = &mut self.faults[pos];
        let error = fault.error.clone();
        match fault.remaining.as_mut() {
            Some(n) if *n <= 1 => {
                self.faults.remove(pos);
            }
            Some(n) => *n -= 1,
            None => {}
        }
        Some(error)
    }

    fn take_pause(&mut self, op: RemoteOp, name: Option<&str>) -> Option<PausePoint> {
        let pos = self
            .pauses
            .iter()
            .position(|p| p.op == op && p.name.as_deref().map_or(true, |n| name == Some(n)))?;
        Some(self.pauses.remove(pos).point)
    }
}

/// Remote store held in process memory
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryRemoteStore")
            .field("blobs", &state.blobs.len())
            .field("seq", &state.seq)
            .finish()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// Make every call fail with a network error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Park the next `op` call (optionally on blob `name`) until released.
    pub fn pause_before(&self, op: RemoteOp, name: Option<&str>) -> PausePoint {
        let point = PausePoint {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        self.lock().pauses.push(Pause {
            op,
            name: name.map(str::to_string),
            point: point.clone(),
        });
        point
    }

    /// Ensure the next write is stamped no earlier than `floor`.
    pub fn set_clock_floor(&self, floor: DateTime<Utc>) {
        self.lock().clock_floor = Some(floor);
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total number of create, update and delete calls
    pub fn mutation_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Content of the blob named `name`, if any
    pub fn blob_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .values()
            .find(|b| b.name == name)
            .map(|b| b.bytes.clone())
    }

    /// Sorted names of every stored blob
    pub fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().blobs.values().map(|b| b.name.clone()).collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Call plumbing
    // ------------------------------------------------------------------

    /// Count the call, honor pause points, then apply offline mode and faults.
    async fn enter(&self, op: RemoteOp, name: Option<&str>) -> RemoteResult<()> {
        let pause = {
            let mut state = self.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.take_pause(op, name)
        };
        if let Some(point) = pause {
            point.reached.notify_one();
            point.release.notified().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote store is offline".into()));
        }
        match self.lock().take_fault(op, name) {
            Some(error) => {
                debug!(?op, ?name, %error, "injected remote fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn name_of(&self, id: &RemoteId) -> Option<String> {
        self.lock().blobs.get(id).map(|b| b.name.clone())
    }

    fn allocate_id(&self) -> RemoteResult<RemoteId> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        RemoteId::new(format!("blob-{n}")).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl IRemoteStore for MemoryRemoteStore {
    async fn create_blob(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
        bytes: Vec<u8>,
    ) -> RemoteResult<BlobMetadata> {
        self.enter(RemoteOp::Create, Some(name)).await?;
        let id = self.allocate_id()?;
        let mut state = self.lock();
        let modified = state.stamp();
        state.blobs.insert(
            id.clone(),
            Blob {
                name: name.to_string(),
                parent: parent.cloned(),
                bytes,
                modified,
            },
        );
        state.record(&id, name, false);
        Ok(BlobMetadata {
            id,
            name: name.to_string(),
            modified,
        })
    }

    async fn update_blob(&self, id: &RemoteId, bytes: Vec<u8>) -> RemoteResult<BlobMetadata> {
        let name = self.name_of(id);
        self.enter(RemoteOp::Update, name.as_deref()).await?;
        let mut state = self.lock();
        if !state.blobs.contains_key(id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        let modified = state.stamp();
        let blob = state
            .blobs
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        blob.bytes = bytes;
        blob.modified = modified;
        let name = blob.name.clone();
        state.record(id, &name, false);
        Ok(BlobMetadata {
            id: id.clone(),
            name,
            modified,
        })
    }

    async fn delete_blob(&self, id: &RemoteId) -> RemoteResult<()> {
        let name = self.name_of(id);
        self.enter(RemoteOp::Delete, name.as_deref()).await?;
        let mut state = self.lock();
        let blob = state
            .blobs
            .remove(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        state.record(id, &blob.name, true);
        Ok(())
    }

    async fn get_metadata(&self, id: &RemoteId) -> RemoteResult<BlobMetadata> {
        let name = self.name_of(id);
        self.enter(RemoteOp::GetMetadata, name.as_deref()).await?;
        let state = self.lock();
        let blob = state
            .blobs
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        Ok(BlobMetadata {
            id: id.clone(),
            name: blob.name.clone(),
            modified: blob.modified,
        })
    }

    async fn list_blobs(&self, query: &BlobQuery) -> RemoteResult<Vec<BlobEntry>> {
        self.enter(RemoteOp::List, query.name.as_deref()).await?;
        let state = self.lock();
        let mut entries: Vec<BlobEntry> = state
            .blobs
            .iter()
            .filter(|(_, b)| query.matches(&b.name, b.parent.as_ref()))
            .map(|(id, b)| BlobEntry {
                id: id.clone(),
                name: b.name.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download_blob(&self, id: &RemoteId) -> RemoteResult<Vec<u8>> {
        let name = self.name_of(id);
        self.enter(RemoteOp::Download, name.as_deref()).await?;
        self.lock()
            .blobs
            .get(id)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn get_start_token(&self) -> RemoteResult<ChangeToken> {
        self.enter(RemoteOp::StartToken, None).await?;
        token::encode(self.lock().seq)
    }

    async fn list_changes(&self, since: &ChangeToken) -> RemoteResult<ChangePage> {
        self.enter(RemoteOp::ListChanges, None).await?;
        let after = token::decode(since)?;
        let state = self.lock();
        if after > state.seq {
            return Err(RemoteError::InvalidToken(since.to_string()));
        }
        let changes = state
            .changes
            .iter()
            .filter(|(seq, _)| *seq > after)
            .map(|(_, change)| change.clone())
            .collect();
        Ok(ChangePage {
            changes,
            new_token: token::encode(state.seq)?,
        })
    }
}
