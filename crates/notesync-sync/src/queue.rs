//! Operation queue for remote mutations
//!
//! Serializes and batches create/update/delete calls per blob.
//!
//! ## Rules
//!
//! - `Create` and `Delete` are dispatched immediately.
//! - `Update` waits for the debounce window; a newer update for the same
//!   blob supersedes the waiting one and restarts the window.
//! - `Delete` cancels every not-yet-running operation for the blob. When
//!   it cancels a create that never ran, it completes without a remote call.
//! - Operations for the same blob run strictly in order; different blobs
//!   run concurrently up to the configured parallelism.
//! - At most `capacity` operations are admitted at once. `enqueue` waits
//!   for a slot while the queue is full; superseded work frees its slot.
//!
//! ## Architecture
//!
//! ```text
//! enqueue ──→ entries (Debouncing) ──timer──┐
//!    │                                      ▼
//!    └──────→ entries (Ready) ──→ bounded channel ──→ dispatcher
//!                                                        │ per-blob lanes
//!                                                        ▼
//!                                       workers (semaphore) ──→ OperationExecutor
//! ```
//!
//! Every enqueue returns an [`OpTicket`] that always resolves, either with
//! the execution result or with [`OpOutcome::Superseded`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use notesync_core::config::QueueConfig;
use notesync_core::domain::{ContentHash, RemoteId};
use notesync_core::ports::{BlobMetadata, RemoteError, RemoteResult};

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// Identity used to deduplicate operations
///
/// The name form is used while the remote id is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Name {
        name: String,
        parent: Option<RemoteId>,
    },
    Remote(RemoteId),
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Name {
                name,
                parent: Some(parent),
            } => write!(f, "{parent}/{name}"),
            DedupKey::Name { name, parent: None } => write!(f, "{name}"),
            DedupKey::Remote(id) => write!(f, "#{id}"),
        }
    }
}

/// Execution lane: every operation on one blob shares a lane.
type Lane = (Option<RemoteId>, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobOperation {
    pub kind: OpKind,
    pub name: String,
    pub parent: Option<RemoteId>,
    pub remote_id: Option<RemoteId>,
    pub bytes: Vec<u8>,
    /// Hash of the note carried by `bytes`, recorded after an upload
    pub content_hash: Option<ContentHash>,
}

impl BlobOperation {
    pub fn create(name: impl Into<String>, parent: Option<RemoteId>, bytes: Vec<u8>) -> Self {
        Self {
            kind: OpKind::Create,
            name: name.into(),
            parent,
            remote_id: None,
            bytes,
            content_hash: None,
        }
    }

    pub fn update(
        name: impl Into<String>,
        parent: Option<RemoteId>,
        remote_id: Option<RemoteId>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            kind: OpKind::Update,
            remote_id,
            ..Self::create(name, parent, bytes)
        }
    }

    pub fn delete(
        name: impl Into<String>,
        parent: Option<RemoteId>,
        remote_id: Option<RemoteId>,
    ) -> Self {
        Self {
            kind: OpKind::Delete,
            remote_id,
            ..Self::create(name, parent, Vec::new())
        }
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    pub fn key(&self) -> DedupKey {
        match &self.remote_id {
            Some(id) => DedupKey::Remote(id.clone()),
            None => DedupKey::Name {
                name: self.name.clone(),
                parent: self.parent.clone(),
            },
        }
    }

    fn lane(&self) -> Lane {
        (self.parent.clone(), self.name.clone())
    }
}

/// Final result of a queued operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    Completed(BlobMetadata),
    Deleted,
    /// Cancelled by a later operation or by shutdown
    Superseded,
    Failed(RemoteError),
}

impl OpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Completed(_) | OpOutcome::Deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Operation queue is closed")]
    Closed,
}

/// Awaitable handle for one enqueued operation
#[derive(Debug)]
pub struct OpTicket {
    key: DedupKey,
    rx: oneshot::Receiver<OpOutcome>,
}

impl OpTicket {
    fn resolved(key: DedupKey, outcome: OpOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { key, rx }
    }

    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    pub async fn outcome(self) -> OpOutcome {
        self.rx.await.unwrap_or(OpOutcome::Superseded)
    }
}

/// Performs a queued operation
#[async_trait::async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Returns the blob metadata for writes and `None` for deletes.
    async fn execute(&self, op: &BlobOperation) -> RemoteResult<Option<BlobMetadata>>;
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Debouncing,
    Ready,
    Running,
}

struct Entry {
    op: Arc<BlobOperation>,
    key: DedupKey,
    lane: Lane,
    status: Status,
    reply: Option<oneshot::Sender<OpOutcome>>,
    timer: Option<CancellationToken>,
    /// Admission slot, returned when the entry is resolved
    _slot: OwnedSemaphorePermit,
}

impl Entry {
    fn same_target(&self, key: &DedupKey, lane: &Lane) -> bool {
        &self.key == key || &self.lane == lane
    }
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<u64, Entry>,
    next_id: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    pending: watch::Sender<usize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(
        &self,
        state: &mut QueueState,
        op: BlobOperation,
        status: Status,
        timer: Option<CancellationToken>,
        slot: OwnedSemaphorePermit,
    ) -> (u64, OpTicket) {
        let id = state.next_id;
        state.next_id += 1;
        let key = op.key();
        let lane = op.lane();
        let (tx, rx) = oneshot::channel();
        state.entries.insert(
            id,
            Entry {
                op: Arc::new(op),
                key: key.clone(),
                lane,
                status,
                reply: Some(tx),
                timer,
                _slot: slot,
            },
        );
        self.pending.send_modify(|n| *n += 1);
        (id, OpTicket { key, rx })
    }

    /// Remove an entry and deliver its outcome.
    fn resolve(&self, state: &mut QueueState, id: u64, outcome: OpOutcome) {
        let Some(mut entry) = state.entries.remove(&id) else {
            return;
        };
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(outcome);
        }
    }

    /// Supersede waiting updates that target the same blob as `op`.
    fn supersede_waiting(&self, state: &mut QueueState, op: &BlobOperation) {
        let key = op.key();
        let lane = op.lane();
        let waiting: Vec<u64> = state
            .entries
            .iter()
            .filter(|(_, e)| {
                e.status == Status::Debouncing
                    && e.op.kind == OpKind::Update
                    && e.same_target(&key, &lane)
            })
            .map(|(id, _)| *id)
            .collect();
        for old in waiting {
            debug!(key = %key, "Update superseded by a newer edit");
            self.resolve(state, old, OpOutcome::Superseded);
        }
    }

    /// Cancel every not-yet-running operation on the same blob as `op`.
    ///
    /// Returns `(running, cancelled_create)`.
    fn cancel_targets(&self, state: &mut QueueState, op: &BlobOperation) -> (bool, bool) {
        let key = op.key();
        let lane = op.lane();
        let targets: Vec<(u64, Status, OpKind)> = state
            .entries
            .iter()
            .filter(|(_, e)| e.same_target(&key, &lane))
            .map(|(id, e)| (*id, e.status, e.op.kind))
            .collect();

        let mut running = false;
        let mut cancelled_create = false;
        for (old, status, kind) in targets {
            if status == Status::Running {
                running = true;
                continue;
            }
            cancelled_create |= kind == OpKind::Create;
            self.resolve(state, old, OpOutcome::Superseded);
        }
        (running, cancelled_create)
    }

    /// Move a debouncing entry to `Ready` once its window has elapsed.
    ///
    /// Returns false when the entry is gone or the queue has closed, in
    /// which case nothing may be sent to the dispatcher.
    fn promote(&self, id: u64) -> bool {
        let mut state = self.lock();
        let waiting = state
            .entries
            .get(&id)
            .is_some_and(|e| e.status == Status::Debouncing);
        if !waiting {
            return false;
        }
        if state.closed {
            self.resolve(&mut state, id, OpOutcome::Superseded);
            return false;
        }
        match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.status = Status::Ready;
                entry.timer = None;
                true
            }
            None => false,
        }
    }

    fn ready_lane(&self, id: u64) -> Option<Lane> {
        self.lock()
            .entries
            .get(&id)
            .filter(|e| e.status == Status::Ready)
            .map(|e| e.lane.clone())
    }

    fn is_ready(&self, id: u64) -> bool {
        self.ready_lane(id).is_some()
    }
}

// ============================================================================
// OperationQueue
// ============================================================================

struct Inner {
    shared: Arc<Shared>,
    /// One permit per admitted operation
    slots: Arc<Semaphore>,
    ready_tx: mpsc::Sender<u64>,
    shutdown: CancellationToken,
    debounce: Duration,
}

/// Cloneable handle to the operation queue
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("pending", &self.pending_count())
            .field("debounce", &self.inner.debounce)
            .finish()
    }
}

impl OperationQueue {
    /// Create the queue and spawn its dispatcher on the current runtime.
    pub fn new(executor: Arc<dyn OperationExecutor>, config: &QueueConfig) -> Self {
        Self::with_settings(
            executor,
            config.capacity,
            config.parallelism,
            config.debounce(),
        )
    }

    pub fn with_settings(
        executor: Arc<dyn OperationExecutor>,
        capacity: usize,
        parallelism: usize,
        debounce: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        let (ready_tx, ready_rx) = mpsc::channel(capacity);
        let (pending, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            pending,
        });
        tokio::spawn(dispatch(
            Arc::clone(&shared),
            ready_rx,
            executor,
            parallelism.max(1),
        ));
        Self {
            inner: Arc::new(Inner {
                shared,
                slots: Arc::new(Semaphore::new(capacity)),
                ready_tx,
                shutdown: CancellationToken::new(),
                debounce,
            }),
        }
    }

    /// Admit an operation, waiting while the queue is at capacity.
    pub async fn enqueue(&self, op: BlobOperation) -> Result<OpTicket, QueueError> {
        match op.kind {
            OpKind::Create => self.enqueue_ready(op).await,
            OpKind::Update => self.enqueue_debounced(op).await,
            OpKind::Delete => self.enqueue_delete(op).await,
        }
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Closed)
    }

    async fn enqueue_ready(&self, op: BlobOperation) -> Result<OpTicket, QueueError> {
        let slot = self.admit().await?;
        let shared = &self.inner.shared;
        let (id, ticket) = {
            let mut state = shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            shared.register(&mut state, op, Status::Ready, None, slot)
        };
        self.send_ready(id).await;
        Ok(ticket)
    }

    async fn enqueue_debounced(&self, op: BlobOperation) -> Result<OpTicket, QueueError> {
        let shared = &self.inner.shared;
        {
            let mut state = shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            shared.supersede_waiting(&mut state, &op);
        }

        let slot = self.admit().await?;
        let timer = self.inner.shutdown.child_token();
        let (id, ticket) = {
            let mut state = shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            shared.supersede_waiting(&mut state, &op);
            shared.register(&mut state, op, Status::Debouncing, Some(timer.clone()), slot)
        };

        let shared = Arc::clone(&self.inner.shared);
        let ready_tx = self.inner.ready_tx.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }
            if shared.promote(id) && ready_tx.send(id).await.is_err() {
                shared.resolve(&mut shared.lock(), id, OpOutcome::Superseded);
            }
        });
        Ok(ticket)
    }

    async fn enqueue_delete(&self, op: BlobOperation) -> Result<OpTicket, QueueError> {
        let shared = &self.inner.shared;
        {
            let mut state = shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let (running, cancelled_create) = shared.cancel_targets(&mut state, &op);
            if cancelled_create && !running {
                let key = op.key();
                debug!(key = %key, "Delete collapsed a create that never ran");
                return Ok(OpTicket::resolved(key, OpOutcome::Deleted));
            }
        }

        let slot = self.admit().await?;
        let (id, ticket) = {
            let mut state = shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            shared.cancel_targets(&mut state, &op);
            shared.register(&mut state, op, Status::Ready, None, slot)
        };
        self.send_ready(id).await;
        Ok(ticket)
    }

    async fn send_ready(&self, id: u64) {
        if self.inner.ready_tx.send(id).await.is_err() {
            let shared = &self.inner.shared;
            shared.resolve(&mut shared.lock(), id, OpOutcome::Superseded);
        }
    }

    /// Dispatch every debouncing update now.
    pub async fn flush(&self) {
        let ids: Vec<u64> = {
            let mut state = self.inner.shared.lock();
            state
                .entries
                .iter_mut()
                .filter(|(_, e)| e.status == Status::Debouncing)
                .map(|(id, e)| {
                    if let Some(timer) = e.timer.take() {
                        timer.cancel();
                    }
                    e.status = Status::Ready;
                    *id
                })
                .collect()
        };
        for id in ids {
            self.send_ready(id).await;
        }
    }

    /// Stop accepting work, drop waiting updates and drain the rest.
    pub async fn shutdown(&self) {
        {
            let shared = &self.inner.shared;
            let mut state = shared.lock();
            if !state.closed {
                state.closed = true;
                let waiting: Vec<u64> = state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.status == Status::Debouncing)
                    .map(|(id, _)| *id)
                    .collect();
                if !waiting.is_empty() {
                    debug!(count = waiting.len(), "Dropping debounced updates at shutdown");
                }
                for id in waiting {
                    shared.resolve(&mut state, id, OpOutcome::Superseded);
                }
            }
        }
        self.inner.slots.close();
        self.inner.shutdown.cancel();
        self.wait_idle().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().closed
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn pending_count(&self) -> usize {
        *self.inner.shared.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.inner.shared.pending.subscribe()
    }

    /// Wait until every enqueued operation has executed or been cancelled.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe_pending();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

async fn dispatch(
    shared: Arc<Shared>,
    mut ready_rx: mpsc::Receiver<u64>,
    executor: Arc<dyn OperationExecutor>,
    parallelism: usize,
) {
    let permits = Arc::new(Semaphore::new(parallelism));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Lane>();
    let mut busy: HashSet<Lane> = HashSet::new();
    let mut backlog: HashMap<Lane, VecDeque<u64>> = HashMap::new();
    let mut open = true;

    let spawn = |id: u64, lane: Lane| {
        tokio::spawn(run_operation(
            Arc::clone(&shared),
            Arc::clone(&executor),
            Arc::clone(&permits),
            done_tx.clone(),
            id,
            lane,
        ));
    };

    loop {
        tokio::select! {
            received = ready_rx.recv(), if open => match received {
                Some(id) => {
                    let Some(lane) = shared.ready_lane(id) else {
                        continue;
                    };
                    if busy.contains(&lane) {
                        backlog.entry(lane).or_default().push_back(id);
                    } else {
                        busy.insert(lane.clone());
                        spawn(id, lane);
                    }
                }
                None => open = false,
            },
            Some(lane) = done_rx.recv() => {
                let next = backlog.get_mut(&lane).and_then(|queue| {
                    std::iter::from_fn(|| queue.pop_front()).find(|id| shared.is_ready(*id))
                });
                match next {
                    Some(id) => spawn(id, lane),
                    None => {
                        backlog.remove(&lane);
                        busy.remove(&lane);
                    }
                }
            }
        }
        if !open && busy.is_empty() {
            break;
        }
    }
    debug!("Operation queue dispatcher stopped");
}

async fn run_operation(
    shared: Arc<Shared>,
    executor: Arc<dyn OperationExecutor>,
    permits: Arc<Semaphore>,
    done_tx: mpsc::UnboundedSender<Lane>,
    id: u64,
    lane: Lane,
) {
    let _permit = permits.acquire_owned().await.ok();

    let op = {
        let mut state = shared.lock();
        match state.entries.get_mut(&id) {
            Some(entry) if entry.status == Status::Ready => {
                entry.status = Status::Running;
                Some(Arc::clone(&entry.op))
            }
            _ => None,
        }
    };

    if let Some(op) = op {
        debug!(name = %op.name, kind = ?op.kind, "Executing queued operation");
        let outcome = match executor.execute(&op).await {
            Ok(Some(meta)) => OpOutcome::Completed(meta),
            Ok(None) => OpOutcome::Deleted,
            Err(e) => {
                warn!(name = %op.name, kind = ?op.kind, error = %e, "Queued operation failed");
                OpOutcome::Failed(e)
            }
        };
        shared.resolve(&mut shared.lock(), id, outcome);
    }

    let _ = done_tx.send(lane);
}
