//! Change poller
//!
//! Background loop that asks the remote store whether anything relevant
//! changed and starts reconciliation cycles.
//!
//! ```text
//!            ┌──────────── reconnect backoff ◀──────────┐
//!            ▼                                          │ failure
//! Disconnected ──wait──▶ Connecting ──warm registry──▶ Polling(interval)
//!      ▲                                                │
//!      └──────────────── connection loss ◀──────────────┘
//! ```
//!
//! While polling, the interval grows after checks that find nothing and
//! resets when something relevant shows up or the operation queue is busy.
//! A full reconciliation also runs periodically regardless of the feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use notesync_core::config::Config;
use notesync_core::domain::ChangeToken;
use notesync_core::ports::{
    INotificationService, IRemoteStore, Notification, RemoteChange, RemoteError, SyncEvent,
    SyncStatus,
};

use crate::orchestrator::{SyncOrchestrator, SyncTrigger};
use crate::queue::OperationQueue;
use crate::registry::INDEX_BLOB;
use crate::retry::RetryPolicy;
use crate::SyncError;

const TRIGGER_CAPACITY: usize = 8;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential delay bounded by `max`
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1.0),
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Multiply the delay by the factor, capped at the maximum.
    pub fn grow(&mut self) -> Duration {
        self.current = self.current.mul_f64(self.factor).min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Whether a change-feed entry can affect the synced data set
pub fn is_relevant(change: &RemoteChange) -> bool {
    match change.name.as_deref() {
        None => true,
        Some(name) => {
            name == INDEX_BLOB || (name.starts_with("note-") && name.ends_with(".json"))
        }
    }
}

// ============================================================================
// ChangeFeed
// ============================================================================

/// Change-feed cursor
pub struct ChangeFeed {
    remote: Arc<dyn IRemoteStore>,
    retry: RetryPolicy,
    token: Option<ChangeToken>,
}

impl ChangeFeed {
    pub fn new(remote: Arc<dyn IRemoteStore>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            retry,
            token: None,
        }
    }

    pub fn token(&self) -> Option<&ChangeToken> {
        self.token.as_ref()
    }

    pub fn clear(&mut self) {
        self.token = None;
    }

    /// Report whether relevant changes happened since the last check.
    ///
    /// A missing cursor or a feed error counts as "has changes"; only a
    /// connection loss is returned as an error.
    pub async fn check(&mut self) -> Result<bool, RemoteError> {
        let Some(token) = self.token.clone() else {
            match self
                .retry
                .run("get_start_token", || self.remote.get_start_token())
                .await
            {
                Ok(token) => self.token = Some(token),
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => warn!(error = %e, "Could not obtain a change token"),
            }
            return Ok(true);
        };

        match self
            .retry
            .run("list_changes", || self.remote.list_changes(&token))
            .await
        {
            Ok(page) => {
                let relevant = page.changes.iter().filter(|c| is_relevant(c)).count();
                debug!(
                    changes = page.changes.len(),
                    relevant, "Checked change feed"
                );
                self.token = Some(page.new_token);
                Ok(relevant > 0)
            }
            Err(e) if e.is_connection_loss() => Err(e),
            Err(e) => {
                debug!(error = %e, "Change feed unavailable, clearing token");
                self.token = None;
                Ok(true)
            }
        }
    }
}

// ============================================================================
// ChangePoller
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Disconnected,
    Connecting,
    Polling,
}

/// Requests reconciliation from outside the poller
#[derive(Debug, Clone)]
pub struct PollerHandle {
    tx: mpsc::Sender<SyncTrigger>,
}

impl PollerHandle {
    /// Ask for a cycle as soon as possible. Returns false when a request
    /// is already waiting.
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(_) => {
                debug!(%trigger, "Sync already requested");
                false
            }
        }
    }
}

enum Wake {
    Shutdown,
    Timer,
    Trigger(SyncTrigger),
}

pub struct ChangePoller {
    orchestrator: Arc<SyncOrchestrator>,
    queue: OperationQueue,
    notifier: Arc<dyn INotificationService>,
    feed: ChangeFeed,
    interval: Backoff,
    reconnect: Backoff,
    full_check_every: Duration,
    last_full_check: Instant,
    state: PollerState,
    triggers: mpsc::Receiver<SyncTrigger>,
    /// Keeps the trigger channel open when every handle is dropped
    _trigger_tx: mpsc::Sender<SyncTrigger>,
}

impl ChangePoller {
    pub fn new(
        config: &Config,
        remote: Arc<dyn IRemoteStore>,
        orchestrator: Arc<SyncOrchestrator>,
        queue: OperationQueue,
        notifier: Arc<dyn INotificationService>,
    ) -> (Self, PollerHandle) {
        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        let polling = &config.polling;
        let poller = Self {
            orchestrator,
            queue,
            notifier,
            feed: ChangeFeed::new(remote, RetryPolicy::metadata(&config.retry)),
            interval: Backoff::new(
                polling.base_interval(),
                polling.max_interval(),
                polling.growth_factor,
            ),
            reconnect: Backoff::new(
                polling.reconnect_initial(),
                polling.reconnect_max(),
                polling.reconnect_factor,
            ),
            full_check_every: config.sync.full_sync_interval(),
            last_full_check: Instant::now(),
            state: PollerState::Connecting,
            triggers: rx,
            _trigger_tx: tx.clone(),
        };
        (poller, PollerHandle { tx })
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Change poller started");
        loop {
            match self.state {
                PollerState::Disconnected => {
                    let delay = self.reconnect.current();
                    debug!(delay_secs = delay.as_secs_f64(), "Waiting before reconnecting");
                    match self.wait(&shutdown, delay).await {
                        Wake::Shutdown => break,
                        Wake::Timer | Wake::Trigger(_) => {
                            self.reconnect.grow();
                            self.state = PollerState::Connecting;
                        }
                    }
                }
                PollerState::Connecting => self.connect().await,
                PollerState::Polling => {
                    let delay = self.interval.current();
                    match self.wait(&shutdown, delay).await {
                        Wake::Shutdown => break,
                        Wake::Timer => self.tick().await,
                        Wake::Trigger(trigger) => self.reconcile(trigger).await,
                    }
                }
            }
        }
        info!("Change poller stopped");
    }

    async fn wait(&mut self, shutdown: &CancellationToken, delay: Duration) -> Wake {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Wake::Shutdown,
            Some(trigger) = self.triggers.recv() => Wake::Trigger(trigger),
            _ = tokio::time::sleep(delay) => Wake::Timer,
        }
    }

    async fn connect(&mut self) {
        self.orchestrator.publish_status(SyncStatus::Connecting);
        match self.orchestrator.registry().warm().await {
            Ok(known) => {
                info!(known, "Connected to remote store");
                self.reconnect.reset();
                self.interval.reset();
                self.feed.clear();
                self.state = PollerState::Polling;
                self.reconcile(SyncTrigger::Connect).await;
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.state = PollerState::Disconnected;
                self.orchestrator.publish_status(SyncStatus::Offline);
            }
        }
    }

    async fn tick(&mut self) {
        if self.queue.has_pending_work() {
            debug!("Operation queue busy, skipping change check");
            self.interval.reset();
            return;
        }
        if self.last_full_check.elapsed() >= self.full_check_every {
            self.reconcile(SyncTrigger::FullCheck).await;
            return;
        }
        match self.feed.check().await {
            Ok(true) => {
                self.interval.reset();
                self.reconcile(SyncTrigger::Poll).await;
            }
            Ok(false) => {
                let next = self.interval.grow();
                debug!(next_secs = next.as_secs_f64(), "Nothing relevant changed");
            }
            Err(e) => self.go_offline(SyncError::from(e)),
        }
    }

    async fn reconcile(&mut self, trigger: SyncTrigger) {
        match self.orchestrator.run_cycle(trigger).await {
            Ok(_) => self.last_full_check = Instant::now(),
            Err(e) if e.is_disconnected() => self.go_offline(e),
            Err(_) => {}
        }
    }

    fn go_offline(&mut self, err: SyncError) {
        if self.state == PollerState::Disconnected {
            return;
        }
        warn!(error = %err, "Lost connection to remote store");
        self.state = PollerState::Disconnected;
        self.feed.clear();
        self.reconnect.reset();
        self.orchestrator.publish_status(SyncStatus::Offline);
        self.notifier.publish(SyncEvent::message(Notification::error(
            "Sync paused",
            err.user_message(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use notesync_core::config::ConfigBuilder;
    use notesync_core::domain::RemoteId;
    use notesync_core::ports::NullNotifier;
    use notesync_remote::{Fault, MemoryRemoteStore, RemoteOp};
    use notesync_store::MemoryLocalStore;

    use super::*;
    use crate::queue::BlobOperation;
    use crate::SyncEngine;

    fn quiet_config() -> Config {
        ConfigBuilder::new()
            .debounce_ms(10_000)
            .retry_attempts(1, 1)
            .retry_delays_ms(1, 5)
            .full_sync_interval_secs(3600)
            .build()
    }

    async fn poller_over(remote: &Arc<MemoryRemoteStore>, config: Config) -> (SyncEngine, ChangePoller) {
        let engine = SyncEngine::open(
            config,
            Arc::new(MemoryLocalStore::new()),
            remote.clone(),
            Arc::new(NullNotifier),
        )
        .await
        .unwrap();
        let (poller, _handle) = ChangePoller::new(
            engine.config(),
            remote.clone(),
            engine.orchestrator().clone(),
            engine.queue().clone(),
            Arc::new(NullNotifier),
        );
        (engine, poller)
    }

    #[test]
    fn backoff_grows_caps_and_resets() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(180), 1.5);
        assert_eq!(b.current(), Duration::from_secs(10));
        assert_eq!(b.grow(), Duration::from_secs(15));
        assert_eq!(b.grow(), Duration::from_secs_f64(22.5));
        for _ in 0..20 {
            b.grow();
        }
        assert_eq!(b.current(), Duration::from_secs(180));
        b.reset();
        assert_eq!(b.current(), Duration::from_secs(10));
    }

    #[test]
    fn relevance_rule() {
        let change = |name: Option<&str>| RemoteChange {
            id: RemoteId::new("blob-1".into()).unwrap(),
            name: name.map(str::to_string),
            removed: false,
        };
        assert!(is_relevant(&change(Some("note-list.json"))));
        assert!(is_relevant(&change(Some("note-abc.json"))));
        assert!(is_relevant(&change(None)));
        assert!(!is_relevant(&change(Some("photo.jpg"))));
    }

    #[tokio::test]
    async fn feed_reports_relevant_changes_only() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut feed = ChangeFeed::new(remote.clone(), RetryPolicy::none());

        assert!(feed.check().await.unwrap(), "missing token counts as changes");
        assert!(feed.token().is_some());
        assert!(!feed.check().await.unwrap());

        remote.create_blob("photo.jpg", None, vec![]).await.unwrap();
        assert!(!feed.check().await.unwrap());

        remote.create_blob("note-a.json", None, vec![]).await.unwrap();
        assert!(feed.check().await.unwrap());
        assert!(!feed.check().await.unwrap());
    }

    #[tokio::test]
    async fn feed_error_clears_token() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut feed = ChangeFeed::new(remote.clone(), RetryPolicy::none());
        feed.check().await.unwrap();

        remote.inject(Fault::once(
            RemoteOp::ListChanges,
            RemoteError::InvalidToken("expired".into()),
        ));
        assert!(feed.check().await.unwrap());
        assert!(feed.token().is_none());
    }

    #[tokio::test]
    async fn feed_connection_loss_is_an_error() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut feed = ChangeFeed::new(remote.clone(), RetryPolicy::none());
        remote.set_offline(true);
        assert!(feed.check().await.unwrap_err().is_connection_loss());
    }

    #[tokio::test]
    async fn interval_grows_while_quiet_and_resets_on_changes() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (_engine, mut poller) = poller_over(&remote, quiet_config()).await;

        poller.connect().await;
        assert_eq!(poller.state(), PollerState::Polling);
        let base = poller.interval.current();
        assert_eq!(base, Duration::from_secs(5));

        // First check only obtains a cursor.
        poller.tick().await;
        assert!(poller.feed.token().is_some());
        assert_eq!(poller.interval.current(), base);

        poller.tick().await;
        assert_eq!(poller.interval.current(), Duration::from_secs_f64(7.5));
        poller.tick().await;
        assert_eq!(poller.interval.current(), Duration::from_secs_f64(11.25));

        remote.create_blob("note-x.json", None, vec![]).await.unwrap();
        poller.tick().await;
        assert_eq!(poller.interval.current(), base);
    }

    #[tokio::test]
    async fn busy_queue_skips_the_change_check() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (engine, mut poller) = poller_over(&remote, quiet_config()).await;
        poller.connect().await;
        poller.tick().await;
        poller.tick().await;
        assert!(poller.interval.current() > Duration::from_secs(5));

        engine
            .queue()
            .enqueue(BlobOperation::update("note-y.json", None, None, b"y".to_vec()))
            .await
            .unwrap();
        let checks = remote.calls(RemoteOp::ListChanges);
        poller.tick().await;

        assert_eq!(remote.calls(RemoteOp::ListChanges), checks);
        assert_eq!(poller.interval.current(), Duration::from_secs(5));
        assert_eq!(poller.state(), PollerState::Polling);
    }

    #[tokio::test]
    async fn connection_loss_disconnects_and_reconnect_starts_fresh() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (engine, mut poller) = poller_over(&remote, quiet_config()).await;
        poller.connect().await;
        poller.tick().await;
        poller.tick().await;
        assert!(poller.feed.token().is_some());

        remote.set_offline(true);
        poller.tick().await;
        assert_eq!(poller.state(), PollerState::Disconnected);
        assert!(poller.feed.token().is_none());
        assert_eq!(poller.reconnect.current(), Duration::from_secs(10));
        assert_eq!(engine.orchestrator().settled_status(), SyncStatus::Offline);

        remote.set_offline(false);
        poller.connect().await;
        assert_eq!(poller.state(), PollerState::Polling);
        assert_eq!(poller.interval.current(), Duration::from_secs(5));
        assert!(poller.feed.token().is_none());
        assert_eq!(engine.orchestrator().settled_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn failed_connect_stays_disconnected_without_growing() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (_engine, mut poller) = poller_over(&remote, quiet_config()).await;
        remote.set_offline(true);

        poller.connect().await;
        assert_eq!(poller.state(), PollerState::Disconnected);
        assert_eq!(poller.reconnect.current(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_back_off_up_to_the_cap() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut config = quiet_config();
        config.polling.reconnect_max_secs = 20;
        let (_engine, poller) = poller_over(&remote, config).await;
        remote.set_offline(true);
        remote.reset_calls();

        let shutdown = CancellationToken::new();
        let start = Instant::now();
        let task = tokio::spawn(poller.run(shutdown.clone()));

        // Sample between whole seconds so each attempt lands in its own slot.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut attempts = Vec::new();
        for _ in 0..70 {
            while remote.calls(RemoteOp::List) > attempts.len() {
                attempts.push(start.elapsed().as_secs());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(attempts, vec![0, 10, 25, 45, 65]);
    }
}
