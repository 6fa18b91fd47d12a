//! Shared test doubles for the adapter integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_adapter::config::ListenerConfig;
use feed_adapter::facade::{Connector, ResourceEvent, ResourceFacade};
use feed_adapter::listener::StreamListener;
use feed_adapter::stores::{InMemoryEventStateStore, InMemoryMarketStateStore};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use types::errors::FeedError;
use types::fixture::{FixtureState, MatchStatus};
use types::ids::FixtureId;

pub const SPORT: &str = "Football";

pub fn fixture(id: &str, sequence: u64, epoch: u64, status: MatchStatus) -> FixtureState {
    FixtureState::new(FixtureId::new(id), sequence, epoch, status)
}

/// Scripted resource facade recording every call.
pub struct MockResource {
    id: FixtureId,
    name: String,
    sport: String,
    status: Mutex<MatchStatus>,
    content_sequence: AtomicU64,
    snapshot: Mutex<FixtureState>,
    start_delay: Mutex<Option<Duration>>,
    fail_start: AtomicBool,
    fail_snapshot: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    sender: mpsc::UnboundedSender<ResourceEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ResourceEvent>>>,
}

impl MockResource {
    pub fn new(id: &str, status: MatchStatus, snapshot: FixtureState) -> Arc<Self> {
        Self::with_sport(id, SPORT, status, snapshot)
    }

    pub fn with_sport(id: &str, sport: &str, status: MatchStatus, snapshot: FixtureState) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: FixtureId::new(id),
            name: format!("{id} Home v Away"),
            sport: sport.to_string(),
            status: Mutex::new(status),
            content_sequence: AtomicU64::new(snapshot.sequence),
            snapshot: Mutex::new(snapshot),
            start_delay: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            fail_snapshot: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// In-running fixture whose snapshot is at `sequence`/`epoch`.
    pub fn in_running(id: &str, sequence: u64, epoch: u64) -> Arc<Self> {
        Self::new(id, MatchStatus::InRunning, fixture(id, sequence, epoch, MatchStatus::InRunning))
    }

    pub fn set_status(&self, status: MatchStatus) {
        *self.status.lock() = status;
    }

    pub fn set_snapshot(&self, snapshot: FixtureState) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn set_content_sequence(&self, sequence: u64) {
        self.content_sequence.store(sequence, Ordering::SeqCst);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    /// Push an event into the resource's ordered channel.
    pub fn emit(&self, event: ResourceEvent) {
        let _ = self.sender.send(event);
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFacade for MockResource {
    fn id(&self) -> &FixtureId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sport(&self) -> &str {
        &self.sport
    }

    fn match_status(&self) -> MatchStatus {
        *self.status.lock()
    }

    fn content_sequence(&self) -> u64 {
        self.content_sequence.load(Ordering::SeqCst)
    }

    async fn start_streaming(&self) -> Result<(), FeedError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(FeedError::StreamStart {
                fixture_id: self.id.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn stop_streaming(&self) -> Result<(), FeedError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_snapshot(&self) -> Result<FixtureState, FeedError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(FeedError::Snapshot {
                fixture_id: self.id.to_string(),
                reason: "timeout".to_string(),
            });
        }
        Ok(self.snapshot.lock().clone())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ResourceEvent>> {
        self.receiver.lock().take()
    }
}

/// Connector recording everything pushed downstream.
#[derive(Default)]
pub struct MockConnector {
    pub snapshots: Mutex<Vec<(FixtureState, bool)>>,
    pub stream_updates: Mutex<Vec<(FixtureState, bool)>>,
    pub deletions: Mutex<Vec<FixtureState>>,
    pub suspend_calls: AtomicUsize,
    update_gate: Mutex<Option<Arc<Notify>>>,
    pub update_entered: Notify,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `process_stream_update` block until the returned gate is notified.
    pub fn hold_updates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.update_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn update_count(&self) -> usize {
        self.stream_updates.lock().len()
    }

    pub fn suspends(&self) -> usize {
        self.suspend_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn process_snapshot(&self, fixture: &FixtureState, is_reconnect: bool) {
        self.snapshots.lock().push((fixture.clone(), is_reconnect));
    }

    async fn process_stream_update(&self, fixture: &FixtureState, has_epoch_changed: bool) {
        let gate = self.update_gate.lock().clone();
        if let Some(gate) = gate {
            self.update_entered.notify_one();
            gate.notified().await;
        }
        self.stream_updates.lock().push((fixture.clone(), has_epoch_changed));
    }

    async fn suspend(&self, _fixture_id: &FixtureId) {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_fixture_deletion(&self, fixture: &FixtureState) {
        self.deletions.lock().push(fixture.clone());
    }
}

pub struct Harness {
    pub resource: Arc<MockResource>,
    pub connector: Arc<MockConnector>,
    pub event_state: Arc<InMemoryEventStateStore>,
    pub market_store: Arc<InMemoryMarketStateStore>,
    pub listener: Arc<StreamListener>,
}

pub async fn listener_for(resource: Arc<MockResource>) -> Harness {
    listener_with_config(resource, ListenerConfig::default()).await
}

pub async fn listener_with_config(resource: Arc<MockResource>, config: ListenerConfig) -> Harness {
    let connector = MockConnector::new();
    let event_state = Arc::new(InMemoryEventStateStore::new());
    let market_store = Arc::new(InMemoryMarketStateStore::new());

    let listener = StreamListener::new(
        resource.clone(),
        connector.clone(),
        event_state.clone(),
        market_store.as_ref(),
        config,
    )
    .await
    .expect("listener construction");

    Harness {
        resource,
        connector,
        event_state,
        market_store,
        listener: Arc::new(listener),
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
