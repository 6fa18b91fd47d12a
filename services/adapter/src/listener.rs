//! Per-fixture stream listener
//!
//! A `StreamListener` owns the streaming session of exactly one fixture. It
//! opens the stream through the fixture's [`ResourceFacade`], reconciles
//! every incoming update against the last applied sequence and epoch, and
//! pushes the result to the [`Connector`]. When continuity is lost it
//! resynchronises from a full snapshot instead.
//!
//! State machine:
//!
//! ```text
//! Initial -> Ready -> (Starting) -> Streaming -> Suspended
//!                 ^                    |   |         |
//!                 +------ stop --------+   |         +--> Streaming (reconnect / restart)
//!                                          +--> Ended (match over or deleted)
//! ```
//!
//! All session mutation happens under one async mutex. That mutex is both
//! the start gate (concurrent `start()` calls open the stream once) and the
//! per-fixture serializer for updates, snapshots and health checks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use types::errors::FeedError;
use types::fixture::{EpochChangeReason, FixtureState, MatchStatus};
use types::ids::FixtureId;
use types::market::MarketStateCollection;

use crate::config::ListenerConfig;
use crate::diagnostics::{FixtureOverview, FixtureOverviewDelta};
use crate::facade::{Connector, ResourceEvent, ResourceFacade};
use crate::stores::{EventStateStore, MarketStateStore};
use crate::validator::{self, UpdateDecision};

/// Errors surfaced by listener operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListenerError {
    #[error("resource has an empty fixture id")]
    EmptyFixtureId,

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamingState {
    Initial = 0,
    Ready = 1,
    /// `start_streaming` is in flight.
    Starting = 2,
    Streaming = 3,
    /// Abnormal disconnect; waiting for a reconnect or restart.
    Suspended = 4,
    /// Match over or fixture deleted. Terminal.
    Ended = 5,
}

impl StreamingState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamingState::Ready,
            2 => StreamingState::Starting,
            3 => StreamingState::Streaming,
            4 => StreamingState::Suspended,
            5 => StreamingState::Ended,
            _ => StreamingState::Initial,
        }
    }
}

struct ListenerSession {
    state: StreamingState,
    current_sequence: u64,
    current_epoch: u64,
    match_status: MatchStatus,
    fixture: Option<FixtureState>,
    last_snapshot_at: Option<DateTime<Utc>>,
    last_message_at: Instant,
    has_connected: bool,
    // set once the listener is unregistered; it never streams again
    closed: bool,
}

pub struct StreamListener {
    fixture_id: FixtureId,
    sport: String,
    resource: Arc<dyn ResourceFacade>,
    connector: Arc<dyn Connector>,
    event_state: Arc<dyn EventStateStore>,
    config: ListenerConfig,
    market_states: Option<MarketStateCollection>,
    session: tokio::sync::Mutex<ListenerSession>,
    // lock-free mirror of session.state
    state: AtomicU8,
    overview: Mutex<FixtureOverview>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl StreamListener {
    /// Build a listener for `resource`.
    ///
    /// Reads the last persisted sequence and the market states of the
    /// fixture. Performs no network I/O; the listener is `Ready` on return.
    pub async fn new(
        resource: Arc<dyn ResourceFacade>,
        connector: Arc<dyn Connector>,
        event_state: Arc<dyn EventStateStore>,
        market_store: &dyn MarketStateStore,
        config: ListenerConfig,
    ) -> Result<Self, ListenerError> {
        let fixture_id = resource.id().clone();
        if fixture_id.is_empty() {
            return Err(ListenerError::EmptyFixtureId);
        }
        let sport = resource.sport().to_string();
        let match_status = resource.match_status();

        let current_sequence = event_state
            .current_sequence(&sport, &fixture_id)
            .await
            .unwrap_or(0);
        let market_states = market_store.get_object(&fixture_id).await;

        let mut overview = FixtureOverview::new(fixture_id.clone(), resource.name(), sport.clone());
        overview.set_sequence(current_sequence);
        overview.set_match_status(match_status);

        info!(
            fixture_id = %fixture_id,
            sport = %sport,
            sequence = current_sequence,
            match_status = ?match_status,
            "stream listener created"
        );

        Ok(Self {
            fixture_id,
            sport,
            resource,
            connector,
            event_state,
            config,
            market_states,
            session: tokio::sync::Mutex::new(ListenerSession {
                state: StreamingState::Ready,
                current_sequence,
                current_epoch: 0,
                match_status,
                fixture: None,
                last_snapshot_at: None,
                last_message_at: Instant::now(),
                has_connected: false,
                closed: false,
            }),
            state: AtomicU8::new(StreamingState::Ready as u8),
            overview: Mutex::new(overview),
            pump: Mutex::new(None),
        })
    }

    pub fn fixture_id(&self) -> &FixtureId {
        &self.fixture_id
    }

    pub fn sport(&self) -> &str {
        &self.sport
    }

    pub fn resource(&self) -> &Arc<dyn ResourceFacade> {
        &self.resource
    }

    pub fn state(&self) -> StreamingState {
        StreamingState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamingState::Streaming
    }

    pub fn is_fixture_ended(&self) -> bool {
        self.state() == StreamingState::Ended
    }

    pub fn is_fixture_setup(&self) -> bool {
        self.overview.lock().match_status == MatchStatus::Setup
    }

    pub fn market_states(&self) -> Option<&MarketStateCollection> {
        self.market_states.as_ref()
    }

    /// Copy of the diagnostics overview.
    pub fn overview(&self) -> FixtureOverview {
        self.overview.lock().clone()
    }

    pub fn take_overview_delta(&self) -> Option<FixtureOverviewDelta> {
        self.overview.lock().take_delta()
    }

    /// Sequence and epoch of the last reconciled state.
    pub async fn position(&self) -> (u64, u64) {
        let session = self.session.lock().await;
        (session.current_sequence, session.current_epoch)
    }

    pub async fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        self.session.lock().await.last_snapshot_at
    }

    fn set_state(&self, session: &mut ListenerSession, state: StreamingState) {
        if session.state != state {
            debug!(
                fixture_id = %self.fixture_id,
                from = ?session.state,
                to = ?state,
                "listener state change"
            );
        }
        session.state = state;
        self.state.store(state as u8, Ordering::Release);

        let mut overview = self.overview.lock();
        overview.set_streaming(state == StreamingState::Streaming);
        overview.set_suspended(state == StreamingState::Suspended);
        if state == StreamingState::Ended {
            overview.set_over(true);
        }
    }

    /// Open the stream and synchronise from a snapshot.
    ///
    /// Concurrent callers are serialized; only the first opens the stream
    /// and the rest return once it is up. Does nothing when already
    /// streaming, ended, or when the fixture is still in setup.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let mut session = self.session.lock().await;
        self.start_locked(&mut session).await
    }

    async fn start_locked(&self, session: &mut ListenerSession) -> Result<(), ListenerError> {
        if session.closed {
            debug!(fixture_id = %self.fixture_id, "listener closed, not starting");
            return Ok(());
        }
        if matches!(
            session.state,
            StreamingState::Streaming | StreamingState::Ended
        ) {
            return Ok(());
        }
        if !session.match_status.allows_streaming() {
            debug!(
                fixture_id = %self.fixture_id,
                match_status = ?session.match_status,
                "fixture not streamable yet"
            );
            return Ok(());
        }

        self.set_state(session, StreamingState::Starting);
        info!(fixture_id = %self.fixture_id, "starting stream");

        if let Err(err) = self.resource.start_streaming().await {
            error!(fixture_id = %self.fixture_id, error = %err, "failed to start stream");
            self.overview.lock().record_error(err.to_string());
            self.set_state(session, StreamingState::Ready);
            return Err(err.into());
        }

        if let Err(err) = self.connect(session).await {
            if let Err(stop_err) = self.resource.stop_streaming().await {
                warn!(fixture_id = %self.fixture_id, error = %stop_err, "failed to close stream after start failure");
            }
            if session.state != StreamingState::Ended {
                self.set_state(session, StreamingState::Ready);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Move to `Streaming` and take the initial snapshot of a connection.
    async fn connect(&self, session: &mut ListenerSession) -> Result<(), ListenerError> {
        let is_reconnect = session.has_connected;
        self.set_state(session, StreamingState::Streaming);
        session.last_message_at = Instant::now();

        self.resync(session, is_reconnect).await?;
        session.has_connected = true;
        self.overview.lock().clear_error();

        info!(
            fixture_id = %self.fixture_id,
            sequence = session.current_sequence,
            epoch = session.current_epoch,
            is_reconnect,
            "stream connected"
        );
        Ok(())
    }

    /// Replace the session view with a fresh snapshot and push it downstream.
    async fn resync(&self, session: &mut ListenerSession, is_reconnect: bool) -> Result<(), ListenerError> {
        let snapshot = match self.resource.get_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(fixture_id = %self.fixture_id, error = %err, "failed to fetch snapshot");
                self.overview.lock().record_error(err.to_string());
                return Err(err.into());
            }
        };

        let audit_id = {
            let mut overview = self.overview.lock();
            overview.record_feed_update(snapshot.sequence, snapshot.epoch, true)
        };

        // sequence and epoch are reset together
        session.current_sequence = snapshot.sequence;
        session.current_epoch = snapshot.epoch;
        if snapshot.match_status != MatchStatus::Undefined {
            session.match_status = snapshot.match_status;
        }
        session.last_snapshot_at = Some(Utc::now());
        session.last_message_at = Instant::now();

        debug!(
            fixture_id = %self.fixture_id,
            sequence = snapshot.sequence,
            epoch = snapshot.epoch,
            is_reconnect,
            "processing snapshot"
        );

        if snapshot.is_deletion() {
            self.process_deletion(session, &snapshot).await;
        } else {
            self.connector.process_snapshot(&snapshot, is_reconnect).await;
            self.event_state
                .update_fixture_state(&self.sport, &self.fixture_id, snapshot.sequence, session.match_status)
                .await;
            if snapshot.is_match_over() {
                self.finish(session).await;
            }
        }

        {
            let mut overview = self.overview.lock();
            overview.set_sequence(session.current_sequence);
            overview.set_epoch(session.current_epoch);
            overview.set_match_status(session.match_status);
            overview.mark_processed(audit_id);
        }
        session.fixture = Some(snapshot);
        Ok(())
    }

    /// Mark the listener as ended and close the stream. Never suspends.
    async fn finish(&self, session: &mut ListenerSession) {
        self.set_state(session, StreamingState::Ended);
        info!(
            fixture_id = %self.fixture_id,
            sequence = session.current_sequence,
            "fixture ended, stopping stream"
        );
        if let Err(err) = self.resource.stop_streaming().await {
            warn!(fixture_id = %self.fixture_id, error = %err, "failed to stop stream of ended fixture");
        }
    }

    async fn process_deletion(&self, session: &mut ListenerSession, fixture: &FixtureState) {
        info!(fixture_id = %self.fixture_id, "fixture deleted upstream");
        self.connector.process_fixture_deletion(fixture).await;
        self.event_state.remove_fixture(&self.fixture_id).await;
        self.overview.lock().set_deleted(true);
        self.finish(session).await;
    }

    /// Whether `update` ends the fixture: a match-over status carried by a
    /// match-status epoch change.
    fn is_match_over_update(session: &ListenerSession, update: &FixtureState) -> bool {
        update.match_status.is_ended()
            && update.epoch != session.current_epoch
            && update.has_reason(EpochChangeReason::MatchStatus)
    }

    /// Reconcile one stream update.
    ///
    /// Errors are logged and recorded in the overview, never returned.
    pub async fn on_stream_event(&self, update: FixtureState) {
        let mut session = self.session.lock().await;
        if session.state != StreamingState::Streaming {
            debug!(
                fixture_id = %self.fixture_id,
                state = ?session.state,
                sequence = update.sequence,
                "dropping update, listener not streaming"
            );
            return;
        }
        session.last_message_at = Instant::now();

        let decision = validator::decide(session.current_sequence, session.current_epoch, &update);
        if decision == UpdateDecision::Ignore {
            debug!(
                fixture_id = %self.fixture_id,
                sequence = update.sequence,
                current_sequence = session.current_sequence,
                "ignoring stale update"
            );
            return;
        }

        let audit_id = self
            .overview
            .lock()
            .record_feed_update(update.sequence, update.epoch, false);

        if update.is_deletion() {
            session.current_sequence = update.sequence;
            session.current_epoch = update.epoch;
            self.process_deletion(&mut session, &update).await;
        } else if Self::is_match_over_update(&session, &update) {
            session.current_sequence = update.sequence;
            session.current_epoch = update.epoch;
            session.match_status = update.match_status;
            self.event_state
                .update_fixture_state(&self.sport, &self.fixture_id, update.sequence, update.match_status)
                .await;
            self.finish(&mut session).await;
        } else if decision == UpdateDecision::Apply {
            self.apply_update(&mut session, &update).await;
        } else {
            if let Some(rejection) =
                validator::classify(session.current_sequence, session.current_epoch, &update)
            {
                warn!(
                    fixture_id = %self.fixture_id,
                    sequence = update.sequence,
                    epoch = update.epoch,
                    reason = %rejection,
                    "update cannot be applied, resynchronising"
                );
            }
            if self.config.suspend_before_resync {
                self.connector.suspend(&self.fixture_id).await;
            }
            // stream stays open on failure; the health check retries
            let _ = self.resync(&mut session, false).await;
        }

        let mut overview = self.overview.lock();
        overview.set_sequence(session.current_sequence);
        overview.set_epoch(session.current_epoch);
        overview.set_match_status(session.match_status);
        overview.mark_processed(audit_id);
    }

    async fn apply_update(&self, session: &mut ListenerSession, update: &FixtureState) {
        let merged = match &session.fixture {
            Some(current) => current.merge_delta(update),
            None => update.clone(),
        };
        let has_epoch_changed = merged.epoch != session.current_epoch;

        session.current_sequence = merged.sequence;
        session.current_epoch = merged.epoch;
        if merged.match_status != MatchStatus::Undefined {
            session.match_status = merged.match_status;
        }

        debug!(
            fixture_id = %self.fixture_id,
            sequence = merged.sequence,
            epoch = merged.epoch,
            has_epoch_changed,
            "applying stream update"
        );
        self.connector.process_stream_update(&merged, has_epoch_changed).await;
        self.event_state
            .update_fixture_state(&self.sport, &self.fixture_id, merged.sequence, session.match_status)
            .await;

        session.fixture = Some(merged);
    }

    /// The transport (re)connected: resynchronise from a snapshot.
    pub async fn on_stream_connected(&self) {
        let mut session = self.session.lock().await;
        if session.closed || session.state == StreamingState::Ended {
            return;
        }
        if let Err(err) = self.connect(&mut session).await {
            warn!(fixture_id = %self.fixture_id, error = %err, "reconnect snapshot failed");
        }
    }

    /// The transport dropped. Suspends the fixture unless the disconnect is
    /// the expected result of a stop or of the fixture ending.
    pub async fn on_stream_disconnected(&self) {
        let mut session = self.session.lock().await;
        if session.state != StreamingState::Streaming {
            debug!(
                fixture_id = %self.fixture_id,
                state = ?session.state,
                "stream disconnected"
            );
            return;
        }

        warn!(fixture_id = %self.fixture_id, "unexpected stream disconnect, suspending fixture");
        self.set_state(&mut session, StreamingState::Suspended);
        self.connector.suspend(&self.fixture_id).await;
    }

    /// Close the stream. The listener can be started again afterwards.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let mut session = self.session.lock().await;
        self.stop_locked(&mut session).await
    }

    /// Close the stream for good and stop the event pump.
    ///
    /// Runs under the session lock, so a `start()` racing with it either
    /// finishes first and is stopped here, or runs afterwards and does
    /// nothing.
    pub async fn close(&self) -> Result<(), ListenerError> {
        let mut session = self.session.lock().await;
        session.closed = true;
        self.dispose();
        self.stop_locked(&mut session).await
    }

    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.closed
    }

    async fn stop_locked(&self, session: &mut ListenerSession) -> Result<(), ListenerError> {
        if matches!(
            session.state,
            StreamingState::Ended | StreamingState::Ready | StreamingState::Initial
        ) {
            return Ok(());
        }

        info!(fixture_id = %self.fixture_id, "stopping stream");
        self.set_state(session, StreamingState::Ready);
        self.resource.stop_streaming().await.map_err(|err| {
            warn!(fixture_id = %self.fixture_id, error = %err, "failed to stop stream");
            ListenerError::from(err)
        })
    }

    /// Pick up a fresh match status from the feed and start streaming if
    /// the fixture became streamable.
    pub async fn update_resource_state(&self, resource: &dyn ResourceFacade) -> Result<(), ListenerError> {
        let mut session = self.session.lock().await;
        let match_status = resource.match_status();
        if match_status != MatchStatus::Undefined {
            session.match_status = match_status;
        }
        {
            let mut overview = self.overview.lock();
            overview.set_name(resource.name());
            overview.set_match_status(session.match_status);
        }

        if session.closed
            || matches!(
                session.state,
                StreamingState::Streaming | StreamingState::Ended
            )
        {
            return Ok(());
        }
        self.start_locked(&mut session).await
    }

    /// Periodic health check.
    ///
    /// Returns `false` when the listener is not streaming, or when it had
    /// fallen behind `latest_sequence` without receiving anything for longer
    /// than `max_delay` (in which case it is resynchronised). A check that
    /// finds an update in flight reports healthy without touching the
    /// session.
    pub async fn check_stream_health(&self, max_delay: Duration, latest_sequence: u64) -> bool {
        let Ok(mut session) = self.session.try_lock() else {
            debug!(fixture_id = %self.fixture_id, "health check skipped, update in progress");
            return true;
        };

        if session.state != StreamingState::Streaming {
            return false;
        }
        if latest_sequence <= session.current_sequence {
            return true;
        }
        let silent_for = session.last_message_at.elapsed();
        if silent_for <= max_delay {
            return true;
        }

        warn!(
            fixture_id = %self.fixture_id,
            current_sequence = session.current_sequence,
            latest_sequence,
            silent_ms = silent_for.as_millis() as u64,
            "stream is behind, resynchronising"
        );
        let _ = self.resync(&mut session, false).await;
        false
    }

    /// Route one transport event.
    pub async fn handle_event(&self, event: ResourceEvent) {
        match event {
            ResourceEvent::Connected => self.on_stream_connected().await,
            ResourceEvent::Update(update) => self.on_stream_event(update).await,
            ResourceEvent::Disconnected => self.on_stream_disconnected().await,
        }
    }

    /// Take the resource's event channel and feed it to this listener in
    /// order. Returns `false` if the channel was already taken.
    pub fn spawn_event_pump(self: &Arc<Self>) -> bool {
        let Some(events) = self.resource.take_events() else {
            return false;
        };
        let handle = tokio::spawn(Self::pump_events(Arc::downgrade(self), events));
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
        true
    }

    async fn pump_events(listener: Weak<Self>, mut events: mpsc::UnboundedReceiver<ResourceEvent>) {
        while let Some(event) = events.recv().await {
            let Some(listener) = listener.upgrade() else {
                break;
            };
            listener.handle_event(event).await;
        }
    }

    /// Stop the event pump. The stream itself is closed by `stop()`.
    pub fn dispose(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        self.dispose();
    }
}
