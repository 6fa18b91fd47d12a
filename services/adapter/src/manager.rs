//! Registry of active stream listeners
//!
//! Holds at most one listener per fixture. Worker tasks consult the manager
//! concurrently (`has_stream_listener`, `can_be_processed`) while others
//! create or remove listeners, so the map is a `DashMap` and every
//! insert/remove goes through its entry API.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use types::ids::FixtureId;

use crate::config::ListenerConfig;
use crate::diagnostics::FixtureOverview;
use crate::facade::{Connector, ResourceFacade};
use crate::listener::{ListenerError, StreamListener};
use crate::stores::{EventStateStore, MarketStateStore};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle notifications published by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    StreamCreated(FixtureId),
    StreamRemoved(FixtureId),
}

pub struct ListenerManager {
    listeners: DashMap<FixtureId, Arc<StreamListener>>,
    in_flight: DashSet<FixtureId>,
    connector: Arc<dyn Connector>,
    event_state: Arc<dyn EventStateStore>,
    market_store: Arc<dyn MarketStateStore>,
    config: ListenerConfig,
    events: broadcast::Sender<ManagerEvent>,
}

impl ListenerManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        event_state: Arc<dyn EventStateStore>,
        market_store: Arc<dyn MarketStateStore>,
        config: ListenerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: DashMap::new(),
            in_flight: DashSet::new(),
            connector,
            event_state,
            market_store,
            config,
            events,
        }
    }

    /// Subscribe to `StreamCreated`/`StreamRemoved` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ManagerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn has_stream_listener(&self, fixture_id: &FixtureId) -> bool {
        self.listeners.contains_key(fixture_id)
    }

    pub fn get(&self, fixture_id: &FixtureId) -> Option<Arc<StreamListener>> {
        self.listeners.get(fixture_id).map(|entry| Arc::clone(entry.value()))
    }

    /// All registered listeners, in no particular order.
    pub fn listeners(&self) -> Vec<Arc<StreamListener>> {
        self.listeners.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn listeners_count(&self) -> usize {
        self.listeners.len()
    }

    /// Create and register a listener for `resource`, wiring its event
    /// channel. Does not start streaming.
    ///
    /// If another task registered a listener for the same fixture first,
    /// that listener is returned and the new one is discarded.
    pub async fn create_stream_listener(
        &self,
        resource: Arc<dyn ResourceFacade>,
    ) -> Result<Arc<StreamListener>, ListenerError> {
        if let Some(existing) = self.get(resource.id()) {
            return Ok(existing);
        }

        let listener = Arc::new(
            StreamListener::new(
                resource,
                Arc::clone(&self.connector),
                Arc::clone(&self.event_state),
                self.market_store.as_ref(),
                self.config.clone(),
            )
            .await?,
        );
        let fixture_id = listener.fixture_id().clone();

        match self.listeners.entry(fixture_id.clone()) {
            Entry::Occupied(entry) => {
                debug!(fixture_id = %fixture_id, "listener already registered");
                return Ok(Arc::clone(entry.get()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&listener));
            }
        }

        if !listener.spawn_event_pump() {
            warn!(fixture_id = %fixture_id, "resource event channel already taken");
        }
        info!(fixture_id = %fixture_id, sport = listener.sport(), "stream listener registered");
        self.publish(ManagerEvent::StreamCreated(fixture_id));
        Ok(listener)
    }

    /// Stop and unregister the listener of `fixture_id`.
    pub async fn remove_stream_listener(&self, fixture_id: &FixtureId) -> bool {
        let Some((_, listener)) = self.listeners.remove(fixture_id) else {
            return false;
        };

        if let Err(err) = listener.close().await {
            warn!(fixture_id = %fixture_id, error = %err, "error stopping removed listener");
        }

        info!(fixture_id = %fixture_id, "stream listener removed");
        self.publish(ManagerEvent::StreamRemoved(fixture_id.clone()));
        true
    }

    /// Start the listener of `fixture_id`. Returns `false` if none is registered.
    pub async fn start_streaming(&self, fixture_id: &FixtureId) -> Result<bool, ListenerError> {
        match self.get(fixture_id) {
            Some(listener) => listener.start().await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Stop the listener of `fixture_id` without unregistering it.
    pub async fn stop_streaming(&self, fixture_id: &FixtureId) -> Result<bool, ListenerError> {
        match self.get(fixture_id) {
            Some(listener) => listener.stop().await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Stop and unregister every listener.
    pub async fn stop_all(&self) {
        let ids: Vec<FixtureId> = self.listeners.iter().map(|entry| entry.key().clone()).collect();
        info!(count = ids.len(), "stopping all stream listeners");
        for fixture_id in ids {
            self.remove_stream_listener(&fixture_id).await;
        }
    }

    /// Registered listeners grouped by sport, each group sorted by fixture id.
    pub fn listeners_by_sport(&self) -> BTreeMap<String, Vec<Arc<StreamListener>>> {
        let mut grouped: BTreeMap<String, Vec<Arc<StreamListener>>> = BTreeMap::new();
        for entry in self.listeners.iter() {
            grouped
                .entry(entry.value().sport().to_string())
                .or_default()
                .push(Arc::clone(entry.value()));
        }
        for listeners in grouped.values_mut() {
            listeners.sort_by(|a, b| a.fixture_id().cmp(b.fixture_id()));
        }
        grouped
    }

    /// Drop listeners of `sport` whose fixture is no longer offered by the feed.
    ///
    /// Returns the removed fixture ids.
    pub async fn update_currently_available_fixtures(
        &self,
        sport: &str,
        available: &[FixtureId],
    ) -> Vec<FixtureId> {
        let available: HashSet<&FixtureId> = available.iter().collect();
        let gone: Vec<FixtureId> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().sport() == sport && !available.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for fixture_id in &gone {
            debug!(fixture_id = %fixture_id, sport, "fixture no longer in feed");
            self.remove_stream_listener(fixture_id).await;
            self.event_state.remove_fixture(fixture_id).await;
        }
        gone
    }

    /// Whether processing `resource` would do anything: true when no
    /// listener exists yet, or the existing one is neither streaming nor
    /// ended.
    pub fn will_process_resource(&self, resource: &dyn ResourceFacade) -> bool {
        match self.get(resource.id()) {
            None => true,
            Some(listener) => !listener.is_streaming() && !listener.is_fixture_ended(),
        }
    }

    /// Whether a job for `fixture_id` may be scheduled now.
    pub fn can_be_processed(&self, fixture_id: &FixtureId) -> bool {
        if self.in_flight.contains(fixture_id) {
            return false;
        }
        match self.get(fixture_id) {
            Some(listener) => !listener.is_fixture_ended(),
            None => true,
        }
    }

    /// Mark `fixture_id` as being processed. Returns `false` if it already was.
    pub fn begin_processing(&self, fixture_id: &FixtureId) -> bool {
        self.in_flight.insert(fixture_id.clone())
    }

    pub fn finish_processing(&self, fixture_id: &FixtureId) {
        self.in_flight.remove(fixture_id);
    }

    /// Diagnostics view of one fixture.
    pub fn fixture_detail(&self, fixture_id: &FixtureId) -> Option<FixtureOverview> {
        self.get(fixture_id).map(|listener| listener.overview())
    }

    /// Diagnostics views of every registered fixture, sorted by id.
    pub fn fixture_overviews(&self) -> Vec<FixtureOverview> {
        let mut overviews: Vec<FixtureOverview> = self
            .listeners
            .iter()
            .map(|entry| entry.value().overview())
            .collect();
        overviews.sort_by(|a, b| a.id.cmp(&b.id));
        overviews
    }
}
