//! Persistence interfaces used by the listener
//!
//! `EventStateStore` remembers the last sequence and match status pushed
//! downstream for every fixture, keyed by sport. `MarketStateStore` is an
//! opaque object store for the last known market states; the adapter only
//! reads from it.
//!
//! In-memory implementations are provided for tests and single-process
//! deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use types::fixture::MatchStatus;
use types::ids::FixtureId;
use types::market::MarketStateCollection;

/// Last persisted state of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureRecord {
    pub sequence: u64,
    pub match_status: MatchStatus,
}

#[async_trait]
pub trait EventStateStore: Send + Sync {
    async fn current_sequence(&self, sport: &str, fixture_id: &FixtureId) -> Option<u64>;

    async fn update_fixture_state(
        &self,
        sport: &str,
        fixture_id: &FixtureId,
        sequence: u64,
        match_status: MatchStatus,
    );

    async fn remove_fixture(&self, fixture_id: &FixtureId);
}

#[async_trait]
pub trait MarketStateStore: Send + Sync {
    async fn get_object(&self, fixture_id: &FixtureId) -> Option<MarketStateCollection>;
}

/// Process-local event state store.
#[derive(Debug, Default)]
pub struct InMemoryEventStateStore {
    // fixtures are unique across sports; the sport is kept for lookups by sport
    records: DashMap<FixtureId, (String, FixtureRecord)>,
}

impl InMemoryEventStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fixture_id: &FixtureId) -> Option<FixtureRecord> {
        self.records.get(fixture_id).map(|entry| entry.value().1)
    }

    /// Fixture ids persisted for `sport`, sorted.
    pub fn fixtures_for_sport(&self, sport: &str) -> Vec<FixtureId> {
        let mut ids: Vec<FixtureId> = self
            .records
            .iter()
            .filter(|entry| entry.value().0 == sport)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl EventStateStore for InMemoryEventStateStore {
    async fn current_sequence(&self, sport: &str, fixture_id: &FixtureId) -> Option<u64> {
        self.records
            .get(fixture_id)
            .filter(|entry| entry.value().0 == sport)
            .map(|entry| entry.value().1.sequence)
    }

    async fn update_fixture_state(
        &self,
        sport: &str,
        fixture_id: &FixtureId,
        sequence: u64,
        match_status: MatchStatus,
    ) {
        self.records.insert(
            fixture_id.clone(),
            (
                sport.to_string(),
                FixtureRecord {
                    sequence,
                    match_status,
                },
            ),
        );
    }

    async fn remove_fixture(&self, fixture_id: &FixtureId) {
        self.records.remove(fixture_id);
    }
}

/// Process-local market state store.
#[derive(Debug, Default)]
pub struct InMemoryMarketStateStore {
    objects: DashMap<FixtureId, MarketStateCollection>,
}

impl InMemoryMarketStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, fixture_id: FixtureId, collection: MarketStateCollection) {
        self.objects.insert(fixture_id, collection);
    }
}

#[async_trait]
impl MarketStateStore for InMemoryMarketStateStore {
    async fn get_object(&self, fixture_id: &FixtureId) -> Option<MarketStateCollection> {
        self.objects.get(fixture_id).map(|entry| entry.value().clone())
    }
}
