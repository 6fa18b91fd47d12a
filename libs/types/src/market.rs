//! Market state pass-through types
//!
//! The adapter does not interpret market state; it loads the collection
//! for a fixture from the object store and hands it to whoever needs it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::FixtureId;

/// Last known state of a single market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub market_id: String,
    pub is_active: bool,
    pub is_suspended: bool,
}

/// All known market states for a fixture
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketStateCollection {
    pub fixture_id: Option<FixtureId>,
    pub markets: BTreeMap<String, MarketState>,
}

impl MarketStateCollection {
    pub fn new(fixture_id: FixtureId) -> Self {
        Self {
            fixture_id: Some(fixture_id),
            markets: BTreeMap::new(),
        }
    }

    pub fn upsert(&mut self, state: MarketState) {
        self.markets.insert(state.market_id.clone(), state);
    }

    pub fn get(&self, market_id: &str) -> Option<&MarketState> {
        self.markets.get(market_id)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}
