//! Identifier types for feed entities
//!
//! Fixture identifiers are assigned by the upstream feed and are opaque
//! strings. Identifiers minted locally (feed update audit records) use
//! UUID v7 so they sort chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a single sporting event tracked by the feed.
///
/// The feed assigns these (e.g. `y9s1fVzAoko805mzTnnTRU_CQy8`); the adapter
/// never generates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureId(String);

impl FixtureId {
    /// Create a new FixtureId from a feed-assigned string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Try to create a FixtureId, returning None if the id is blank
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FixtureId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FixtureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a feed update seen by a listener
///
/// Uses UUID v7 so audit entries can be ordered by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(Uuid);

impl UpdateId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
