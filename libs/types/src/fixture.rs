//! Fixture state types
//!
//! A `FixtureState` is the parsed value object behind both full snapshots
//! and incremental stream updates. The feed stamps every message with a
//! `sequence` (strictly increasing per fixture) and an `epoch` (bumped only
//! on structural changes, with the reasons listed alongside).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::FixtureId;

/// Match status as reported by the feed
///
/// Codes match the upstream wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Code 0: status not provided
    Undefined,
    /// Code 10: fixture being set up by traders, not streamable
    Setup,
    /// Code 20: ready for trading
    Ready,
    /// Code 30: pre-match markets open
    PreMatch,
    /// Code 40: match in progress
    InRunning,
    /// Code 45: match over, result not yet confirmed
    MatchOverUnConfirmed,
    /// Code 50: match over (terminal)
    MatchOver,
    /// Code 60: match paused
    Paused,
    /// Code 70: match abandoned (terminal)
    Abandoned,
}

impl MatchStatus {
    /// Wire code for this status
    pub fn code(&self) -> i32 {
        match self {
            MatchStatus::Undefined => 0,
            MatchStatus::Setup => 10,
            MatchStatus::Ready => 20,
            MatchStatus::PreMatch => 30,
            MatchStatus::InRunning => 40,
            MatchStatus::MatchOverUnConfirmed => 45,
            MatchStatus::MatchOver => 50,
            MatchStatus::Paused => 60,
            MatchStatus::Abandoned => 70,
        }
    }

    /// Parse a wire code; unknown codes map to `Undefined`
    pub fn from_code(code: i32) -> Self {
        match code {
            10 => MatchStatus::Setup,
            20 => MatchStatus::Ready,
            30 => MatchStatus::PreMatch,
            40 => MatchStatus::InRunning,
            45 => MatchStatus::MatchOverUnConfirmed,
            50 => MatchStatus::MatchOver,
            60 => MatchStatus::Paused,
            70 => MatchStatus::Abandoned,
            _ => MatchStatus::Undefined,
        }
    }

    /// Whether a stream may be opened for a fixture in this status.
    ///
    /// Only fixtures still in trader setup are held back.
    pub fn allows_streaming(&self) -> bool {
        !matches!(self, MatchStatus::Setup)
    }

    /// Check if status is terminal (the match is finished)
    pub fn is_ended(&self) -> bool {
        matches!(self, MatchStatus::MatchOver | MatchStatus::Abandoned)
    }
}

impl Default for MatchStatus {
    fn default() -> Self {
        MatchStatus::Undefined
    }
}

/// Reason accompanying an epoch bump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochChangeReason {
    Created,
    StartTime,
    Participants,
    MatchStatus,
    Definition,
    Deleted,
}

/// Full or partial fixture state carried by a snapshot or stream update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureState {
    pub id: FixtureId,
    #[serde(default)]
    pub name: String,
    pub sequence: u64,
    pub epoch: u64,
    #[serde(default)]
    pub match_status: MatchStatus,
    /// Reasons for the most recent epoch change
    #[serde(default)]
    pub epoch_change_reasons: BTreeSet<EpochChangeReason>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_ended: bool,
    /// Free-form feed tags (competition, venue, ...)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl FixtureState {
    /// Create a minimal fixture state.
    pub fn new(id: FixtureId, sequence: u64, epoch: u64, match_status: MatchStatus) -> Self {
        Self {
            id,
            name: String::new(),
            sequence,
            epoch,
            match_status,
            epoch_change_reasons: BTreeSet::new(),
            start_time: None,
            is_deleted: false,
            is_ended: false,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach epoch change reasons.
    pub fn with_reasons(mut self, reasons: impl IntoIterator<Item = EpochChangeReason>) -> Self {
        self.epoch_change_reasons = reasons.into_iter().collect();
        self
    }

    pub fn has_reason(&self, reason: EpochChangeReason) -> bool {
        self.epoch_change_reasons.contains(&reason)
    }

    /// True when the only epoch change reason is a start-time change.
    pub fn is_start_time_change_only(&self) -> bool {
        self.epoch_change_reasons.len() == 1 && self.has_reason(EpochChangeReason::StartTime)
    }

    /// Whether the fixture has been deleted upstream.
    pub fn is_deletion(&self) -> bool {
        self.is_deleted || self.has_reason(EpochChangeReason::Deleted)
    }

    pub fn is_match_over(&self) -> bool {
        self.is_ended || self.match_status.is_ended()
    }

    /// Produce the state that results from applying `delta` on top of `self`.
    ///
    /// The result is a new value; identity and name are kept when the delta
    /// omits them, tags are overlaid key by key.
    pub fn merge_delta(&self, delta: &FixtureState) -> FixtureState {
        let mut tags = self.tags.clone();
        tags.extend(delta.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        FixtureState {
            id: self.id.clone(),
            name: if delta.name.is_empty() {
                self.name.clone()
            } else {
                delta.name.clone()
            },
            sequence: delta.sequence,
            epoch: delta.epoch,
            match_status: if delta.match_status == MatchStatus::Undefined {
                self.match_status
            } else {
                delta.match_status
            },
            epoch_change_reasons: delta.epoch_change_reasons.clone(),
            start_time: delta.start_time.or(self.start_time),
            is_deleted: delta.is_deleted,
            is_ended: delta.is_ended || self.is_ended,
            tags,
        }
    }
}
