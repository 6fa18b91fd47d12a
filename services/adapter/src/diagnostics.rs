//! Per-fixture diagnostics model
//!
//! Every listener keeps a `FixtureOverview`: the current view of its fixture
//! plus short audits of recent errors and feed updates. Field changes are
//! also collected into a `FixtureOverviewDelta`, created on the first change
//! after the previous `take_delta()`, so observers can poll for what changed
//! since they last looked.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use types::fixture::MatchStatus;
use types::ids::{FixtureId, UpdateId};

/// Number of entries retained in each audit.
pub const AUDIT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorOverview {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedUpdateOverview {
    pub id: UpdateId,
    pub sequence: u64,
    pub epoch: u64,
    pub is_snapshot: bool,
    pub is_processed: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields of a `FixtureOverview` that changed since the last `take_delta()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureOverviewDelta {
    pub id: FixtureId,
    pub name: Option<String>,
    pub sequence: Option<u64>,
    pub epoch: Option<u64>,
    pub match_status: Option<MatchStatus>,
    pub is_streaming: Option<bool>,
    pub is_suspended: Option<bool>,
    pub is_over: Option<bool>,
    pub is_deleted: Option<bool>,
    pub is_errored: Option<bool>,
    pub last_error: Option<ErrorOverview>,
    pub feed_update: Option<FeedUpdateOverview>,
}

impl FixtureOverviewDelta {
    fn new(id: FixtureId) -> Self {
        Self {
            id,
            name: None,
            sequence: None,
            epoch: None,
            match_status: None,
            is_streaming: None,
            is_suspended: None,
            is_over: None,
            is_deleted: None,
            is_errored: None,
            last_error: None,
            feed_update: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixtureOverview {
    pub id: FixtureId,
    pub name: String,
    pub sport: String,
    pub sequence: u64,
    pub epoch: u64,
    pub match_status: MatchStatus,
    pub is_streaming: bool,
    pub is_suspended: bool,
    pub is_over: bool,
    pub is_deleted: bool,
    pub is_errored: bool,
    pub last_error: Option<ErrorOverview>,
    pub error_audit: VecDeque<ErrorOverview>,
    pub feed_updates: VecDeque<FeedUpdateOverview>,
    #[serde(skip)]
    delta: Option<FixtureOverviewDelta>,
}

fn changed<V: PartialEq>(slot: &mut V, value: V) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn push_capped<T>(audit: &mut VecDeque<T>, entry: T) {
    if audit.len() >= AUDIT_CAPACITY {
        audit.pop_front();
    }
    audit.push_back(entry);
}

impl FixtureOverview {
    pub fn new(id: FixtureId, name: impl Into<String>, sport: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sport: sport.into(),
            sequence: 0,
            epoch: 0,
            match_status: MatchStatus::Undefined,
            is_streaming: false,
            is_suspended: false,
            is_over: false,
            is_deleted: false,
            is_errored: false,
            last_error: None,
            error_audit: VecDeque::with_capacity(AUDIT_CAPACITY),
            feed_updates: VecDeque::with_capacity(AUDIT_CAPACITY),
            delta: None,
        }
    }

    fn delta_mut(&mut self) -> &mut FixtureOverviewDelta {
        let id = &self.id;
        self.delta
            .get_or_insert_with(|| FixtureOverviewDelta::new(id.clone()))
    }

    pub fn has_delta(&self) -> bool {
        self.delta.is_some()
    }

    /// Return the accumulated delta and start a fresh one on the next change.
    pub fn take_delta(&mut self) -> Option<FixtureOverviewDelta> {
        self.delta.take()
    }

    pub fn set_name(&mut self, name: &str) {
        if self.name != name {
            self.name = name.to_string();
            self.delta_mut().name = Some(name.to_string());
        }
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        if changed(&mut self.sequence, sequence) {
            self.delta_mut().sequence = Some(sequence);
        }
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        if changed(&mut self.epoch, epoch) {
            self.delta_mut().epoch = Some(epoch);
        }
    }

    pub fn set_match_status(&mut self, status: MatchStatus) {
        if changed(&mut self.match_status, status) {
            self.delta_mut().match_status = Some(status);
        }
    }

    pub fn set_streaming(&mut self, value: bool) {
        if changed(&mut self.is_streaming, value) {
            self.delta_mut().is_streaming = Some(value);
        }
    }

    pub fn set_suspended(&mut self, value: bool) {
        if changed(&mut self.is_suspended, value) {
            self.delta_mut().is_suspended = Some(value);
        }
    }

    pub fn set_over(&mut self, value: bool) {
        if changed(&mut self.is_over, value) {
            self.delta_mut().is_over = Some(value);
        }
    }

    pub fn set_deleted(&mut self, value: bool) {
        if changed(&mut self.is_deleted, value) {
            self.delta_mut().is_deleted = Some(value);
        }
    }

    /// Record a new error and mark the fixture as errored.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let error = ErrorOverview {
            message: message.into(),
            occurred_at: Utc::now(),
            resolved_at: None,
        };
        push_capped(&mut self.error_audit, error.clone());
        self.last_error = Some(error.clone());
        self.is_errored = true;

        let delta = self.delta_mut();
        delta.is_errored = Some(true);
        delta.last_error = Some(error);
    }

    /// Mark the last error as resolved. No-op when not errored.
    pub fn clear_error(&mut self) {
        if !self.is_errored {
            return;
        }
        self.is_errored = false;

        let now = Utc::now();
        if let Some(last) = self.last_error.as_mut() {
            last.resolved_at = Some(now);
        }
        if let Some(audited) = self.error_audit.back_mut() {
            audited.resolved_at = Some(now);
        }

        let resolved = self.last_error.clone();
        let delta = self.delta_mut();
        delta.is_errored = Some(false);
        delta.last_error = resolved;
    }

    /// Audit an incoming update or snapshot; returns its audit id.
    pub fn record_feed_update(&mut self, sequence: u64, epoch: u64, is_snapshot: bool) -> UpdateId {
        let update = FeedUpdateOverview {
            id: UpdateId::new(),
            sequence,
            epoch,
            is_snapshot,
            is_processed: false,
            received_at: Utc::now(),
            processed_at: None,
        };
        let id = update.id;
        push_capped(&mut self.feed_updates, update.clone());
        self.delta_mut().feed_update = Some(update);
        id
    }

    /// Mark an audited update as processed. Unknown ids (already evicted) are ignored.
    pub fn mark_processed(&mut self, id: UpdateId) {
        let Some(update) = self.feed_updates.iter_mut().find(|u| u.id == id) else {
            return;
        };
        update.is_processed = true;
        update.processed_at = Some(Utc::now());

        let update = update.clone();
        self.delta_mut().feed_update = Some(update);
    }
}
