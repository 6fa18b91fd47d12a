//! Sequence/epoch reconciliation rules
//!
//! Decides, for a single incoming update, whether it can be merged as a
//! delta on top of the listener's current view, must be dropped, or forces
//! a full snapshot. The rules are:
//! - sequence not ahead of the last applied one: stale, drop
//! - epoch changed for a structural reason: snapshot
//! - sequence exactly one ahead: apply
//! - anything else is a gap: snapshot
//!
//! An epoch bump whose only reason is a start-time change is not
//! structural and falls through to the sequence checks.

use types::errors::UpdateRejection;
use types::fixture::FixtureState;

/// Outcome of reconciling one update against the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateDecision {
    /// Merge the update as a delta.
    Apply,
    /// Drop the update; it is stale or duplicated.
    Ignore,
    /// Continuity is lost; resynchronise from a full snapshot.
    FetchSnapshot,
}

/// Decide how to handle `update` given the last applied sequence and epoch.
///
/// Pure and deterministic.
pub fn decide(last_sequence: u64, last_epoch: u64, update: &FixtureState) -> UpdateDecision {
    match classify(last_sequence, last_epoch, update) {
        None => UpdateDecision::Apply,
        Some(UpdateRejection::StaleUpdate { .. }) => UpdateDecision::Ignore,
        Some(_) => UpdateDecision::FetchSnapshot,
    }
}

/// The reason an update cannot be applied as a delta, if any.
pub fn classify(
    last_sequence: u64,
    last_epoch: u64,
    update: &FixtureState,
) -> Option<UpdateRejection> {
    if update.sequence <= last_sequence {
        return Some(UpdateRejection::StaleUpdate {
            last: last_sequence,
            received: update.sequence,
        });
    }

    if update.epoch != last_epoch && !update.is_start_time_change_only() {
        return Some(UpdateRejection::EpochMismatch {
            current: last_epoch,
            received: update.epoch,
        });
    }

    let expected = last_sequence.saturating_add(1);
    if update.sequence != expected {
        return Some(UpdateRejection::SequenceGap {
            expected,
            received: update.sequence,
        });
    }

    None
}
