//! Error types for the feed adapter
//!
//! Comprehensive error taxonomy using thiserror. Reconciliation outcomes
//! (`UpdateRejection`) are recovered locally and only used for logging;
//! `FeedError` is what the resource facade surfaces to callers.

use thiserror::Error;

/// Errors raised by the resource facade (network/transport)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Failed to start streaming for fixture {fixture_id}: {reason}")]
    StreamStart { fixture_id: String, reason: String },

    #[error("Failed to stop streaming for fixture {fixture_id}: {reason}")]
    StreamStop { fixture_id: String, reason: String },

    #[error("Snapshot unavailable for fixture {fixture_id}: {reason}")]
    Snapshot { fixture_id: String, reason: String },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

/// Why an incoming update could not be merged as a delta
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejection {
    #[error("Stale update: sequence {received} <= last {last}")]
    StaleUpdate { last: u64, received: u64 },

    #[error("Sequence gap: expected {expected}, got {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error("Epoch mismatch: current {current}, received {received}")]
    EpochMismatch { current: u64, received: u64 },
}

impl UpdateRejection {
    /// Whether the rejection is repaired by fetching a full snapshot.
    pub fn requires_snapshot(&self) -> bool {
        !matches!(self, UpdateRejection::StaleUpdate { .. })
    }
}
