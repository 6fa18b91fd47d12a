//! Collaborator interfaces for the stream listener
//!
//! The listener never touches the network or the downstream platform
//! directly. It drives a [`ResourceFacade`] (one per fixture, owning the
//! transport) and pushes reconciled state into a [`Connector`].
//!
//! Push notifications from the transport arrive on one ordered channel per
//! fixture as [`ResourceEvent`]s. The channel is handed to exactly one
//! listener, which guarantees per-fixture ordering without a shared bus.

use async_trait::async_trait;
use tokio::sync::mpsc;
use types::errors::FeedError;
use types::fixture::{FixtureState, MatchStatus};
use types::ids::FixtureId;

/// Push notification raised by a resource's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// The transport (re)established its connection.
    ///
    /// Not raised for the initial connection made by `start_streaming`,
    /// which reports success through its return value.
    Connected,
    /// A parsed stream update.
    Update(FixtureState),
    /// The transport dropped its connection.
    Disconnected,
}

/// Network-facing handle on a single fixture.
#[async_trait]
pub trait ResourceFacade: Send + Sync {
    fn id(&self) -> &FixtureId;

    fn name(&self) -> &str;

    fn sport(&self) -> &str;

    /// Match status as currently advertised by the feed.
    fn match_status(&self) -> MatchStatus;

    /// Latest sequence the feed reports for this fixture. Used by health
    /// checks to detect a listener that has silently fallen behind.
    fn content_sequence(&self) -> u64;

    /// Open the stream. `Ok` means the connection is established.
    async fn start_streaming(&self) -> Result<(), FeedError>;

    async fn stop_streaming(&self) -> Result<(), FeedError>;

    /// Fetch the full current state of the fixture.
    async fn get_snapshot(&self) -> Result<FixtureState, FeedError>;

    /// Take the ordered event channel. Returns `None` once it has been taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ResourceEvent>>;
}

/// Downstream consumer of reconciled fixture state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// A full snapshot was taken. `is_reconnect` is set for every snapshot
    /// pushed after the first successful connection.
    async fn process_snapshot(&self, fixture: &FixtureState, is_reconnect: bool);

    async fn process_stream_update(&self, fixture: &FixtureState, has_epoch_changed: bool);

    /// Mark all markets of the fixture as suspended.
    async fn suspend(&self, fixture_id: &FixtureId);

    async fn process_fixture_deletion(&self, fixture: &FixtureState);
}
