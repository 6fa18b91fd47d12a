//! Stream listener behaviour against scripted collaborators
//!
//! Covers:
//! - Start/stop and the start gate under concurrency
//! - Sequence/epoch reconciliation end to end
//! - Suspension on abnormal disconnects only
//! - Fixture end and deletion
//! - Health checks, including a check racing an in-flight update

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixture, listener_for, listener_with_config, wait_until, MockResource, SPORT};
use feed_adapter::config::ListenerConfig;
use feed_adapter::facade::ResourceEvent;
use feed_adapter::listener::{ListenerError, StreamListener, StreamingState};
use feed_adapter::stores::{EventStateStore, InMemoryEventStateStore, InMemoryMarketStateStore};
use types::fixture::{EpochChangeReason, MatchStatus};
use types::ids::FixtureId;
use types::market::{MarketState, MarketStateCollection};

#[tokio::test]
async fn test_start_and_stop() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    assert_eq!(h.listener.state(), StreamingState::Ready);

    h.listener.start().await.unwrap();
    assert!(h.listener.is_streaming());
    assert_eq!(h.resource.starts(), 1);
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.listener.position().await, (1, 1));
    assert!(h.listener.last_snapshot_at().await.is_some());

    let snapshots = h.connector.snapshots.lock().clone();
    assert_eq!(snapshots.len(), 1);
    assert!(!snapshots[0].1, "first snapshot is not a reconnect");

    h.listener.stop().await.unwrap();
    assert_eq!(h.listener.state(), StreamingState::Ready);
    assert_eq!(h.resource.stops(), 1);
    assert!(!h.listener.is_fixture_ended());
}

#[tokio::test]
async fn test_construction_reads_stores() {
    let resource = MockResource::in_running("ABC", 1, 1);
    let connector = common::MockConnector::new();
    let event_state = Arc::new(InMemoryEventStateStore::new());
    event_state
        .update_fixture_state(SPORT, &FixtureId::new("ABC"), 42, MatchStatus::InRunning)
        .await;

    let market_store = InMemoryMarketStateStore::new();
    let mut markets = MarketStateCollection::new(FixtureId::new("ABC"));
    markets.upsert(MarketState {
        market_id: "1x2".to_string(),
        is_active: true,
        is_suspended: false,
    });
    market_store.put(FixtureId::new("ABC"), markets.clone());

    let listener = StreamListener::new(
        resource.clone(),
        connector,
        event_state,
        &market_store,
        ListenerConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(listener.position().await, (42, 0));
    assert_eq!(listener.market_states(), Some(&markets));
    // construction performs no network I/O
    assert_eq!(resource.starts(), 0);
    assert_eq!(resource.snapshots(), 0);
}

#[tokio::test]
async fn test_empty_fixture_id_rejected() {
    let resource = MockResource::in_running("  ", 1, 1);
    let result = StreamListener::new(
        resource,
        common::MockConnector::new(),
        Arc::new(InMemoryEventStateStore::new()),
        &InMemoryMarketStateStore::new(),
        ListenerConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(ListenerError::EmptyFixtureId)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_open_stream_once() {
    let resource = MockResource::in_running("ABC", 1, 1);
    resource.set_start_delay(Duration::from_millis(20));
    let h = listener_for(resource).await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let listener = Arc::clone(&h.listener);
        handles.push(tokio::spawn(async move { listener.start().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.resource.starts(), 1);
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.connector.snapshot_count(), 1);
    assert!(h.listener.is_streaming());
}

#[tokio::test]
async fn test_stale_update_ignored() {
    let h = listener_for(MockResource::in_running("ABC", 5, 1)).await;
    h.listener.start().await.unwrap();

    h.listener
        .on_stream_event(fixture("ABC", 5, 1, MatchStatus::InRunning))
        .await;
    h.listener
        .on_stream_event(fixture("ABC", 3, 1, MatchStatus::InRunning))
        .await;

    assert_eq!(h.connector.update_count(), 0);
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.listener.position().await, (5, 1));
}

#[tokio::test]
async fn test_contiguous_update_pushed_without_snapshot() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.listener
        .on_stream_event(fixture("ABC", 2, 1, MatchStatus::InRunning))
        .await;

    let updates = h.connector.stream_updates.lock().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0.sequence, 2);
    assert!(!updates[0].1);
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.connector.suspends(), 0);

    assert_eq!(
        h.event_state.current_sequence(SPORT, &FixtureId::new("ABC")).await,
        Some(2)
    );
    assert_eq!(h.listener.position().await, (2, 1));
}

#[tokio::test]
async fn test_update_is_merged_on_current_state() {
    let resource = MockResource::in_running("ABC", 1, 1);
    let mut snapshot = fixture("ABC", 1, 1, MatchStatus::InRunning);
    snapshot.name = "Home v Away".to_string();
    resource.set_snapshot(snapshot);
    let h = listener_for(resource).await;
    h.listener.start().await.unwrap();

    // delta without name or status
    h.listener
        .on_stream_event(fixture("ABC", 2, 1, MatchStatus::Undefined))
        .await;

    let updates = h.connector.stream_updates.lock().clone();
    assert_eq!(updates[0].0.name, "Home v Away");
    assert_eq!(updates[0].0.match_status, MatchStatus::InRunning);
}

#[tokio::test]
async fn test_match_status_epoch_change_takes_snapshot() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.resource
        .set_snapshot(fixture("ABC", 2, 2, MatchStatus::Paused));
    h.listener
        .on_stream_event(
            fixture("ABC", 2, 2, MatchStatus::Paused).with_reasons([EpochChangeReason::MatchStatus]),
        )
        .await;

    assert_eq!(h.connector.update_count(), 0);
    assert_eq!(h.connector.snapshot_count(), 2);
    assert_eq!(h.resource.snapshots(), 2);
    assert_eq!(h.listener.position().await, (2, 2));
    assert!(h.listener.is_streaming(), "stream stays open during resync");
    assert_eq!(h.connector.suspends(), 0);
}

#[tokio::test]
async fn test_start_time_only_epoch_change_applies() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.listener
        .on_stream_event(
            fixture("ABC", 2, 2, MatchStatus::InRunning).with_reasons([EpochChangeReason::StartTime]),
        )
        .await;

    let updates = h.connector.stream_updates.lock().clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].1, "epoch change is reported downstream");
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.listener.position().await, (2, 2));
}

#[tokio::test]
async fn test_sequence_gap_takes_snapshot() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.resource
        .set_snapshot(fixture("ABC", 3, 1, MatchStatus::InRunning));
    h.listener
        .on_stream_event(fixture("ABC", 3, 1, MatchStatus::InRunning))
        .await;

    assert_eq!(h.connector.update_count(), 0);
    assert_eq!(h.resource.snapshots(), 2);
    assert_eq!(h.connector.suspends(), 0);
    assert_eq!(h.listener.position().await, (3, 1));

    // resync snapshots are not reconnects
    let snapshots = h.connector.snapshots.lock().clone();
    assert!(!snapshots[1].1);
}

#[tokio::test]
async fn test_suspend_before_resync_when_configured() {
    let config = ListenerConfig {
        suspend_before_resync: true,
    };
    let h = listener_with_config(MockResource::in_running("ABC", 1, 1), config).await;
    h.listener.start().await.unwrap();

    h.listener
        .on_stream_event(fixture("ABC", 3, 1, MatchStatus::InRunning))
        .await;

    assert_eq!(h.connector.suspends(), 1);
    assert_eq!(h.resource.snapshots(), 2);
}

#[tokio::test]
async fn test_abnormal_disconnect_suspends_once() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.listener.on_stream_disconnected().await;
    assert_eq!(h.listener.state(), StreamingState::Suspended);
    assert_eq!(h.connector.suspends(), 1);

    h.listener.on_stream_disconnected().await;
    assert_eq!(h.connector.suspends(), 1);

    let overview = h.listener.overview();
    assert!(overview.is_suspended);
    assert!(!overview.is_streaming);
}

#[tokio::test]
async fn test_disconnect_after_stop_does_not_suspend() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();
    h.listener.stop().await.unwrap();

    h.listener.on_stream_disconnected().await;
    assert_eq!(h.connector.suspends(), 0);
}

#[tokio::test]
async fn test_fixture_end_stops_without_suspend() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.listener
        .on_stream_event(
            fixture("ABC", 2, 2, MatchStatus::MatchOver).with_reasons([EpochChangeReason::MatchStatus]),
        )
        .await;

    assert!(h.listener.is_fixture_ended());
    assert!(!h.listener.is_streaming());
    assert_eq!(h.resource.stops(), 1);
    assert_eq!(h.connector.update_count(), 0);
    assert_eq!(h.resource.snapshots(), 1);

    // the transport drops as a consequence of the stop
    h.listener.on_stream_disconnected().await;
    assert_eq!(h.connector.suspends(), 0);
    assert!(!h.listener.check_stream_health(Duration::from_secs(1), 1).await);

    // ended listeners never restart
    h.listener.start().await.unwrap();
    assert_eq!(h.resource.starts(), 1);
    assert!(h.listener.overview().is_over);
}

#[tokio::test]
async fn test_deleted_fixture_ends_listener() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();
    assert_eq!(
        h.event_state.current_sequence(SPORT, &FixtureId::new("ABC")).await,
        Some(1)
    );

    h.listener
        .on_stream_event(
            fixture("ABC", 2, 3, MatchStatus::MatchOver).with_reasons([EpochChangeReason::Deleted]),
        )
        .await;

    assert!(h.listener.is_fixture_ended());
    assert_eq!(h.connector.deletions.lock().len(), 1);
    assert_eq!(h.connector.update_count(), 0);
    assert_eq!(h.connector.snapshot_count(), 1);
    assert!(h.listener.overview().is_deleted);
    assert_eq!(
        h.event_state.current_sequence(SPORT, &FixtureId::new("ABC")).await,
        None
    );
}

#[tokio::test]
async fn test_ended_snapshot_ends_listener() {
    let resource = MockResource::new(
        "ABC",
        MatchStatus::InRunning,
        fixture("ABC", 9, 4, MatchStatus::MatchOver),
    );
    let h = listener_for(resource).await;
    h.listener.start().await.unwrap();

    assert_eq!(h.connector.snapshot_count(), 1);
    assert!(h.listener.is_fixture_ended());
    assert_eq!(h.resource.stops(), 1);
}

#[tokio::test]
async fn test_setup_fixture_does_not_stream() {
    let resource = MockResource::new("ABC", MatchStatus::Setup, fixture("ABC", 1, 1, MatchStatus::Setup));
    let h = listener_for(resource).await;

    h.listener.start().await.unwrap();
    assert!(!h.listener.is_streaming());
    assert!(h.listener.is_fixture_setup());
    assert_eq!(h.resource.starts(), 0);
}

#[tokio::test]
async fn test_update_resource_state_starts_streaming() {
    let resource = MockResource::new("ABC", MatchStatus::Setup, fixture("ABC", 1, 1, MatchStatus::Setup));
    let h = listener_for(resource).await;
    h.listener.start().await.unwrap();
    assert!(!h.listener.is_streaming());

    h.resource.set_status(MatchStatus::InRunning);
    h.resource
        .set_snapshot(fixture("ABC", 1, 1, MatchStatus::InRunning));
    h.listener
        .update_resource_state(h.resource.as_ref())
        .await
        .unwrap();

    assert!(h.listener.is_streaming());
    assert!(!h.listener.is_fixture_setup());
    assert_eq!(h.resource.starts(), 1);

    // a second refresh while streaming does nothing
    h.listener
        .update_resource_state(h.resource.as_ref())
        .await
        .unwrap();
    assert_eq!(h.resource.starts(), 1);
}

#[tokio::test]
async fn test_reconnect_resyncs_with_reconnect_flag() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.listener.on_stream_disconnected().await;
    h.resource
        .set_snapshot(fixture("ABC", 4, 1, MatchStatus::InRunning));
    h.listener.on_stream_connected().await;

    assert!(h.listener.is_streaming());
    assert_eq!(h.resource.snapshots(), 2);
    let flags: Vec<bool> = h
        .connector
        .snapshots
        .lock()
        .iter()
        .map(|(_, is_reconnect)| *is_reconnect)
        .collect();
    assert_eq!(flags, vec![false, true]);
    assert_eq!(h.listener.position().await, (4, 1));
}

#[tokio::test]
async fn test_start_failure_leaves_listener_ready() {
    let resource = MockResource::in_running("ABC", 1, 1);
    resource.fail_start(true);
    let h = listener_for(resource).await;

    let err = h.listener.start().await.unwrap_err();
    assert!(matches!(err, ListenerError::Feed(_)));
    assert_eq!(h.listener.state(), StreamingState::Ready);
    assert!(h.listener.overview().is_errored);

    // no internal retry; the caller retries
    h.resource.fail_start(false);
    h.listener.start().await.unwrap();
    assert!(h.listener.is_streaming());
    assert_eq!(h.resource.starts(), 2);
    assert!(!h.listener.overview().is_errored);
}

#[tokio::test]
async fn test_snapshot_failure_on_start_closes_stream() {
    let resource = MockResource::in_running("ABC", 1, 1);
    resource.fail_snapshot(true);
    let h = listener_for(resource).await;

    assert!(h.listener.start().await.is_err());
    assert_eq!(h.listener.state(), StreamingState::Ready);
    assert_eq!(h.resource.stops(), 1);
    assert_eq!(h.connector.snapshot_count(), 0);
}

#[tokio::test]
async fn test_failed_resync_keeps_streaming() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    h.resource.fail_snapshot(true);
    h.listener
        .on_stream_event(fixture("ABC", 5, 1, MatchStatus::InRunning))
        .await;

    assert!(h.listener.is_streaming());
    assert_eq!(h.listener.position().await, (1, 1));
    assert!(h.listener.overview().is_errored);
}

#[tokio::test(start_paused = true)]
async fn test_health_check() {
    let h = listener_for(MockResource::in_running("ABC", 5, 1)).await;
    let max_delay = Duration::from_secs(30);

    // not streaming
    assert!(!h.listener.check_stream_health(max_delay, 5).await);

    h.listener.start().await.unwrap();
    // caught up
    assert!(h.listener.check_stream_health(max_delay, 5).await);
    // behind, but a message arrived recently
    assert!(h.listener.check_stream_health(max_delay, 9).await);
    assert_eq!(h.resource.snapshots(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    h.resource
        .set_snapshot(fixture("ABC", 9, 1, MatchStatus::InRunning));
    assert!(!h.listener.check_stream_health(max_delay, 9).await);
    assert_eq!(h.resource.snapshots(), 2);
    assert_eq!(h.listener.position().await, (9, 1));

    // resynchronised: healthy again
    assert!(h.listener.check_stream_health(max_delay, 9).await);
}

#[tokio::test]
async fn test_health_check_during_update_does_not_snapshot() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.start().await.unwrap();

    let gate = h.connector.hold_updates();
    let update = {
        let listener = Arc::clone(&h.listener);
        tokio::spawn(async move {
            listener
                .on_stream_event(fixture("ABC", 2, 1, MatchStatus::InRunning))
                .await
        })
    };
    h.connector.update_entered.notified().await;

    assert!(h.listener.check_stream_health(Duration::ZERO, 100).await);
    assert_eq!(h.resource.snapshots(), 1);

    gate.notify_one();
    update.await.unwrap();

    assert_eq!(h.connector.update_count(), 1);
    assert_eq!(h.resource.snapshots(), 1);
    assert_eq!(h.listener.position().await, (2, 1));
}

#[tokio::test]
async fn test_events_pumped_in_order() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    assert!(h.listener.spawn_event_pump());
    assert!(!h.listener.spawn_event_pump(), "channel can only be taken once");

    h.listener.start().await.unwrap();
    for seq in 2..=5 {
        h.resource
            .emit(ResourceEvent::Update(fixture("ABC", seq, 1, MatchStatus::InRunning)));
    }
    h.resource.emit(ResourceEvent::Disconnected);

    let connector = Arc::clone(&h.connector);
    assert!(wait_until(|| connector.suspends() == 1).await);

    let sequences: Vec<u64> = h
        .connector
        .stream_updates
        .lock()
        .iter()
        .map(|(f, _)| f.sequence)
        .collect();
    assert_eq!(sequences, vec![2, 3, 4, 5]);
    assert_eq!(h.resource.snapshots(), 1);

    h.listener.dispose();
}

#[tokio::test]
async fn test_overview_delta_tracks_changes() {
    let h = listener_for(MockResource::in_running("ABC", 1, 1)).await;
    h.listener.take_overview_delta();

    h.listener.start().await.unwrap();
    let delta = h.listener.take_overview_delta().expect("delta after start");
    assert_eq!(delta.is_streaming, Some(true));
    assert_eq!(delta.epoch, Some(1));
    assert!(delta.feed_update.is_some());

    assert!(h.listener.take_overview_delta().is_none());

    let overview = h.listener.overview();
    assert_eq!(overview.feed_updates.len(), 1);
    assert!(overview.feed_updates[0].is_snapshot);
    assert!(overview.feed_updates[0].is_processed);
}
