//! Integration tests for the service registry façade.
//!
//! Everything runs in-process: sources are plain `futures` streams and
//! subscribers are [`InterestStream`]s.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: reconciliation, replay, filtering, lifecycle
//! - `quota_*` - Eviction through the quota keeper

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};

use service_registry::{
    BufferState, ChangeKind, ChangeNotification, ConnectOptions, InstanceInfo, InstanceStatus,
    Interest, InterestStream, Origin, RegistrationEvent, Registry, RegistryConfig, RegistryState,
    Source, SourceError, SourceMatcher, SubscriptionError,
};

// =============================================================================
// Helpers
// =============================================================================

fn registry_with_drop(pct: u8) -> Registry {
    let config = RegistryConfig { eviction_allowed_percentage_drop: pct, ..Default::default() };
    let registry = Registry::new(config);
    registry.start();
    registry
}

fn running() -> Registry {
    registry_with_drop(20)
}

async fn next(stream: &mut InterestStream) -> ChangeNotification {
    tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("stream ended")
}

/// Consume the replay, returning the ids it added.
async fn replay_ids(stream: &mut InterestStream) -> Vec<String> {
    assert_eq!(next(stream).await.buffer_state(), Some(BufferState::BufferStart));
    let mut ids = Vec::new();
    loop {
        let note = next(stream).await;
        if note.buffer_state() == Some(BufferState::BufferEnd) {
            return ids;
        }
        assert_eq!(note.kind(), Some(ChangeKind::Add), "replay only adds: {note}");
        ids.push(note.info().map(|i| i.id.clone()).unwrap_or_default());
    }
}

fn summary(note: &ChangeNotification) -> (ChangeKind, String, InstanceStatus) {
    let info = note.info().expect("data notification");
    (note.kind().expect("data notification"), info.id.clone(), info.status)
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn populate_local(registry: &Registry, count: usize) {
    let local = Source::local("bulk");
    for i in 0..count {
        registry
            .register(&local, InstanceInfo::new(format!("local-{i}"), "app"))
            .await
            .unwrap();
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn happy_local_and_replica_handover() {
    let registry = running();
    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    assert!(replay_ids(&mut stream).await.is_empty());

    let local = Source::local("conn1");
    let peer = Source::replicated("peer1");

    registry
        .register(&local, InstanceInfo::new("x", "app").with_status(InstanceStatus::Up))
        .await
        .unwrap();
    assert_eq!(summary(&next(&mut stream).await), (ChangeKind::Add, "x".into(), InstanceStatus::Up));

    // Non-snapshot write: nothing emitted.
    registry
        .register(&peer, InstanceInfo::new("x", "app").with_status(InstanceStatus::Down))
        .await
        .unwrap();
    assert!(stream.try_recv().unwrap().is_none());

    registry.unregister(&local, "x").await.unwrap();
    assert_eq!(summary(&next(&mut stream).await), (ChangeKind::Delete, "x".into(), InstanceStatus::Up));
    assert_eq!(summary(&next(&mut stream).await), (ChangeKind::Add, "x".into(), InstanceStatus::Down));

    registry.unregister(&peer, "x").await.unwrap();
    assert_eq!(summary(&next(&mut stream).await), (ChangeKind::Delete, "x".into(), InstanceStatus::Down));
    assert_eq!(registry.size(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn happy_identical_update_is_silent() {
    let registry = running();
    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    replay_ids(&mut stream).await;

    let local = Source::local("c");
    let info = InstanceInfo::new("a", "app").with_last_modified(1);
    registry.register(&local, info.clone()).await.unwrap();
    registry.register(&local, info.clone()).await.unwrap();
    registry.register(&local, info.with_status(InstanceStatus::Down)).await.unwrap();

    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Add));
    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Modify));
    assert!(stream.try_recv().unwrap().is_none());
    registry.shutdown().await;
}

#[tokio::test]
async fn happy_local_promotion_and_matcher_delete() {
    let registry = running();
    let mut all = registry.for_interest(Interest::FullRegistry, None).await;
    let mut replicas = registry
        .for_interest(Interest::FullRegistry, Some(SourceMatcher::origin(Origin::Replicated)))
        .await;
    replay_ids(&mut all).await;
    replay_ids(&mut replicas).await;

    let peer = Source::replicated("peer1");
    let local = Source::local("conn1");
    registry.register(&peer, InstanceInfo::new("x", "app")).await.unwrap();
    registry.register(&local, InstanceInfo::new("x", "app").with_hostname("h1")).await.unwrap();

    // Unfiltered: Add(replica) then Add(local) for the promotion.
    let first = next(&mut all).await;
    let second = next(&mut all).await;
    assert_eq!(first.kind(), Some(ChangeKind::Add));
    assert_eq!(second.kind(), Some(ChangeKind::Add));
    assert!(second.source().is_some_and(Source::is_local));

    // Replica-only view loses the entry.
    assert_eq!(next(&mut replicas).await.kind(), Some(ChangeKind::Add));
    let removed = next(&mut replicas).await;
    assert_eq!(removed.kind(), Some(ChangeKind::Delete));
    assert_eq!(removed.source(), Some(&peer));
    assert!(replicas.try_recv().unwrap().is_none());

    registry.shutdown().await;
}

// =============================================================================
// Replay & Filtering
// =============================================================================

#[tokio::test]
async fn happy_replay_then_live_without_duplicates() {
    let registry = running();
    let local = Source::local("c");
    for id in ["A", "B", "C"] {
        registry.register(&local, InstanceInfo::new(id, "app")).await.unwrap();
    }

    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    let mut ids = replay_ids(&mut stream).await;
    ids.sort();
    assert_eq!(ids, vec!["A", "B", "C"]);

    registry.register(&local, InstanceInfo::new("D", "app")).await.unwrap();
    let live = next(&mut stream).await;
    assert_eq!(live.kind(), Some(ChangeKind::Add));
    assert_eq!(live.info().map(|i| i.id.as_str()), Some("D"));
    assert!(stream.try_recv().unwrap().is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn happy_interest_filters() {
    let registry = running();
    let local = Source::local("c");
    registry
        .register(&local, InstanceInfo::new("b-1", "billing").with_vip("billing.internal"))
        .await
        .unwrap();
    registry
        .register(&local, InstanceInfo::new("s-1", "search").with_vip("search.internal"))
        .await
        .unwrap();

    let mut billing = registry.for_interest(Interest::application("billing"), None).await;
    assert_eq!(replay_ids(&mut billing).await, vec!["b-1"]);

    let vips = Interest::vip_like(".*\\.internal").unwrap();
    assert_eq!(registry.for_snapshot(&vips).len(), 2);

    let union = Interest::multiple(vec![Interest::instance("s-1"), Interest::application("billing")]);
    assert_eq!(registry.for_snapshot(&union).len(), 2);
    assert!(registry.for_snapshot(&Interest::Empty).is_empty());

    registry.register(&local, InstanceInfo::new("s-2", "search")).await.unwrap();
    registry.register(&local, InstanceInfo::new("b-2", "billing")).await.unwrap();
    let live = next(&mut billing).await;
    assert_eq!(live.info().map(|i| i.id.as_str()), Some("b-2"));

    registry.shutdown().await;
}

#[tokio::test]
async fn happy_stream_combinators() {
    let registry = running();
    let local = Source::local("c");
    registry.register(&local, InstanceInfo::new("a", "app")).await.unwrap();

    let stream = registry.for_interest(Interest::FullRegistry, None).await;
    let replay: Vec<ChangeNotification> = stream.take(3).collect().await;
    assert_eq!(replay.len(), 3);
    assert!(replay[0].buffer_state().is_some());
    assert!(replay[1].is_data());
    assert!(replay[2].buffer_state().is_some());

    // The dropped stream unsubscribed itself.
    wait_until(|| registry.subscriptions() == 0).await;
    registry.shutdown().await;
}

#[tokio::test]
async fn happy_snapshot_reads() {
    let registry = running();
    registry.register(&Source::local("c"), InstanceInfo::new("a", "app")).await.unwrap();
    registry.register(&Source::replicated("p"), InstanceInfo::new("b", "app")).await.unwrap();
    registry.register(&Source::replicated("p"), InstanceInfo::new("a", "app")).await.unwrap();

    let mut all: Vec<String> = registry
        .for_snapshot(&Interest::FullRegistry)
        .iter()
        .map(|i| i.id.clone())
        .collect();
    all.sort();
    assert_eq!(all, vec!["a", "b"]);

    let replicated = registry
        .for_snapshot_from(&Interest::FullRegistry, &SourceMatcher::origin(Origin::Replicated));
    assert_eq!(replicated.len(), 1);
    assert_eq!(replicated[0].id, "b");

    let holders = registry.holders();
    assert_eq!(holders[0].id, "a");
    assert_eq!(holders[0].sources.len(), 2);
    registry.shutdown().await;
}

// =============================================================================
// Ingestion streams
// =============================================================================

fn peer_registrations(count: usize) -> Vec<Result<RegistrationEvent, SourceError>> {
    (0..count)
        .map(|i| {
            Ok(RegistrationEvent::Register(
                InstanceInfo::new(format!("i-{i}"), "app").with_last_modified(1),
            ))
        })
        .collect()
}

/// A reconnect stream: bracketed re-registration of the first `count` ids.
fn bracketed_resync(count: usize) -> Vec<Result<RegistrationEvent, SourceError>> {
    let mut events = vec![Ok(RegistrationEvent::Buffer(BufferState::BufferStart))];
    events.extend(peer_registrations(count));
    events.push(Ok(RegistrationEvent::Buffer(BufferState::BufferEnd)));
    events
}

/// Read live notifications up to `source`'s `BufferEnd`, returning the
/// data notifications seen on the way.
async fn until_buffer_end(stream: &mut InterestStream, source: &Source) -> Vec<ChangeKind> {
    let mut kinds = Vec::new();
    loop {
        let note = next(stream).await;
        if note.buffer_state() == Some(BufferState::BufferEnd) && note.source() == Some(source) {
            return kinds;
        }
        if let Some(kind) = note.kind() {
            kinds.push(kind);
        }
    }
}

#[tokio::test]
async fn happy_reconnect_with_same_data_is_silent() {
    let registry = running();
    let peer = Source::replicated("peer");
    let _first = registry
        .connect(
            peer.clone(),
            stream::iter(peer_registrations(10)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();
    wait_until(|| registry.size() == 10).await;

    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    assert_eq!(replay_ids(&mut stream).await.len(), 10);

    let new_peer = peer.reconnect();
    let _second = registry
        .connect(
            new_peer.clone(),
            stream::iter(bracketed_resync(10)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();

    assert!(until_buffer_end(&mut stream, &new_peer).await.is_empty());
    registry.register(&Source::local("c"), InstanceInfo::new("barrier", "app")).await.unwrap();
    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Add));
    assert!(stream.try_recv().unwrap().is_none());

    assert_eq!(registry.size(), 11);
    assert_eq!(registry.pending_evictions(), 0);
    assert!(!registry.is_in_self_preservation());
    assert_eq!(registry.sources(), 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn quota_reconnect_evicts_only_entries_not_reregistered() {
    let registry = running();
    let peer = Source::replicated("peer");
    let _first = registry
        .connect(
            peer.clone(),
            stream::iter(peer_registrations(10)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();
    wait_until(|| registry.size() == 10).await;

    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    replay_ids(&mut stream).await;

    let new_peer = peer.reconnect();
    let _second = registry
        .connect(
            new_peer.clone(),
            stream::iter(bracketed_resync(7)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();

    // Re-registered ids are silent; the three leftovers meet the quota.
    assert!(until_buffer_end(&mut stream, &new_peer).await.is_empty());
    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Delete));
    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Delete));
    wait_until(|| registry.size() == 8 && registry.pending_evictions() == 1).await;
    assert!(registry.is_in_self_preservation());
    assert!(stream.try_recv().unwrap().is_none());
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn quota_reconnect_grace_releases_leftovers() {
    let config = RegistryConfig { reconnect_grace_ms: 1_000, ..Default::default() };
    let registry = Registry::new(config);
    registry.start();
    let peer = Source::replicated("peer");
    let _first = registry
        .connect(
            peer.clone(),
            stream::iter(peer_registrations(10)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();
    wait_until(|| registry.size() == 10).await;

    // No BufferEnd: the leftover waits out the grace period.
    let _second = registry
        .connect(
            peer.reconnect(),
            stream::iter(peer_registrations(9)).chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();
    wait_until(|| registry.pending_evictions() == 1).await;
    assert_eq!(registry.size(), 10);
    assert!(!registry.is_in_self_preservation());

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_until(|| registry.size() == 9 && registry.pending_evictions() == 0).await;
    assert!(!registry.is_in_self_preservation());
    registry.shutdown().await;
}

#[tokio::test]
async fn happy_reconnect_cancels_queued_evictions() {
    // Eviction disabled: leftovers of the old connection stay queued.
    let registry = registry_with_drop(0);
    let peer = Source::replicated("peer");
    let _first = registry
        .connect(
            peer.clone(),
            stream::iter(vec![
                Ok(RegistrationEvent::Register(InstanceInfo::new("a", "app").with_last_modified(1))),
                Ok(RegistrationEvent::Register(InstanceInfo::new("b", "app").with_last_modified(1))),
            ])
            .chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();
    wait_until(|| registry.size() == 2).await;

    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    replay_ids(&mut stream).await;

    let new_peer = peer.reconnect();
    let _second = registry
        .connect(
            new_peer.clone(),
            stream::iter(vec![
                Ok(RegistrationEvent::Register(InstanceInfo::new("a", "app").with_last_modified(1))),
                Ok(RegistrationEvent::Buffer(BufferState::BufferEnd)),
            ])
            .chain(stream::pending()),
            ConnectOptions::default(),
        )
        .await
        .unwrap();

    // Same value from the new connection: silent.
    assert!(until_buffer_end(&mut stream, &new_peer).await.is_empty());
    wait_until(|| registry.pending_evictions() == 1 && registry.is_in_self_preservation()).await;
    assert_eq!(registry.size(), 2);
    assert_eq!(registry.sources(), 1);
    assert!(stream.try_recv().unwrap().is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn happy_graceful_completion_lowers_baseline() {
    let registry = running();
    populate_local(&registry, 5).await;
    let events: Vec<Result<RegistrationEvent, SourceError>> = (0..5)
        .map(|i| Ok(RegistrationEvent::Register(InstanceInfo::new(format!("peer-{i}"), "app"))))
        .collect();
    let _conn = registry
        .connect(Source::replicated("peer"), stream::iter(events), ConnectOptions::default())
        .await
        .unwrap();

    // Half the registry leaves at once, gracefully: no quota involved.
    wait_until(|| registry.size() == 5 && registry.sources() == 0).await;
    assert_eq!(registry.pending_evictions(), 0);
    assert!(!registry.is_in_self_preservation());
    registry.shutdown().await;
}

// =============================================================================
// Quota
// =============================================================================

#[tokio::test]
async fn quota_evict_all_except() {
    let registry = running();
    populate_local(&registry, 10).await;
    let peer = Source::replicated("peer");
    for id in ["p-1", "p-2", "p-3"] {
        registry.register(&peer, InstanceInfo::new(id, "app")).await.unwrap();
    }

    // 13 expected, 20% drop: floor is 10.4, so two removals fit.
    let queued = registry.evict_all_except(SourceMatcher::origin(Origin::Local)).await;
    assert_eq!(queued, 3);
    assert_eq!(registry.size(), 11);
    assert_eq!(registry.pending_evictions(), 1);
    assert!(registry.is_in_self_preservation());

    // Re-registering the queued copy cancels its eviction.
    let holders = registry.holders();
    let left: Vec<&str> = holders
        .iter()
        .filter(|h| h.id.starts_with("p-"))
        .map(|h| h.id.as_str())
        .collect();
    assert_eq!(left.len(), 1);
    registry.register(&peer, InstanceInfo::new(left[0], "app")).await.unwrap();
    assert_eq!(registry.pending_evictions(), 0);
    assert!(!registry.is_in_self_preservation());
    assert_eq!(registry.size(), 11);

    registry.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn happy_shutdown_completes_streams() {
    let registry = running();
    let mut stream = registry.for_interest(Interest::FullRegistry, None).await;
    registry.register(&Source::local("c"), InstanceInfo::new("a", "app")).await.unwrap();

    registry.shutdown().await;
    registry.shutdown().await;
    assert_eq!(registry.state(), RegistryState::Stopped);

    // Buffered notifications drain, then the stream completes.
    replay_ids(&mut stream).await;
    assert_eq!(next(&mut stream).await.kind(), Some(ChangeKind::Add));
    assert_eq!(stream.recv().await.unwrap_err(), SubscriptionError::Closed);

    let mut late = registry.for_interest(Interest::FullRegistry, None).await;
    assert!(late.id().is_none());
    assert_eq!(late.recv().await.unwrap_err(), SubscriptionError::Closed);
}

#[tokio::test]
async fn happy_commands_queue_until_start() {
    let registry = Arc::new(Registry::new(RegistryConfig::default()));
    let pending = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry.register(&Source::local("c"), InstanceInfo::new("a", "app")).await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(registry.size(), 0);
    assert_eq!(registry.state(), RegistryState::Created);

    registry.start();
    pending.await.unwrap().unwrap();
    assert_eq!(registry.size(), 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn happy_health_summary() {
    let registry = running();
    populate_local(&registry, 3).await;
    let _stream = registry.for_interest(Interest::FullRegistry, None).await;
    let _conn = registry
        .connect(Source::replicated("peer"), stream::pending(), ConnectOptions::default())
        .await
        .unwrap();

    let health = registry.health();
    assert_eq!(health.state, RegistryState::Running);
    assert_eq!(health.size, 3);
    assert_eq!(health.subscriptions, 1);
    assert_eq!(health.sources, 1);
    assert!(health.is_healthy());

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["size"], 3);
    registry.shutdown().await;
}
