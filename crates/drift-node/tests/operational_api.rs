//! Black-box coverage of the Coordinator's public operational API: the
//! surface an embedder actually drives (spec §4.8), exercised without
//! reaching into any crate-private state.

use std::sync::Arc;

use drift_core::clock::test_support::TestClock;
use drift_core::config::EngineConfig;
use drift_core::{Clock, ChannelId, DomainError, DomainEvent, NodeId, StreamId};
use drift_node::{Coordinator, InMemoryChannelRepository, InMemoryLocalNodeRepository, InMemoryPeerRepository};
use drift_store::InMemoryEntryStore;
use drift_transport::InMemoryNetwork;

fn node(n: &str) -> NodeId {
    NodeId::new(n).unwrap()
}
fn channel(n: &str) -> ChannelId {
    ChannelId::new(n).unwrap()
}
fn stream(n: &str) -> StreamId {
    StreamId::new(n).unwrap()
}

type TestCoordinator = Coordinator<InMemoryChannelRepository, InMemoryPeerRepository, InMemoryLocalNodeRepository>;

async fn standalone_node(name: &str) -> TestCoordinator {
    // No peers are ever registered on this node's port in these tests; a
    // fresh, otherwise-unused network just gives it somewhere to attach.
    let network = InMemoryNetwork::new();
    let local = node(name);
    let port = Arc::new(network.register(local.clone()));
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new(1_000));
    Coordinator::new(
        EngineConfig::default(),
        Arc::new(InMemoryEntryStore::new()),
        port,
        Arc::new(InMemoryChannelRepository::new()),
        Arc::new(InMemoryPeerRepository::new(local.clone())),
        Arc::new(InMemoryLocalNodeRepository::new(local)),
        clock,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn append_assigns_sequential_entries_and_publishes_matching_events() {
    let coordinator = standalone_node("alice").await;
    let mut events = coordinator.subscribe();

    coordinator.create_channel(channel("c")).await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), DomainEvent::ChannelCreated { channel } if channel == self::channel("c")));

    let entry = coordinator.append(channel("c"), stream("s"), b"hello".to_vec()).await.unwrap();
    assert_eq!(entry.sequence, 1);
    assert_eq!(entry.author, node("alice"));

    assert!(matches!(events.recv().await.unwrap(), DomainEvent::StreamCreated { .. }));
    match events.recv().await.unwrap() {
        DomainEvent::EntryAppended { entry: id, .. } => assert_eq!(id, entry.id()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn operational_api_round_trips_peers_channels_and_membership() {
    let coordinator = standalone_node("alice").await;

    coordinator.add_peer(node("bob")).await.unwrap();
    coordinator.create_channel(channel("c")).await.unwrap();
    coordinator.add_member(channel("c"), node("bob")).await.unwrap();
    coordinator.remove_member(channel("c"), node("bob")).await.unwrap();
    coordinator.remove_peer(node("bob")).await.unwrap();
    coordinator.delete_channel(channel("c")).await.unwrap();
}

#[tokio::test]
async fn repository_invariant_violations_propagate_to_the_caller() {
    let coordinator = standalone_node("alice").await;

    let local = node("alice");
    assert!(matches!(
        coordinator.add_peer(local).await,
        Err(DomainError::CannotAddSelfAsPeer(_))
    ));
    assert!(matches!(
        coordinator.add_member(channel("ghost"), node("bob")).await,
        Err(DomainError::ChannelNotFound(_))
    ));
}

#[tokio::test]
async fn start_and_stop_drain_the_scheduler_tasks_within_the_grace_period() {
    let coordinator = standalone_node("alice").await;
    let tasks = coordinator.start();
    tokio::task::yield_now().await;
    coordinator.stop(tasks).await;
}
