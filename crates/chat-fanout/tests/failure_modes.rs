//! Degraded backends, slow consumers, dead peers and idle rooms.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chat_fanout::actors::{ConnectionHandle, ConnectionSettings, HubSettings, RoomRetention};
use chat_fanout::protocol::Action;
use fanout_test_utils::{wait_until, FailingBus, FailingStore, TestCluster, TestInstance};

const QUIET_PERIOD: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_store_failures_do_not_block_chat() {
    let store = FailingStore::always_failing();
    let instance = TestInstance::start(
        HubSettings::new("hub-a"),
        ConnectionSettings::default(),
        Arc::new(FailingBus::new()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .await;

    let mut alice = instance.connect("alice").await;
    let lobby = alice.join_room("lobby").await;
    alice.say(&lobby.target, "still works");

    let echoed = alice.next_message().await.expect("echo despite store failures");
    assert_eq!(echoed.content, "still works");
    assert!(store.failures() > 0);
    assert_eq!(store.inner().identity_count(), 0);
}

#[tokio::test]
async fn test_publish_failure_drops_the_message_only() {
    let bus = FailingBus::new();
    let cluster = TestCluster::new();
    let instance = TestInstance::start(
        HubSettings::new("hub-a"),
        ConnectionSettings::default(),
        Arc::new(bus.clone()),
        Arc::new(cluster.store.clone()),
        Arc::new(cluster.store.clone()),
    )
    .await;

    let mut alice = instance.connect("alice").await;
    let lobby = alice.join_room("lobby").await;

    bus.set_failing(true);
    alice.say(&lobby.target, "lost");
    let drained = alice.peer.drain_within(QUIET_PERIOD).await;
    assert!(drained
        .iter()
        .all(|envelope| envelope.action != Action::SendMessage));
    assert!(bus.publish_failures() > 0);
    assert!(!alice.handle.is_cancelled(), "connection survives a failed publish");

    bus.set_failing(false);
    alice.say(&lobby.target, "delivered");
    assert_eq!(alice.next_message().await.unwrap().content, "delivered");
}

#[tokio::test]
async fn test_slow_consumer_is_disconnected_without_stalling_the_room() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;

    let (slow, _never_read) = ConnectionHandle::detached("slow-id", "slow", 1);
    let room = instance
        .hub
        .join_room("lobby", slow.clone(), None)
        .await
        .unwrap()
        .expect("slow consumer joins");

    let mut alice = instance.connect("alice").await;
    let mut bob = instance.connect("bob").await;
    alice.join_room("lobby").await;
    bob.join_room("lobby").await;

    for i in 0..5 {
        alice.say(room.room_id(), &format!("message {i}"));
    }

    let mut received = Vec::new();
    while received.len() < 5 {
        let envelope = bob.next_message().await.expect("bob keeps receiving");
        if !envelope.content.ends_with("joined the room") {
            received.push(envelope.content);
        }
    }
    let expected: Vec<String> = (0..5).map(|i| format!("message {i}")).collect();
    assert_eq!(received, expected);

    assert!(slow.is_cancelled(), "overflow disconnects the slow session");
    let room_for_poll = room.clone();
    let pruned = wait_until(Duration::from_secs(2), move || {
        let room = room_for_poll.clone();
        async move {
            !room
                .get_state()
                .await
                .unwrap()
                .members
                .contains(&"slow-id".to_string())
        }
    })
    .await;
    assert!(pruned);
}

#[tokio::test(start_paused = true)]
async fn test_missing_pongs_close_the_connection() {
    let cluster = TestCluster::new();
    let settings = ConnectionSettings {
        pong_wait: Duration::from_secs(2),
        ping_period: Duration::from_secs(1),
        ..ConnectionSettings::default()
    };
    let instance = cluster
        .instance_with("hub-a", RoomRetention::Indefinite, settings)
        .await;

    let mut silent = instance.connect("silent").await;
    silent.peer.set_auto_pong(false);

    assert!(silent.peer.wait_closed(Duration::from_secs(10)).await);

    let instance = &instance;
    let unregistered = wait_until(Duration::from_secs(5), move || async move {
        instance.client_count().await == 0
    })
    .await;
    assert!(unregistered);
}

#[tokio::test(start_paused = true)]
async fn test_idle_room_is_evicted_and_rehydrated_on_rejoin() {
    let cluster = TestCluster::new();
    let idle_for = Duration::from_secs(30);
    let instance = cluster
        .instance_with(
            "hub-a",
            RoomRetention::EvictWhenIdle(idle_for),
            ConnectionSettings::default(),
        )
        .await;

    let mut alice = instance.connect("alice").await;
    let first = alice.join_room("lobby").await;

    alice.leave_room(&first.target);
    tokio::time::sleep(idle_for + Duration::from_secs(1)).await;
    assert_eq!(instance.hub.get_status().await.unwrap().room_count, 0);

    let again = alice.join_room("lobby").await;
    assert_eq!(again.target, first.target, "room id survives eviction");
    assert_eq!(instance.hub.get_status().await.unwrap().room_count, 1);
}
