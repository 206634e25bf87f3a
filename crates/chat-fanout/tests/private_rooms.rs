//! Private rooms between two identities, across instances.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chat_fanout::protocol::Action;
use fanout_test_utils::TestCluster;

#[tokio::test]
async fn test_private_invite_is_completed_by_the_target_instance() {
    let cluster = TestCluster::new();
    let hub_a = cluster.instance("hub-a").await;
    let hub_b = cluster.instance("hub-b").await;
    let hub_c = cluster.instance("hub-c").await;

    let mut u1 = hub_a.connect_as("U1", "one").await;
    let mut u2 = hub_b.connect_as("U2", "two").await;

    u1.invite("U2");

    let requester_side = u1
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .expect("requester should be placed in the private room");
    assert_eq!(requester_side.content, "U2U1");
    assert_eq!(requester_side.sender, "U2");

    let target_side = u2
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .expect("target should be placed in the private room");
    assert_eq!(target_side.content, "U2U1");
    assert_eq!(target_side.sender, "U1");
    assert_eq!(target_side.target, requester_side.target);

    // An instance hosting neither party never starts the room.
    assert_eq!(hub_c.hub.get_status().await.unwrap().room_count, 0);

    u1.say(&requester_side.target, "just us");
    let received = u2.next_message().await.expect("private message over the bus");
    assert_eq!(received.content, "just us");
    assert_eq!(received.sender, "U1");
}

#[tokio::test]
async fn test_private_invite_on_one_instance() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut u1 = instance.connect_as("U1", "one").await;
    let mut u2 = instance.connect_as("U2", "two").await;

    u1.invite("U2");

    let mine = u1
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .unwrap();
    let theirs = u2
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .unwrap();
    assert_eq!(mine.target, theirs.target);

    let room = instance
        .hub
        .find_room_by_id(&mine.target)
        .await
        .unwrap()
        .expect("room should be running");
    assert!(room.is_private());

    let mut members = room.get_state().await.unwrap().members;
    members.sort();
    assert_eq!(members, vec!["U1".to_string(), "U2".to_string()]);
    assert_eq!(instance.hub.get_status().await.unwrap().room_count, 1);
}

#[tokio::test]
async fn test_invite_to_offline_identity_only_joins_requester() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut u1 = instance.connect_as("U1", "one").await;

    u1.invite("nobody");

    let joined = u1
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .unwrap();
    assert_eq!(joined.content, "nobodyU1");
    assert_eq!(joined.sender, "nobody");

    let room = instance
        .hub
        .find_room_by_id(&joined.target)
        .await
        .unwrap()
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert_eq!(state.members, vec!["U1".to_string()]);

    let extra = u1.peer.drain_within(Duration::from_millis(200)).await;
    assert!(extra
        .iter()
        .all(|envelope| envelope.action != Action::RoomJoined));
}
