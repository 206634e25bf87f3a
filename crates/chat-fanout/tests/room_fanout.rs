//! Room membership and message fanout through connected clients.
//!
//! Every test drives real `ConnectionActor`s over the in-memory transport;
//! instances share one in-process bus, so cross-instance delivery takes the
//! same bus round-trip as in production.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chat_fanout::protocol::Action;
use fanout_test_utils::TestCluster;

const QUIET_PERIOD: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_members_receive_messages_including_their_own() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut alice = instance.connect("alice").await;
    let mut bob = instance.connect("bob").await;

    let lobby = alice.join_room("lobby").await;
    let joined = bob.join_room("lobby").await;
    assert_eq!(lobby.target, joined.target, "both should be in the same room");

    alice.say(&lobby.target, "hello everyone");

    // Alice's first message is bob's join notice.
    let notice = alice.next_message().await.unwrap();
    assert_eq!(notice.content, "bob joined the room");
    let echoed = alice.next_message().await.expect("sender should get its own message");
    assert_eq!(echoed.content, "hello everyone");
    assert_eq!(echoed.sender, alice.session_id);
    assert_eq!(echoed.target, lobby.target);

    let received = bob.next_message().await.expect("other member should get the message");
    assert_eq!(received.content, "hello everyone");
    assert_eq!(received.sender, alice.session_id);
}

#[tokio::test]
async fn test_join_notice_goes_to_existing_members_only() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut alice = instance.connect("alice").await;
    let mut bob = instance.connect("bob").await;

    let lobby = alice.join_room("lobby").await;
    bob.join_room("lobby").await;

    let notice = alice.next_message().await.unwrap();
    assert_eq!(notice.content, "bob joined the room");
    assert_eq!(notice.target, lobby.target);
    assert_eq!(notice.sender, bob.session_id);

    let bob_messages: Vec<_> = bob
        .peer
        .drain_within(QUIET_PERIOD)
        .await
        .into_iter()
        .filter(|envelope| envelope.action == Action::SendMessage)
        .collect();
    assert!(bob_messages.is_empty(), "bob must not see his own join notice");
}

#[tokio::test]
async fn test_messages_reach_members_on_other_instances() {
    let cluster = TestCluster::new();
    let hub_a = cluster.instance("hub-a").await;
    let hub_b = cluster.instance("hub-b").await;
    let mut alice = hub_a.connect("alice").await;
    let mut bob = hub_b.connect("bob").await;

    let on_a = alice.join_room("lobby").await;
    let on_b = bob.join_room("lobby").await;
    assert_eq!(on_a.target, on_b.target, "room identity comes from the shared store");

    alice.say(&on_a.target, "across instances");

    let received = bob.next_message().await.expect("bob should receive via the bus");
    assert_eq!(received.content, "across instances");
    assert_eq!(received.sender, alice.session_id);

    let echoed = alice.next_message().await.unwrap();
    assert_eq!(echoed.content, "across instances");

    assert_eq!(hub_a.hub.get_status().await.unwrap().room_count, 1);
    assert_eq!(hub_b.hub.get_status().await.unwrap().room_count, 1);
}

#[tokio::test]
async fn test_left_member_stops_receiving() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut alice = instance.connect("alice").await;
    let mut bob = instance.connect("bob").await;

    let lobby = alice.join_room("lobby").await;
    bob.join_room("lobby").await;
    alice.next_message().await.unwrap(); // bob's join notice

    bob.leave_room(&lobby.target);
    let room = instance
        .hub
        .find_room_by_id(&lobby.target)
        .await
        .unwrap()
        .unwrap();
    let left = fanout_test_utils::wait_until(Duration::from_secs(2), || {
        let room = room.clone();
        async move { room.get_state().await.unwrap().members.len() == 1 }
    })
    .await;
    assert!(left, "bob should be removed from the room");

    alice.say(&lobby.target, "after bob left");
    assert_eq!(alice.next_message().await.unwrap().content, "after bob left");

    let bob_messages: Vec<_> = bob
        .peer
        .drain_within(QUIET_PERIOD)
        .await
        .into_iter()
        .filter(|envelope| envelope.action == Action::SendMessage)
        .collect();
    assert!(bob_messages.is_empty());
}

#[tokio::test]
async fn test_message_to_unknown_room_is_dropped() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut alice = instance.connect("alice").await;

    alice.say("no-such-room", "anyone?");

    let drained = alice.peer.drain_within(QUIET_PERIOD).await;
    assert!(drained
        .iter()
        .all(|envelope| envelope.action != Action::SendMessage));
    assert!(!alice.handle.is_cancelled(), "connection stays open");
}

#[tokio::test]
async fn test_private_room_cannot_be_joined_by_name() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut u1 = instance.connect_as("U1", "one").await;
    let _u2 = instance.connect_as("U2", "two").await;
    let mut carol = instance.connect("carol").await;

    u1.invite("U2");
    let private = u1
        .peer
        .next_envelope_with_action(Action::RoomJoined)
        .await
        .unwrap();
    assert_eq!(private.content, "U2U1");

    carol.peer.send_text(r#"{"action":"join_room","content":"U2U1"}"#);

    let confirmations: Vec<_> = carol
        .peer
        .drain_within(QUIET_PERIOD)
        .await
        .into_iter()
        .filter(|envelope| envelope.action == Action::RoomJoined)
        .collect();
    assert!(confirmations.is_empty(), "private join without inviter is refused");

    let room = instance
        .hub
        .find_room_by_id(&private.target)
        .await
        .unwrap()
        .unwrap();
    let members = room.get_state().await.unwrap().members;
    assert!(!members.contains(&carol.session_id));
}

#[tokio::test]
async fn test_room_named_general_is_isolated_from_presence() {
    let cluster = TestCluster::new();
    let instance = cluster.instance("hub-a").await;
    let mut alice = instance.connect("alice").await;
    let general = alice.join_room("general").await;
    alice.peer.drain_within(QUIET_PERIOD).await;

    let bob = instance.connect("bob").await;
    let u1 = instance.connect_as("U1", "one").await;
    let _u2 = instance.connect_as("U2", "two").await;
    u1.invite("U2");

    let seen = alice.peer.drain_within(QUIET_PERIOD).await;
    let bob_joined = seen
        .iter()
        .filter(|envelope| {
            envelope.action == Action::UserJoined && envelope.sender == bob.session_id
        })
        .count();
    assert_eq!(bob_joined, 1, "presence delivered once in {seen:?}");
    assert!(
        seen.iter()
            .all(|envelope| envelope.action != Action::JoinRoomPrivate),
        "invitations leaked into the room: {seen:?}"
    );

    alice.say(&general.target, "still a normal room");
    let echoed = alice.next_message().await.unwrap();
    assert_eq!(echoed.content, "still a normal room");
    assert_eq!(echoed.target, general.target);
}
