//! `RoomActor` - owns one room's local membership.
//!
//! Each `RoomActor`:
//! - Is started by the `HubActor` (created, or hydrated from the room store)
//! - Subscribes to the bus channel derived from the room name
//! - Publishes relayed envelopes to that channel instead of writing to
//!   member mailboxes directly
//! - Fans every payload received on the channel out to all local members,
//!   the original sender included
//!
//! Because delivery only happens on the bus round-trip, every instance
//! hosting members of the room applies the same fan-out.
//!
//! # Lifecycle
//!
//! `Created -> Running` once the subscription is open. With
//! [`RoomRetention::EvictWhenIdle`], a room that stays empty for the idle
//! period notifies the hub, which re-checks membership and cancels it
//! (`Running -> Evicted`). The room also stops when its subscription ends
//! or its cancellation token fires.

use crate::bus::{channel_kind, room_channel, BusSubscription, MessageBus};
use crate::errors::FanoutError;
use crate::observability::metrics;
use crate::protocol::Envelope;
use crate::store::RoomRecord;

use super::connection::ConnectionHandle;
use super::messages::{RoomMessage, RoomState};
use super::metrics::{ActorType, MailboxMonitor};

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// What happens to a room once it has no local members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomRetention {
    /// Keep the room running for the life of the process.
    #[default]
    Indefinite,
    /// Ask the hub to evict the room after it has been empty this long.
    EvictWhenIdle(Duration),
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: Arc<str>,
    name: Arc<str>,
    private: bool,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Add a session. Returns `false` if it was already a member.
    pub async fn register(&self, connection: ConnectionHandle) -> Result<bool, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Register {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| FanoutError::ChannelClosed(format!("room send failed: {e}")))?;

        rx.await
            .map_err(|e| FanoutError::ChannelClosed(format!("room response failed: {e}")))
    }

    /// Remove a session. Returns `false` if it was not a member.
    pub async fn unregister(&self, session_id: &str) -> Result<bool, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Unregister {
                session_id: session_id.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|e| FanoutError::ChannelClosed(format!("room send failed: {e}")))?;

        rx.await
            .map_err(|e| FanoutError::ChannelClosed(format!("room response failed: {e}")))
    }

    /// Publish an envelope to every member on every instance.
    pub async fn relay(&self, envelope: Envelope) -> Result<(), FanoutError> {
        self.sender
            .send(RoomMessage::Relay { envelope })
            .await
            .map_err(|e| FanoutError::ChannelClosed(format!("room send failed: {e}")))
    }

    /// Get the room's current state.
    pub async fn get_state(&self) -> Result<RoomState, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| FanoutError::ChannelClosed(format!("room send failed: {e}")))?;

        rx.await
            .map_err(|e| FanoutError::ChannelClosed(format!("room response failed: {e}")))
    }

    /// Stop the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room identifier.
    room_id: String,
    /// Room name.
    name: String,
    /// Bus channel for this room.
    channel: String,
    /// Private rooms send no join notices.
    private: bool,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the hub's).
    cancel_token: CancellationToken,
    /// Bus used for relay.
    bus: Arc<dyn MessageBus>,
    /// Subscription to the room channel.
    subscription: BusSubscription,
    /// Local members by session id.
    members: HashMap<String, ConnectionHandle>,
    /// Empty-room policy.
    retention: RoomRetention,
    /// Where idle notices go (the hub).
    idle_notifier: mpsc::UnboundedSender<String>,
    /// When the room last became empty.
    empty_since: Option<Instant>,
    /// Whether the current idle period was already reported.
    idle_reported: bool,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Subscribe to the room channel and spawn the actor.
    ///
    /// The subscription is opened before this returns, so nothing relayed
    /// after a successful start can be missed.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Bus` if the subscription cannot be opened.
    pub async fn start(
        record: RoomRecord,
        bus: Arc<dyn MessageBus>,
        cancel_token: CancellationToken,
        retention: RoomRetention,
        idle_notifier: mpsc::UnboundedSender<String>,
    ) -> Result<(RoomHandle, JoinHandle<()>), FanoutError> {
        let channel = room_channel(&record.name);
        let subscription = bus.subscribe(&channel).await?;
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let handle = RoomHandle {
            sender,
            cancel_token: cancel_token.clone(),
            room_id: Arc::from(record.id.as_str()),
            name: Arc::from(record.name.as_str()),
            private: record.private,
        };

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Room, &record.id),
            room_id: record.id,
            name: record.name,
            channel,
            private: record.private,
            receiver,
            cancel_token,
            bus,
            subscription,
            members: HashMap::new(),
            retention,
            idle_notifier,
            empty_since: Some(Instant::now()),
            idle_reported: false,
        };

        let task_handle = tokio::spawn(actor.run());

        Ok((handle, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "fanout.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "fanout.actor.room",
            room_id = %self.room_id,
            private = self.private,
            "RoomActor started"
        );

        loop {
            let idle_deadline = self.idle_deadline();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "fanout.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                        }
                        None => break,
                    }
                }

                payload = self.subscription.next() => {
                    match payload {
                        Some(payload) => self.fan_out(&payload),
                        None => {
                            warn!(
                                target: "fanout.actor.room",
                                room_id = %self.room_id,
                                "Room subscription closed, stopping"
                            );
                            break;
                        }
                    }
                }

                () = sleep_until_deadline(idle_deadline) => {
                    self.report_idle();
                }
            }
        }

        info!(
            target: "fanout.actor.room",
            room_id = %self.room_id,
            members_remaining = self.members.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Register {
                connection,
                respond_to,
            } => {
                let added = self.register(connection);
                let _ = respond_to.send(added);
            }

            RoomMessage::Unregister {
                session_id,
                respond_to,
            } => {
                let removed = self.unregister(&session_id);
                let _ = respond_to.send(removed);
            }

            RoomMessage::Relay { envelope } => {
                self.relay(&envelope).await;
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_id: self.room_id.clone(),
                    name: self.name.clone(),
                    private: self.private,
                    members: self.members.keys().cloned().collect(),
                });
            }
        }
    }

    fn register(&mut self, connection: ConnectionHandle) -> bool {
        if self.members.contains_key(connection.session_id()) {
            return false;
        }

        // Existing members only: the joiner never sees its own notice.
        if !self.private {
            let notice = Envelope::join_notice(
                &self.room_id,
                connection.display_name(),
                connection.session_id(),
            );
            match notice.encode() {
                Ok(payload) => {
                    self.deliver_local(&Arc::from(payload));
                }
                Err(e) => warn!(
                    target: "fanout.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Failed to encode join notice"
                ),
            }
        }

        debug!(
            target: "fanout.actor.room",
            room_id = %self.room_id,
            session_id = %connection.session_id(),
            "Member registered"
        );

        self.members
            .insert(connection.session_id().to_string(), connection);
        self.empty_since = None;
        self.idle_reported = false;
        true
    }

    fn unregister(&mut self, session_id: &str) -> bool {
        let removed = self.members.remove(session_id).is_some();
        if removed {
            debug!(
                target: "fanout.actor.room",
                room_id = %self.room_id,
                session_id = %session_id,
                "Member unregistered"
            );
            self.mark_empty_if_needed();
        }
        removed
    }

    async fn relay(&mut self, envelope: &Envelope) {
        let payload = match envelope.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "fanout.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Failed to encode relayed envelope"
                );
                return;
            }
        };

        if let Err(e) = self.bus.publish(&self.channel, payload).await {
            metrics::record_bus_publish_failure(channel_kind(&self.channel));
            warn!(
                target: "fanout.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Failed to publish to room channel"
            );
        }
    }

    /// Deliver a bus payload to every local member.
    fn fan_out(&mut self, payload: &Bytes) {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => Arc::<str>::from(text),
            Err(e) => {
                warn!(
                    target: "fanout.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Dropping non-UTF-8 room payload"
                );
                return;
            }
        };

        let delivered = self.deliver_local(&text);
        metrics::record_room_fanout(delivered);
    }

    /// Write to every member's mailbox, pruning members that are gone.
    fn deliver_local(&mut self, payload: &Arc<str>) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (session_id, member) in &self.members {
            if member.deliver(Arc::clone(payload)).is_ok() {
                delivered += 1;
            } else {
                gone.push(session_id.clone());
            }
        }

        for session_id in gone {
            self.members.remove(&session_id);
            debug!(
                target: "fanout.actor.room",
                room_id = %self.room_id,
                session_id = %session_id,
                "Pruned departed member"
            );
        }
        self.mark_empty_if_needed();

        delivered
    }

    fn mark_empty_if_needed(&mut self) {
        if self.members.is_empty() && self.empty_since.is_none() {
            self.empty_since = Some(Instant::now());
            self.idle_reported = false;
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        match self.retention {
            RoomRetention::Indefinite => None,
            RoomRetention::EvictWhenIdle(idle_for) => {
                if self.idle_reported {
                    None
                } else {
                    self.empty_since.map(|since| since + idle_for)
                }
            }
        }
    }

    fn report_idle(&mut self) {
        self.idle_reported = true;
        debug!(
            target: "fanout.actor.room",
            room_id = %self.room_id,
            "Room idle, notifying hub"
        );
        let _ = self.idle_notifier.send(self.room_id.clone());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionHandle;
    use crate::bus::InMemoryBus;
    use crate::protocol::Action;

    fn record(name: &str, private: bool) -> RoomRecord {
        RoomRecord {
            id: format!("id-{name}"),
            name: name.to_string(),
            private,
        }
    }

    async fn start_room(
        bus: &InMemoryBus,
        name: &str,
        private: bool,
        retention: RoomRetention,
    ) -> (RoomHandle, JoinHandle<()>, mpsc::UnboundedReceiver<String>) {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let (handle, task) = RoomActor::start(
            record(name, private),
            Arc::new(bus.clone()),
            CancellationToken::new(),
            retention,
            idle_tx,
        )
        .await
        .unwrap();
        (handle, task, idle_rx)
    }

    fn decode(payload: &str) -> Envelope {
        Envelope::decode(payload.as_bytes()).unwrap()
    }

    #[test]
    fn test_actor_loop_is_send() {
        fn require_send<F: std::future::Future + Send>(_: F) {}
        let _ = |actor: RoomActor| require_send(actor.run());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "lobby", false, RoomRetention::Indefinite).await;
        let (alice, _alice_rx) = ConnectionHandle::detached("alice-id", "alice", 8);

        assert!(room.register(alice.clone()).await.unwrap());
        assert!(!room.register(alice).await.unwrap());

        let state = room.get_state().await.unwrap();
        assert_eq!(state.members, vec!["alice-id".to_string()]);
    }

    #[tokio::test]
    async fn test_public_join_notice_goes_to_existing_members_only() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "general", false, RoomRetention::Indefinite).await;
        let (alice, mut alice_rx) = ConnectionHandle::detached("alice-id", "alice", 8);
        let (bob, mut bob_rx) = ConnectionHandle::detached("bob-id", "bob", 8);

        room.register(alice).await.unwrap();
        assert!(alice_rx.try_recv().is_err(), "alice must not see her own notice");

        room.register(bob).await.unwrap();

        let notice = decode(&alice_rx.recv().await.unwrap());
        assert_eq!(notice.action, Action::SendMessage);
        assert_eq!(notice.content, "bob joined the room");
        assert_eq!(notice.target, "id-general");
        assert_eq!(notice.sender, "bob-id");
        assert!(bob_rx.try_recv().is_err(), "bob must not see his own notice");
    }

    #[tokio::test]
    async fn test_private_room_sends_no_join_notice() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "u2u1", true, RoomRetention::Indefinite).await;
        let (u1, mut u1_rx) = ConnectionHandle::detached("u1", "one", 8);
        let (u2, _u2_rx) = ConnectionHandle::detached("u2", "two", 8);

        room.register(u1).await.unwrap();
        room.register(u2).await.unwrap();
        room.get_state().await.unwrap();

        assert!(u1_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_fans_out_to_all_members_including_sender() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "lobby", true, RoomRetention::Indefinite).await;
        let (a, mut a_rx) = ConnectionHandle::detached("a", "A", 8);
        let (b, mut b_rx) = ConnectionHandle::detached("b", "B", 8);
        room.register(a).await.unwrap();
        room.register(b).await.unwrap();

        let message = Envelope::send_message("id-lobby", "hello", "a");
        room.relay(message.clone()).await.unwrap();

        assert_eq!(decode(&a_rx.recv().await.unwrap()), message);
        assert_eq!(decode(&b_rx.recv().await.unwrap()), message);
    }

    #[tokio::test]
    async fn test_payloads_from_other_instances_are_fanned_out() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "lobby", true, RoomRetention::Indefinite).await;
        let (a, mut a_rx) = ConnectionHandle::detached("a", "A", 8);
        room.register(a).await.unwrap();

        let remote = Envelope::send_message("id-lobby", "from afar", "remote-user");
        bus.publish(&room_channel("lobby"), remote.to_bytes().unwrap())
            .await
            .unwrap();

        assert_eq!(decode(&a_rx.recv().await.unwrap()), remote);
    }

    #[tokio::test]
    async fn test_unregister_removes_local_member_only() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "lobby", true, RoomRetention::Indefinite).await;
        let (a, _a_rx) = ConnectionHandle::detached("a", "A", 8);
        room.register(a).await.unwrap();

        assert!(room.unregister("a").await.unwrap());
        assert!(!room.unregister("a").await.unwrap());
        assert!(room.get_state().await.unwrap().members.is_empty());
    }

    #[tokio::test]
    async fn test_closed_members_are_pruned_on_fan_out() {
        let bus = InMemoryBus::new();
        let (room, _task, _idle) = start_room(&bus, "lobby", true, RoomRetention::Indefinite).await;
        let (a, a_rx) = ConnectionHandle::detached("a", "A", 8);
        let (b, mut b_rx) = ConnectionHandle::detached("b", "B", 8);
        room.register(a).await.unwrap();
        room.register(b).await.unwrap();
        drop(a_rx);

        room.relay(Envelope::send_message("id-lobby", "x", "b"))
            .await
            .unwrap();
        b_rx.recv().await.unwrap();

        let state = room.get_state().await.unwrap();
        assert_eq!(state.members, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_subscription_close_stops_room() {
        let bus = InMemoryBus::new();
        let (_room, task, _idle) = start_room(&bus, "lobby", false, RoomRetention::Indefinite).await;

        bus.shutdown();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("room should stop when its subscription ends")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_room() {
        let bus = InMemoryBus::new();
        let (room, task, _idle) = start_room(&bus, "lobby", false, RoomRetention::Indefinite).await;

        room.cancel();
        assert!(room.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("room should stop on cancel")
            .unwrap();
        assert!(room.get_state().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_room_notifies_once_per_empty_period() {
        let bus = InMemoryBus::new();
        let idle_for = Duration::from_secs(30);
        let (room, _task, mut idle_rx) =
            start_room(&bus, "lobby", false, RoomRetention::EvictWhenIdle(idle_for)).await;
        let (a, _a_rx) = ConnectionHandle::detached("a", "A", 8);
        room.register(a).await.unwrap();

        // Occupied rooms never report idle.
        tokio::time::sleep(idle_for * 2).await;
        assert!(idle_rx.try_recv().is_err());

        room.unregister("a").await.unwrap();
        tokio::time::sleep(idle_for + Duration::from_secs(1)).await;
        assert_eq!(idle_rx.recv().await.unwrap(), "id-lobby");

        tokio::time::sleep(idle_for * 2).await;
        assert!(idle_rx.try_recv().is_err(), "idle is reported once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_indefinite_retention_never_reports_idle() {
        let bus = InMemoryBus::new();
        let (_room, _task, mut idle_rx) =
            start_room(&bus, "lobby", false, RoomRetention::Indefinite).await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(idle_rx.try_recv().is_err());
    }
}
