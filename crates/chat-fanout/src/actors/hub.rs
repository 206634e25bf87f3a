//! `HubActor` - singleton registry of sessions and rooms per instance.
//!
//! The `HubActor` is the top-level actor in the fanout hierarchy:
//!
//! - Singleton per instance
//! - Registers and unregisters sessions, persisting their identities
//! - Creates, hydrates and supervises `RoomActor`s
//! - Consumes the global bus channel: presence events and private-room
//!   invitations from every instance
//! - Owns the cancellation token its rooms derive from
//!
//! # Presence
//!
//! The hub keeps a presence cache fed only by the global channel (seeded
//! from the identity store at start). A new session receives the cached
//! roster before it is added to the registry, so it sees every identity
//! exactly once: from the roster if already online, or from the live event.
//!
//! # Private rooms
//!
//! `U1` inviting `U2` joins `U1` to the room named `U2U1` on U1's instance
//! and publishes the invitation on the global channel. Whichever hub holds
//! `U2`'s session completes the join on its behalf.

use crate::bus::{channel_kind, BusSubscription, MessageBus, GLOBAL_CHANNEL};
use crate::errors::FanoutError;
use crate::observability::metrics;
use crate::protocol::{private_room_name, Action, Envelope};
use crate::store::{Identity, IdentityStore, RoomRecord, RoomStore};

use super::connection::ConnectionHandle;
use super::messages::{HubMessage, HubStatus, PresenceRecord};
use super::metrics::{ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle, RoomRetention};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 1000;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Instance identifier used in logs and status.
    pub instance_id: String,
    /// What happens to rooms with no local members.
    pub room_retention: RoomRetention,
}

impl HubSettings {
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            room_retention: RoomRetention::default(),
        }
    }

    #[must_use]
    pub fn with_room_retention(mut self, retention: RoomRetention) -> Self {
        self.room_retention = retention;
        self
    }
}

/// Handle to the `HubActor`.
///
/// All methods are async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Register a session. Completes once the roster has been queued to it.
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::Register {
            connection,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Unregister a session. Returns `false` if it was not registered.
    pub async fn unregister(&self, session_id: &str) -> Result<bool, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::Unregister {
            session_id: session_id.to_string(),
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Deliver an envelope to every session registered on this instance.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), FanoutError> {
        self.send(HubMessage::Broadcast { envelope }).await
    }

    /// Find a room by name, hydrating it from the room store if needed.
    pub async fn resolve_room(&self, name: &str) -> Result<Option<RoomHandle>, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::ResolveRoom {
            name: name.to_string(),
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Create and start a room.
    pub async fn create_room(&self, name: &str, private: bool) -> Result<RoomHandle, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::CreateRoom {
            name: name.to_string(),
            private,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Find a room running on this instance by id.
    pub async fn find_room_by_id(&self, room_id: &str) -> Result<Option<RoomHandle>, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::FindRoomById {
            room_id: room_id.to_string(),
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Resolve or create a room and register `requester` with it.
    ///
    /// Returns `None` when the join is refused (private room, no inviter).
    pub async fn join_room(
        &self,
        name: impl Into<String>,
        requester: ConnectionHandle,
        inviter: Option<String>,
    ) -> Result<Option<RoomHandle>, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::JoinRoom {
            name: name.into(),
            requester,
            inviter,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Open a private room between `requester` and `target_id` and invite
    /// the target across all instances.
    pub async fn invite_private(
        &self,
        requester: ConnectionHandle,
        target_id: impl Into<String>,
    ) -> Result<Option<RoomHandle>, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::InvitePrivate {
            requester,
            target_id: target_id.into(),
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    pub async fn get_status(&self) -> Result<HubStatus, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::GetStatus { respond_to: tx }).await?;
        Self::receive(rx).await
    }

    /// Identities currently online across all instances.
    pub async fn list_presence(&self) -> Result<Vec<PresenceRecord>, FanoutError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::ListPresence { respond_to: tx }).await?;
        Self::receive(rx).await
    }

    /// Stop the hub and every room it started.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: HubMessage) -> Result<(), FanoutError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| FanoutError::ChannelClosed(format!("hub send failed: {e}")))
    }

    async fn receive<T>(rx: oneshot::Receiver<T>) -> Result<T, FanoutError> {
        rx.await
            .map_err(|e| FanoutError::ChannelClosed(format!("hub response failed: {e}")))
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// When this instance started the room.
    started_at: DateTime<Utc>,
}

impl ManagedRoom {
    fn is_running(&self) -> bool {
        !self.task_handle.is_finished() && !self.handle.is_cancelled()
    }
}

/// The `HubActor` implementation.
pub struct HubActor {
    /// Instance ID.
    instance_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<HubMessage>,
    /// Cancellation token (parent of every room's).
    cancel_token: CancellationToken,
    /// Distributed bus.
    bus: Arc<dyn MessageBus>,
    /// Identity persistence.
    identities: Arc<dyn IdentityStore>,
    /// Room persistence.
    room_store: Arc<dyn RoomStore>,
    /// Empty-room policy applied to every room started here.
    room_retention: RoomRetention,
    /// Local sessions by session id.
    clients: HashMap<String, ConnectionHandle>,
    /// Running rooms by room id.
    rooms: HashMap<String, ManagedRoom>,
    /// Room id by room name.
    room_names: HashMap<String, String>,
    /// Online identities across all instances.
    presence: HashMap<String, PresenceRecord>,
    /// Global channel subscription.
    presence_subscription: BusSubscription,
    /// Idle notices from rooms.
    idle_tx: mpsc::UnboundedSender<String>,
    idle_rx: mpsc::UnboundedReceiver<String>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl HubActor {
    /// Seed presence, subscribe to the global channel and spawn the hub.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Bus` if the global channel subscription fails.
    /// A failing identity listing only leaves the presence cache empty.
    pub async fn start(
        settings: HubSettings,
        bus: Arc<dyn MessageBus>,
        identities: Arc<dyn IdentityStore>,
        room_store: Arc<dyn RoomStore>,
        cancel_token: CancellationToken,
    ) -> Result<(HubHandle, JoinHandle<()>), FanoutError> {
        let presence = match identities.list().await {
            Ok(list) => list
                .into_iter()
                .map(|identity| {
                    (
                        identity.id.clone(),
                        PresenceRecord {
                            id: identity.id,
                            name: identity.name,
                        },
                    )
                })
                .collect(),
            Err(e) => {
                metrics::record_store_failure("identity_list");
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %settings.instance_id,
                    error = %e,
                    "Failed to seed presence from identity store"
                );
                HashMap::new()
            }
        };

        let presence_subscription = bus.subscribe(GLOBAL_CHANNEL).await?;

        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        let handle = HubHandle {
            sender,
            cancel_token: cancel_token.clone(),
        };

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Hub, &settings.instance_id),
            instance_id: settings.instance_id,
            receiver,
            cancel_token,
            bus,
            identities,
            room_store,
            room_retention: settings.room_retention,
            clients: HashMap::new(),
            rooms: HashMap::new(),
            room_names: HashMap::new(),
            presence,
            presence_subscription,
            idle_tx,
            idle_rx,
        };

        let task_handle = tokio::spawn(actor.run());

        Ok((handle, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "fanout.actor.hub", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            presence_seeded = self.presence.len(),
            "HubActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "fanout.actor.hub",
                        instance_id = %self.instance_id,
                        "HubActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                        }
                        None => {
                            info!(
                                target: "fanout.actor.hub",
                                instance_id = %self.instance_id,
                                "HubActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                payload = self.presence_subscription.next() => {
                    match payload {
                        Some(payload) => self.handle_global(&payload).await,
                        None => {
                            warn!(
                                target: "fanout.actor.hub",
                                instance_id = %self.instance_id,
                                "Global channel subscription closed, stopping"
                            );
                            break;
                        }
                    }
                }

                Some(room_id) = self.idle_rx.recv() => {
                    self.evict_if_idle(&room_id).await;
                }
            }
        }

        // Rooms hold child tokens.
        self.cancel_token.cancel();

        info!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            clients_remaining = self.clients.len(),
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "HubActor stopped"
        );
    }

    async fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                connection,
                respond_to,
            } => {
                self.register(connection).await;
                let _ = respond_to.send(());
            }

            HubMessage::Unregister {
                session_id,
                respond_to,
            } => {
                let removed = self.unregister(&session_id).await;
                let _ = respond_to.send(removed);
            }

            HubMessage::Broadcast { envelope } => {
                self.broadcast(&envelope);
            }

            HubMessage::ResolveRoom { name, respond_to } => {
                let room = self.resolve_room(&name).await;
                let _ = respond_to.send(room);
            }

            HubMessage::CreateRoom {
                name,
                private,
                respond_to,
            } => {
                let result = self.create_room(name, private).await;
                let _ = respond_to.send(result);
            }

            HubMessage::FindRoomById {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.find_room_by_id(&room_id));
            }

            HubMessage::JoinRoom {
                name,
                requester,
                inviter,
                respond_to,
            } => {
                let room = self.join_room(name, &requester, inviter).await;
                let _ = respond_to.send(room);
            }

            HubMessage::InvitePrivate {
                requester,
                target_id,
                respond_to,
            } => {
                let room = self.invite_private(&requester, target_id).await;
                let _ = respond_to.send(room);
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            HubMessage::ListPresence { respond_to } => {
                let _ = respond_to.send(self.presence.values().cloned().collect());
            }
        }
    }

    async fn register(&mut self, connection: ConnectionHandle) {
        let identity = Identity {
            id: connection.session_id().to_string(),
            name: connection.display_name().to_string(),
        };

        if let Err(e) = self.identities.create(&identity).await {
            metrics::record_store_failure("identity_create");
            warn!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                session_id = %identity.id,
                error = %e,
                "Failed to persist identity, continuing"
            );
        }

        self.publish_global(&Envelope::user_joined(&identity.id, &identity.name))
            .await;

        self.send_roster(&connection);

        self.clients.insert(identity.id.clone(), connection);
        metrics::set_connections_active(self.clients.len());

        info!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            session_id = %identity.id,
            client_count = self.clients.len(),
            "Session registered"
        );
    }

    /// Queue one `user_joined` per cached identity, as a single payload.
    fn send_roster(&self, connection: &ConnectionHandle) {
        if self.presence.is_empty() {
            return;
        }

        let mut lines = Vec::with_capacity(self.presence.len());
        for record in self.presence.values() {
            match Envelope::user_joined(&record.id, &record.name).encode() {
                Ok(line) => lines.push(line),
                Err(e) => warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    error = %e,
                    "Failed to encode roster entry"
                ),
            }
        }

        if connection.deliver(Arc::from(lines.join("\n"))).is_err() {
            debug!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                session_id = %connection.session_id(),
                "Roster not delivered"
            );
        }
    }

    async fn unregister(&mut self, session_id: &str) -> bool {
        let Some(connection) = self.clients.remove(session_id) else {
            return false;
        };
        metrics::set_connections_active(self.clients.len());

        if let Err(e) = self.identities.delete(session_id).await {
            metrics::record_store_failure("identity_delete");
            warn!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                session_id = %session_id,
                error = %e,
                "Failed to delete identity, continuing"
            );
        }

        self.publish_global(&Envelope::user_left(session_id, connection.display_name()))
            .await;

        info!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            session_id = %session_id,
            client_count = self.clients.len(),
            "Session unregistered"
        );
        true
    }

    fn broadcast(&self, envelope: &Envelope) {
        let payload: Arc<str> = match envelope.encode() {
            Ok(payload) => Arc::from(payload),
            Err(e) => {
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    error = %e,
                    "Failed to encode broadcast"
                );
                return;
            }
        };

        // Sessions that fail here tear themselves down and unregister.
        for connection in self.clients.values() {
            if let Err(e) = connection.deliver(Arc::clone(&payload)) {
                debug!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    session_id = %connection.session_id(),
                    action = envelope.action.as_str(),
                    error = %e,
                    "Broadcast not delivered"
                );
            }
        }
    }

    async fn publish_global(&mut self, envelope: &Envelope) {
        let payload = match envelope.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    error = %e,
                    "Failed to encode global event"
                );
                return;
            }
        };

        if let Err(e) = self.bus.publish(GLOBAL_CHANNEL, payload).await {
            metrics::record_bus_publish_failure(channel_kind(GLOBAL_CHANNEL));
            warn!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                action = envelope.action.as_str(),
                error = %e,
                "Failed to publish global event"
            );
        }
    }

    fn find_room_by_id(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .get(room_id)
            .filter(|managed| managed.is_running())
            .map(|managed| managed.handle.clone())
    }

    fn find_room_by_name(&self, name: &str) -> Option<RoomHandle> {
        self.room_names
            .get(name)
            .and_then(|room_id| self.find_room_by_id(room_id))
    }

    async fn resolve_room(&mut self, name: &str) -> Option<RoomHandle> {
        if let Some(room) = self.find_room_by_name(name) {
            return Some(room);
        }

        let record = match self.room_store.get(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                metrics::record_store_failure("room_get");
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    error = %e,
                    "Room store lookup failed"
                );
                return None;
            }
        };

        match self.start_room(record).await {
            Ok(room) => Some(room),
            Err(e) => {
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    error = %e,
                    "Failed to start stored room"
                );
                None
            }
        }
    }

    async fn create_room(&mut self, name: String, private: bool) -> Result<RoomHandle, FanoutError> {
        if let Some(room) = self.find_room_by_name(&name) {
            return Ok(room);
        }

        let record = RoomRecord {
            id: Uuid::new_v4().to_string(),
            name,
            private,
        };

        if let Err(e) = self.room_store.create(&record).await {
            metrics::record_store_failure("room_create");
            warn!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                room_id = %record.id,
                error = %e,
                "Failed to persist room, continuing"
            );
        }

        self.start_room(record).await
    }

    async fn start_room(&mut self, record: RoomRecord) -> Result<RoomHandle, FanoutError> {
        let room_id = record.id.clone();
        let name = record.name.clone();

        let (handle, task_handle) = RoomActor::start(
            record,
            Arc::clone(&self.bus),
            self.cancel_token.child_token(),
            self.room_retention,
            self.idle_tx.clone(),
        )
        .await?;

        self.room_names.insert(name, room_id.clone());
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                started_at: Utc::now(),
            },
        );
        metrics::set_rooms_active(self.rooms.len());

        info!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            room_id = %room_id,
            private = handle.is_private(),
            room_count = self.rooms.len(),
            "Room started"
        );

        Ok(handle)
    }

    async fn join_room(
        &mut self,
        name: String,
        requester: &ConnectionHandle,
        inviter: Option<String>,
    ) -> Option<RoomHandle> {
        let room = match self.resolve_room(&name).await {
            Some(room) => room,
            None => match self.create_room(name, inviter.is_some()).await {
                Ok(room) => room,
                Err(e) => {
                    warn!(
                        target: "fanout.actor.hub",
                        instance_id = %self.instance_id,
                        error = %e,
                        "Failed to create room"
                    );
                    return None;
                }
            },
        };

        if room.is_private() && inviter.is_none() {
            info!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                room_id = %room.room_id(),
                session_id = %requester.session_id(),
                "Refused private room join without inviter"
            );
            return None;
        }

        match room.register(requester.clone()).await {
            Ok(true) => {
                requester.notify_joined(room.clone(), inviter);
                Some(room)
            }
            Ok(false) => Some(room),
            Err(e) => {
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    room_id = %room.room_id(),
                    error = %e,
                    "Room unavailable, dropping it"
                );
                self.remove_room(room.room_id());
                None
            }
        }
    }

    async fn invite_private(
        &mut self,
        requester: &ConnectionHandle,
        target_id: String,
    ) -> Option<RoomHandle> {
        let name = private_room_name(&target_id, requester.session_id());
        let room = self
            .join_room(name, requester, Some(target_id.clone()))
            .await?;

        self.publish_global(&Envelope::private_invite(
            &target_id,
            room.room_id(),
            requester.session_id(),
        ))
        .await;

        debug!(
            target: "fanout.actor.hub",
            instance_id = %self.instance_id,
            room_id = %room.room_id(),
            session_id = %requester.session_id(),
            "Private invitation published"
        );

        Some(room)
    }

    /// Consume one global channel payload.
    async fn handle_global(&mut self, payload: &[u8]) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    len = payload.len(),
                    error = %e,
                    "Dropping malformed global event"
                );
                return;
            }
        };

        match envelope.action {
            Action::UserJoined => self.handle_user_joined(envelope).await,
            Action::UserLeft => {
                self.presence.remove(&envelope.sender);
                self.broadcast(&envelope);
            }
            Action::JoinRoomPrivate => self.handle_private_invite(&envelope).await,
            other => debug!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                action = other.as_str(),
                "Ignoring global event"
            ),
        }
    }

    async fn handle_user_joined(&mut self, envelope: Envelope) {
        let name = if envelope.content.is_empty() {
            match self.identities.get(&envelope.sender).await {
                Ok(Some(identity)) => identity.name,
                Ok(None) => String::new(),
                Err(e) => {
                    metrics::record_store_failure("identity_get");
                    warn!(
                        target: "fanout.actor.hub",
                        instance_id = %self.instance_id,
                        error = %e,
                        "Identity lookup failed"
                    );
                    String::new()
                }
            }
        } else {
            envelope.content.clone()
        };

        self.presence.insert(
            envelope.sender.clone(),
            PresenceRecord {
                id: envelope.sender.clone(),
                name: name.clone(),
            },
        );

        self.broadcast(&Envelope::user_joined(&envelope.sender, &name));
    }

    /// Complete an invitation for a target hosted here. Others ignore it.
    async fn handle_private_invite(&mut self, envelope: &Envelope) {
        let target_id = &envelope.content;
        let inviter_id = &envelope.sender;

        let Some(target) = self.clients.get(target_id).cloned() else {
            return;
        };

        let name = match self.find_room_by_id(&envelope.target) {
            Some(room) => room.name().to_string(),
            None => private_room_name(target_id, inviter_id),
        };

        if self
            .join_room(name, &target, Some(inviter_id.clone()))
            .await
            .is_some()
        {
            debug!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                session_id = %target_id,
                "Completed private invitation"
            );
        }
    }

    async fn evict_if_idle(&mut self, room_id: &str) {
        let Some(managed) = self.rooms.get(room_id) else {
            return;
        };

        // Membership may have changed since the room reported.
        match managed.handle.get_state().await {
            Ok(state) if !state.members.is_empty() => return,
            Ok(_) | Err(_) => {}
        }

        if let Some(managed) = self.remove_room(room_id) {
            info!(
                target: "fanout.actor.hub",
                instance_id = %self.instance_id,
                room_id = %room_id,
                lifetime_secs = (Utc::now() - managed.started_at).num_seconds(),
                "Evicted idle room"
            );
        }
    }

    fn remove_room(&mut self, room_id: &str) -> Option<ManagedRoom> {
        let managed = self.rooms.remove(room_id)?;
        managed.handle.cancel();
        if self.room_names.get(managed.handle.name()).map(String::as_str) == Some(room_id) {
            self.room_names.remove(managed.handle.name());
        }
        metrics::set_rooms_active(self.rooms.len());
        Some(managed)
    }

    fn get_status(&self) -> HubStatus {
        HubStatus {
            instance_id: self.instance_id.clone(),
            client_count: self.clients.len(),
            room_count: self.rooms.len(),
            presence_count: self.presence.len(),
            messages_processed: self.mailbox.messages_processed(),
            peak_mailbox_depth: self.mailbox.peak_depth(),
        }
    }

    /// Drop rooms whose task has ended.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.remove_room(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => info!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    room_id = %room_id,
                    "Room actor exited"
                ),
                Err(join_error) if join_error.is_panic() => error!(
                    target: "fanout.actor.hub",
                    instance_id = %self.instance_id,
                    room_id = %room_id,
                    error = ?join_error,
                    "Room actor panicked"
                ),
                Err(_) => {}
            }
        }
    }
}
