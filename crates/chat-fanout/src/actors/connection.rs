//! `ConnectionActor` - one per client socket.
//!
//! Each `ConnectionActor`:
//! - Registers its session with the `HubActor` on start
//! - Decodes inbound frames into [`ClientEvent`]s and dispatches them
//! - Owns the session's bounded outbound mailbox and the task that drains
//!   it to the transport
//! - Tracks the rooms it has joined
//!
//! # Tasks
//!
//! The actor runs two tasks coupled by the outbound mailbox and the
//! connection's `CancellationToken`:
//!
//! - **read** (the actor itself): inbound frames, control messages from the
//!   hub, and the keepalive deadline
//! - **write**: drains the mailbox, coalescing everything queued at flush
//!   time into one newline-separated text frame, and pings on a timer
//!
//! # Teardown
//!
//! Every disconnect trigger (peer close, transport error, keepalive
//! timeout, protocol error, mailbox overflow, [`ConnectionHandle::cancel`],
//! [`ConnectionHandle::disconnect`]) only cancels the token. Teardown runs
//! once, after both tasks have stopped: unregister from the hub, unregister
//! from every joined room, close the mailbox, close the transport.

use crate::errors::FanoutError;
use crate::observability::metrics;
use crate::protocol::{ClientEvent, Envelope};
use crate::transport::{Frame, FrameSink, FrameStream, Transport};

use super::hub::HubHandle;
use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};
use super::room::RoomHandle;

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default outbound mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default time allowed for one transport write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default time allowed between pongs.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default ping interval (9/10 of the pong wait).
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10_000;

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Outbound mailbox capacity. A delivery to a full mailbox disconnects
    /// the session.
    pub mailbox_capacity: usize,
    /// Time allowed for one transport write.
    pub write_wait: Duration,
    /// Time allowed between pongs before the connection is considered dead.
    pub pong_wait: Duration,
    /// Ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Why a delivery to a session's mailbox failed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The mailbox was full; the session is being disconnected.
    #[error("outbound mailbox full")]
    Overflow,
    /// The session is gone.
    #[error("connection closed")]
    Closed,
    /// The envelope could not be serialized.
    #[error("envelope encoding failed")]
    Encode,
}

/// Handle to a `ConnectionActor`.
///
/// Held by the hub registry and by every room the session joined. Cloning
/// is cheap.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    session_id: Arc<str>,
    display_name: Arc<str>,
    outbound: mpsc::Sender<Arc<str>>,
    control: mpsc::UnboundedSender<ConnectionMessage>,
    cancel_token: CancellationToken,
}

impl ConnectionHandle {
    /// Session identifier (also the identity id).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Queue a serialized payload without waiting.
    ///
    /// A full mailbox cancels the connection (fail-fast disconnect of the
    /// slow consumer) and returns [`DeliveryError::Overflow`].
    pub fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.cancel_token.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        match self.outbound.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::record_mailbox_overflow();
                warn!(
                    target: "fanout.actor.connection",
                    session_id = %self.session_id,
                    capacity = self.outbound.max_capacity(),
                    "Outbound mailbox full, disconnecting slow consumer"
                );
                self.cancel_token.cancel();
                Err(DeliveryError::Overflow)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Serialize and queue one envelope.
    pub fn deliver_envelope(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let payload = envelope.encode().map_err(|_| DeliveryError::Encode)?;
        self.deliver(Arc::from(payload))
    }

    /// Tell the actor a room registered it. Never waits.
    pub fn notify_joined(&self, room: RoomHandle, inviter: Option<String>) -> bool {
        self.control
            .send(ConnectionMessage::Joined { room, inviter })
            .is_ok()
    }

    /// Ask the actor to close the connection.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let sent = self
            .control
            .send(ConnectionMessage::Disconnect {
                reason: reason.into(),
            })
            .is_ok();
        if !sent {
            self.cancel_token.cancel();
        }
    }

    /// Close the connection immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A handle with no actor behind it.
    ///
    /// Returns the outbound mailbox receiver; control messages are
    /// discarded. Used by tests that exercise hubs and rooms directly.
    #[must_use]
    pub fn detached(
        session_id: &str,
        display_name: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (handle, outbound_rx, _control_rx) =
            Self::detached_with_control(session_id, display_name, capacity);
        (handle, outbound_rx)
    }

    /// Like [`ConnectionHandle::detached`], also returning the control receiver.
    #[must_use]
    pub fn detached_with_control(
        session_id: &str,
        display_name: &str,
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Arc<str>>,
        mpsc::UnboundedReceiver<ConnectionMessage>,
    ) {
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let handle = Self {
            session_id: Arc::from(session_id),
            display_name: Arc::from(display_name),
            outbound,
            control,
            cancel_token: CancellationToken::new(),
        };
        (handle, outbound_rx, control_rx)
    }
}

/// The `ConnectionActor` implementation (read side).
pub struct ConnectionActor {
    /// This session's handle, passed to the hub as the requester.
    handle: ConnectionHandle,
    /// Control messages from the hub.
    control_rx: mpsc::UnboundedReceiver<ConnectionMessage>,
    /// Hub for registration and room resolution.
    hub: HubHandle,
    /// Rooms joined, by room id.
    joined: HashMap<String, RoomHandle>,
    /// Limits and timers.
    settings: ConnectionSettings,
    /// Close-once gate.
    cancel_token: CancellationToken,
}

impl ConnectionActor {
    /// Spawn the actor for an accepted transport.
    ///
    /// `cancel_token` should be a child of the process root token.
    pub fn spawn(
        session_id: String,
        display_name: String,
        transport: Transport,
        hub: HubHandle,
        settings: ConnectionSettings,
        cancel_token: CancellationToken,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (outbound, outbound_rx) = mpsc::channel(settings.mailbox_capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();

        let handle = ConnectionHandle {
            session_id: Arc::from(session_id),
            display_name: Arc::from(display_name),
            outbound,
            control,
            cancel_token: cancel_token.clone(),
        };

        let actor = Self {
            handle: handle.clone(),
            control_rx,
            hub,
            joined: HashMap::new(),
            settings,
            cancel_token,
        };

        let task_handle = tokio::spawn(actor.run(transport, outbound_rx));

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "fanout.actor.connection",
        fields(session_id = %self.handle.session_id)
    )]
    async fn run(mut self, transport: Transport, outbound_rx: mpsc::Receiver<Arc<str>>) {
        let Transport { sink, stream } = transport;

        info!(
            target: "fanout.actor.connection",
            session_id = %self.handle.session_id,
            "ConnectionActor started"
        );

        // The writer starts first so the roster queued at registration drains
        // while the hub is still working.
        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            self.cancel_token.clone(),
            self.settings.clone(),
            Arc::clone(&self.handle.session_id),
        ));

        match self.hub.register(self.handle.clone()).await {
            Ok(()) => self.read_loop(stream).await,
            Err(e) => {
                warn!(
                    target: "fanout.actor.connection",
                    session_id = %self.handle.session_id,
                    error = %e,
                    "Hub registration failed, closing connection"
                );
            }
        }

        self.cancel_token.cancel();
        if let Err(e) = writer.await {
            warn!(
                target: "fanout.actor.connection",
                session_id = %self.handle.session_id,
                error = %e,
                "Write task failed"
            );
        }

        self.teardown().await;

        info!(
            target: "fanout.actor.connection",
            session_id = %self.handle.session_id,
            "ConnectionActor stopped"
        );
    }

    async fn read_loop(&mut self, mut stream: FrameStream) {
        let mut keepalive_deadline = Instant::now() + self.settings.pong_wait;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "fanout.actor.connection",
                        session_id = %self.handle.session_id,
                        "Connection cancelled"
                    );
                    break;
                }

                Some(message) = self.control_rx.recv() => {
                    if !self.handle_control(message) {
                        break;
                    }
                }

                () = tokio::time::sleep_until(keepalive_deadline) => {
                    info!(
                        target: "fanout.actor.connection",
                        session_id = %self.handle.session_id,
                        pong_wait_secs = self.settings.pong_wait.as_secs(),
                        "No pong within keepalive window, closing connection"
                    );
                    break;
                }

                frame = stream.next() => {
                    match frame {
                        None | Some(Ok(Frame::Close)) => {
                            debug!(
                                target: "fanout.actor.connection",
                                session_id = %self.handle.session_id,
                                "Connection closed by peer"
                            );
                            break;
                        }
                        Some(Err(e)) => {
                            info!(
                                target: "fanout.actor.connection",
                                session_id = %self.handle.session_id,
                                error = %e,
                                "Transport read failed"
                            );
                            break;
                        }
                        Some(Ok(Frame::Pong)) => {
                            keepalive_deadline = Instant::now() + self.settings.pong_wait;
                        }
                        Some(Ok(Frame::Ping)) => {}
                        Some(Ok(frame)) => {
                            if frame.len() > self.settings.max_message_size {
                                warn!(
                                    target: "fanout.actor.connection",
                                    session_id = %self.handle.session_id,
                                    len = frame.len(),
                                    limit = self.settings.max_message_size,
                                    "Inbound frame exceeds size limit, closing connection"
                                );
                                break;
                            }
                            match frame {
                                Frame::Text(text) => self.handle_payload(text.as_bytes()).await,
                                Frame::Binary(data) => self.handle_payload(&data).await,
                                Frame::Ping | Frame::Pong | Frame::Close => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns `false` when the connection should close.
    fn handle_control(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Joined { room, inviter } => {
                let confirmation =
                    Envelope::room_joined(room.room_id(), room.name(), inviter.as_deref());
                debug!(
                    target: "fanout.actor.connection",
                    session_id = %self.handle.session_id,
                    room_id = %room.room_id(),
                    "Joined room"
                );
                self.joined.insert(room.room_id().to_string(), room);
                // Overflow has already cancelled the connection.
                let _ = self.handle.deliver_envelope(&confirmation);
                true
            }
            ConnectionMessage::Disconnect { reason } => {
                info!(
                    target: "fanout.actor.connection",
                    session_id = %self.handle.session_id,
                    reason = %reason,
                    "Disconnect requested"
                );
                false
            }
        }
    }

    async fn handle_payload(&mut self, payload: &[u8]) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_envelope_dropped("malformed");
                warn!(
                    target: "fanout.actor.connection",
                    session_id = %self.handle.session_id,
                    len = payload.len(),
                    error = %e,
                    "Dropping malformed envelope"
                );
                return;
            }
        };

        match ClientEvent::try_from(envelope) {
            Ok(event) => self.dispatch(event).await,
            Err(action) => {
                metrics::record_envelope_dropped("server_only");
                debug!(
                    target: "fanout.actor.connection",
                    session_id = %self.handle.session_id,
                    action = action.as_str(),
                    "Ignoring server-only action from client"
                );
            }
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) {
        let result = match event {
            ClientEvent::SendMessage { room_id, content } => {
                self.send_message(&room_id, content).await
            }
            ClientEvent::JoinRoom { name } => self.join_room(name).await,
            ClientEvent::LeaveRoom { room_id } => self.leave_room(&room_id).await,
            ClientEvent::JoinRoomPrivate { target_id } => self.join_room_private(target_id).await,
        };

        if let Err(e) = result {
            warn!(
                target: "fanout.actor.connection",
                session_id = %self.handle.session_id,
                error = %e,
                "Client request failed"
            );
        }
    }

    async fn send_message(&mut self, room_id: &str, content: String) -> Result<(), FanoutError> {
        let Some(room) = self.hub.find_room_by_id(room_id).await? else {
            metrics::record_envelope_dropped("unknown_room");
            debug!(
                target: "fanout.actor.connection",
                session_id = %self.handle.session_id,
                room_id = %room_id,
                "Message for a room not running on this instance"
            );
            return Ok(());
        };

        // The sender is always this session, whatever the client claimed.
        let envelope = Envelope::send_message(room.room_id(), content, self.handle.session_id());
        room.relay(envelope).await
    }

    async fn join_room(&mut self, name: String) -> Result<(), FanoutError> {
        if name.is_empty() {
            metrics::record_envelope_dropped("malformed");
            return Ok(());
        }

        if self
            .hub
            .join_room(name, self.handle.clone(), None)
            .await?
            .is_none()
        {
            debug!(
                target: "fanout.actor.connection",
                session_id = %self.handle.session_id,
                "Join refused"
            );
        }
        Ok(())
    }

    async fn leave_room(&mut self, room_id: &str) -> Result<(), FanoutError> {
        let room = match self.joined.remove(room_id) {
            Some(room) => Some(room),
            None => self.hub.find_room_by_id(room_id).await?,
        };

        if let Some(room) = room {
            room.unregister(self.handle.session_id()).await?;
            debug!(
                target: "fanout.actor.connection",
                session_id = %self.handle.session_id,
                room_id = %room_id,
                "Left room"
            );
        }
        Ok(())
    }

    async fn join_room_private(&mut self, target_id: String) -> Result<(), FanoutError> {
        if target_id.is_empty() {
            metrics::record_envelope_dropped("malformed");
            return Ok(());
        }

        self.hub
            .invite_private(self.handle.clone(), target_id)
            .await?;
        Ok(())
    }

    async fn teardown(&mut self) {
        // Joins that completed after the read loop stopped still need undoing.
        while let Ok(message) = self.control_rx.try_recv() {
            if let ConnectionMessage::Joined { room, .. } = message {
                self.joined.insert(room.room_id().to_string(), room);
            }
        }

        let session_id = self.handle.session_id();

        if let Err(e) = self.hub.unregister(session_id).await {
            warn!(
                target: "fanout.actor.connection",
                session_id = %session_id,
                error = %e,
                "Hub unregister failed"
            );
        }

        for (room_id, room) in self.joined.drain() {
            if let Err(e) = room.unregister(session_id).await {
                // An evicted or stopped room has nothing left to undo.
                if !e.is_channel_closed() {
                    warn!(
                        target: "fanout.actor.connection",
                        session_id = %session_id,
                        room_id = %room_id,
                        error = %e,
                        "Room unregister failed"
                    );
                }
            }
        }
    }
}

/// Drain the outbound mailbox to the transport and keep the peer pinged.
///
/// Exits when the connection is cancelled or a write fails (cancelling the
/// connection itself in that case), then flushes what is still queued and
/// closes the transport.
async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Arc<str>>,
    cancel_token: CancellationToken,
    settings: ConnectionSettings,
    session_id: Arc<str>,
) {
    let mut mailbox = MailboxMonitor::new(ActorType::Connection, session_id.as_ref());
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_period,
        settings.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut healthy = true;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            payload = outbound.recv() => {
                let Some(first) = payload else { break };
                let frame = coalesce(&first, &mut outbound);
                mailbox.record_processed(outbound.len());
                if let Err(e) = write_frame(&mut sink, Frame::Text(frame), settings.write_wait).await {
                    debug!(
                        target: "fanout.actor.connection",
                        session_id = %session_id,
                        error = %e,
                        "Transport write failed"
                    );
                    healthy = false;
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping, settings.write_wait).await {
                    debug!(
                        target: "fanout.actor.connection",
                        session_id = %session_id,
                        error = %e,
                        "Ping write failed"
                    );
                    healthy = false;
                    break;
                }
            }
        }
    }

    cancel_token.cancel();
    outbound.close();

    if healthy {
        let mut remaining = Vec::new();
        while let Ok(payload) = outbound.try_recv() {
            remaining.push(payload);
        }
        if !remaining.is_empty() {
            let frame = remaining
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<&str>>()
                .join("\n");
            let _ = write_frame(&mut sink, Frame::Text(frame), settings.write_wait).await;
        }
        let _ = write_frame(&mut sink, Frame::Close, settings.write_wait).await;
    }

    let _ = tokio::time::timeout(settings.write_wait, sink.close()).await;
}

/// Join `first` and everything else already queued with newlines.
fn coalesce(first: &str, outbound: &mut mpsc::Receiver<Arc<str>>) -> String {
    let mut frame = String::from(first);
    while let Ok(next) = outbound.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}

async fn write_frame(
    sink: &mut FrameSink,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), FanoutError> {
    match tokio::time::timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FanoutError::Transport(e.to_string())),
        Err(_) => Err(FanoutError::Transport("write timed out".to_string())),
    }
}
