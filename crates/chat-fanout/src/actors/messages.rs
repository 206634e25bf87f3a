//! Message types for actor mailboxes.
//!
//! Request/response messages carry a `respond_to` oneshot. Fire-and-forget
//! messages (relay, broadcast, control) carry none.

use crate::errors::FanoutError;
use crate::protocol::Envelope;

use super::connection::ConnectionHandle;
use super::room::RoomHandle;

use tokio::sync::oneshot;

// ============================================================================
// Hub Messages
// ============================================================================

/// Messages sent to the `HubActor`.
#[derive(Debug)]
pub enum HubMessage {
    /// Register a newly connected session.
    Register {
        /// Handle to the session's connection actor.
        connection: ConnectionHandle,
        /// Completes once the roster is queued and the session is registered.
        respond_to: oneshot::Sender<()>,
    },

    /// Unregister a session. Absent sessions are a no-op.
    Unregister {
        /// Session to remove.
        session_id: String,
        /// `true` if the session was registered.
        respond_to: oneshot::Sender<bool>,
    },

    /// Deliver an envelope to every locally registered session.
    Broadcast {
        /// Envelope to deliver.
        envelope: Envelope,
    },

    /// Find a room by name, locally or in the room store.
    ResolveRoom {
        /// Room name.
        name: String,
        /// The room handle, if the room exists.
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// Create and start a new room.
    CreateRoom {
        /// Room name.
        name: String,
        /// Whether the room is private.
        private: bool,
        /// Handle to the started room.
        respond_to: oneshot::Sender<Result<RoomHandle, FanoutError>>,
    },

    /// Find a room running on this instance by id.
    FindRoomById {
        /// Room identifier.
        room_id: String,
        /// The room handle, if running here.
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// Resolve or create a room and register the requester with it.
    JoinRoom {
        /// Room name.
        name: String,
        /// Session joining the room.
        requester: ConnectionHandle,
        /// Inviting identity. Required for private rooms.
        inviter: Option<String>,
        /// The room handle, or `None` if the join was refused.
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// Open a private room between the requester and `target_id`.
    InvitePrivate {
        /// Session sending the invitation.
        requester: ConnectionHandle,
        /// Identity being invited.
        target_id: String,
        /// The private room handle, if it could be started.
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// Get the hub's current status.
    GetStatus {
        /// Current status.
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Get the cached presence roster.
    ListPresence {
        /// One record per online identity.
        respond_to: oneshot::Sender<Vec<PresenceRecord>>,
    },
}

/// Hub status snapshot.
#[derive(Debug, Clone)]
pub struct HubStatus {
    /// Instance ID.
    pub instance_id: String,
    /// Sessions registered on this instance.
    pub client_count: usize,
    /// Rooms running on this instance.
    pub room_count: usize,
    /// Identities in the presence cache (all instances).
    pub presence_count: usize,
    /// Messages processed since start.
    pub messages_processed: u64,
    /// Highest mailbox depth observed.
    pub peak_mailbox_depth: usize,
}

/// One online identity in the presence cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceRecord {
    /// Identity identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

// ============================================================================
// Room Messages
// ============================================================================

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a session to the room.
    Register {
        /// Session joining.
        connection: ConnectionHandle,
        /// `true` if newly added, `false` if already a member.
        respond_to: oneshot::Sender<bool>,
    },

    /// Remove a session from the room's local membership.
    Unregister {
        /// Session leaving.
        session_id: String,
        /// `true` if the session was a member.
        respond_to: oneshot::Sender<bool>,
    },

    /// Publish an envelope on the room's bus channel.
    Relay {
        /// Envelope to publish.
        envelope: Envelope,
    },

    /// Get the room's current state.
    GetState {
        /// Current state.
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Room state snapshot.
#[derive(Debug, Clone)]
pub struct RoomState {
    /// Room identifier.
    pub room_id: String,
    /// Room name.
    pub name: String,
    /// Whether the room is private.
    pub private: bool,
    /// Session ids of local members.
    pub members: Vec<String>,
}

// ============================================================================
// Connection Messages
// ============================================================================

/// Control messages sent to a `ConnectionActor`.
///
/// Sent over an unbounded channel so the hub never waits on a connection.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// A room registered this session.
    Joined {
        /// The room joined.
        room: RoomHandle,
        /// Inviter identity for private rooms.
        inviter: Option<String>,
    },

    /// Close the connection.
    Disconnect {
        /// Reason for logging.
        reason: String,
    },
}
