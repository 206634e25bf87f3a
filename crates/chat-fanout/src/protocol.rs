//! Wire protocol for client and bus traffic.
//!
//! Every message on a client socket and on the bus is one JSON
//! [`Envelope`]:
//!
//! ```text
//! {"action": "send_message", "content": "hi", "target": "<room id>", "sender": "<identity id>"}
//! ```
//!
//! All fields except `action` default to empty. The action set is closed:
//! payloads naming an unknown action fail to decode and are dropped at the
//! ingress boundary.
//!
//! Client input is narrowed once into a [`ClientEvent`] so the connection
//! dispatch is an exhaustive match instead of string comparison.

use crate::errors::FanoutError;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Envelope action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Chat text for a room (client to server, and room fanout).
    #[serde(rename = "send_message")]
    SendMessage,
    /// Join a room by name.
    #[serde(rename = "join_room")]
    JoinRoom,
    /// Leave a room by id.
    #[serde(rename = "leave_room")]
    LeaveRoom,
    /// Open a private room with another identity; also the hub-to-hub invitation.
    #[serde(rename = "join_room_private")]
    JoinRoomPrivate,
    /// Presence: an identity came online.
    #[serde(rename = "user_joined")]
    UserJoined,
    /// Presence: an identity went offline.
    #[serde(rename = "user_left")]
    UserLeft,
    /// Confirmation that the session is now a member of a room.
    #[serde(rename = "room-joined")]
    RoomJoined,
}

impl Action {
    /// Returns the wire string for this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::SendMessage => "send_message",
            Action::JoinRoom => "join_room",
            Action::LeaveRoom => "leave_room",
            Action::JoinRoomPrivate => "join_room_private",
            Action::UserJoined => "user_joined",
            Action::UserLeft => "user_left",
            Action::RoomJoined => "room-joined",
        }
    }
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    #[serde(default)]
    pub content: String,
    /// Room identifier.
    #[serde(default)]
    pub target: String,
    /// Identity identifier of the originator.
    #[serde(default)]
    pub sender: String,
}

impl Envelope {
    /// Chat text relayed through a room.
    #[must_use]
    pub fn send_message(
        room_id: impl Into<String>,
        content: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            action: Action::SendMessage,
            content: content.into(),
            target: room_id.into(),
            sender: sender.into(),
        }
    }

    /// Notice sent to existing members of a public room when someone joins.
    #[must_use]
    pub fn join_notice(room_id: &str, display_name: &str, sender: &str) -> Self {
        Self::send_message(room_id, format!("{display_name} joined the room"), sender)
    }

    /// Presence event for an identity coming online.
    #[must_use]
    pub fn user_joined(identity_id: &str, display_name: &str) -> Self {
        Self {
            action: Action::UserJoined,
            content: display_name.to_string(),
            target: String::new(),
            sender: identity_id.to_string(),
        }
    }

    /// Presence event for an identity going offline.
    #[must_use]
    pub fn user_left(identity_id: &str, display_name: &str) -> Self {
        Self {
            action: Action::UserLeft,
            content: display_name.to_string(),
            target: String::new(),
            sender: identity_id.to_string(),
        }
    }

    /// Confirmation queued to a session after a room registered it.
    ///
    /// `sender` is the inviter for private rooms and empty otherwise.
    #[must_use]
    pub fn room_joined(room_id: &str, room_name: &str, sender: Option<&str>) -> Self {
        Self {
            action: Action::RoomJoined,
            content: room_name.to_string(),
            target: room_id.to_string(),
            sender: sender.unwrap_or_default().to_string(),
        }
    }

    /// Private-room invitation published on the global channel.
    #[must_use]
    pub fn private_invite(target_id: &str, room_id: &str, inviter_id: &str) -> Self {
        Self {
            action: Action::JoinRoomPrivate,
            content: target_id.to_string(),
            target: room_id.to_string(),
            sender: inviter_id.to_string(),
        }
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> Result<String, FanoutError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to JSON bytes for the bus.
    pub fn to_bytes(&self) -> Result<Bytes, FanoutError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode one JSON envelope.
    pub fn decode(payload: &[u8]) -> Result<Self, FanoutError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Private room name for `requester` inviting `target`.
///
/// Order-dependent: target id first, requester id second.
#[must_use]
pub fn private_room_name(target_id: &str, requester_id: &str) -> String {
    format!("{target_id}{requester_id}")
}

/// A client request, decoded once at ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Relay `content` to the room with id `room_id`.
    SendMessage { room_id: String, content: String },
    /// Join (or create) the public room named `name`.
    JoinRoom { name: String },
    /// Leave the room with id `room_id`.
    LeaveRoom { room_id: String },
    /// Open a private room with identity `target_id`.
    JoinRoomPrivate { target_id: String },
}

impl TryFrom<Envelope> for ClientEvent {
    /// Server-only actions are returned as the error value.
    type Error = Action;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.action {
            Action::SendMessage => Ok(ClientEvent::SendMessage {
                room_id: envelope.target,
                content: envelope.content,
            }),
            Action::JoinRoom => Ok(ClientEvent::JoinRoom {
                name: envelope.content,
            }),
            Action::LeaveRoom => Ok(ClientEvent::LeaveRoom {
                room_id: envelope.content,
            }),
            Action::JoinRoomPrivate => Ok(ClientEvent::JoinRoomPrivate {
                target_id: envelope.content,
            }),
            other @ (Action::UserJoined | Action::UserLeft | Action::RoomJoined) => Err(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_strings() {
        let actions = [
            Action::SendMessage,
            Action::JoinRoom,
            Action::LeaveRoom,
            Action::JoinRoomPrivate,
            Action::UserJoined,
            Action::UserLeft,
            Action::RoomJoined,
        ];
        for action in actions {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn test_decode_with_missing_fields_defaults_to_empty() {
        let envelope = Envelope::decode(br#"{"action":"join_room","content":"lobby"}"#).unwrap();
        assert_eq!(envelope.action, Action::JoinRoom);
        assert_eq!(envelope.content, "lobby");
        assert!(envelope.target.is_empty());
        assert!(envelope.sender.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_action() {
        let result = Envelope::decode(br#"{"action":"delete_everything"}"#);
        assert!(matches!(result, Err(FanoutError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(Envelope::decode(b"not json at all").is_err());
        assert!(Envelope::decode(br#"{"content":"no action"}"#).is_err());
    }

    #[test]
    fn test_room_joined_sender_empty_without_inviter() {
        let public = Envelope::room_joined("room-1", "lobby", None);
        assert_eq!(public.action, Action::RoomJoined);
        assert_eq!(public.target, "room-1");
        assert_eq!(public.content, "lobby");
        assert_eq!(public.sender, "");

        let private = Envelope::room_joined("room-2", "u2u1", Some("u2"));
        assert_eq!(private.sender, "u2");
    }

    #[test]
    fn test_join_notice_content() {
        let notice = Envelope::join_notice("room-1", "bob", "bob-id");
        assert_eq!(notice.action, Action::SendMessage);
        assert_eq!(notice.content, "bob joined the room");
        assert_eq!(notice.target, "room-1");
        assert_eq!(notice.sender, "bob-id");
    }

    #[test]
    fn test_private_room_name_is_order_dependent() {
        assert_eq!(private_room_name("U2", "U1"), "U2U1");
        assert_ne!(private_room_name("U2", "U1"), private_room_name("U1", "U2"));
    }

    #[test]
    fn test_client_event_field_mapping() {
        let send = Envelope::send_message("room-1", "hello", "ignored");
        assert_eq!(
            ClientEvent::try_from(send).unwrap(),
            ClientEvent::SendMessage {
                room_id: "room-1".to_string(),
                content: "hello".to_string(),
            }
        );

        let leave = Envelope::decode(br#"{"action":"leave_room","content":"room-9"}"#).unwrap();
        assert_eq!(
            ClientEvent::try_from(leave).unwrap(),
            ClientEvent::LeaveRoom {
                room_id: "room-9".to_string()
            }
        );

        let private =
            Envelope::decode(br#"{"action":"join_room_private","content":"U2"}"#).unwrap();
        assert_eq!(
            ClientEvent::try_from(private).unwrap(),
            ClientEvent::JoinRoomPrivate {
                target_id: "U2".to_string()
            }
        );
    }

    #[test]
    fn test_client_event_rejects_server_only_actions() {
        let presence = Envelope::user_joined("u1", "alice");
        assert_eq!(ClientEvent::try_from(presence), Err(Action::UserJoined));

        let joined = Envelope::room_joined("r", "n", None);
        assert_eq!(ClientEvent::try_from(joined), Err(Action::RoomJoined));
    }
}
