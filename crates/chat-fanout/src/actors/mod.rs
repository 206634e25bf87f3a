//! Actor model implementation for the fanout core.
//!
//! ```text
//! HubActor (singleton per instance)
//! ├── registry of N ConnectionActors (by session id)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per running room)
//! │       ├── local member set
//! │       └── subscription to the room's bus channel
//! └── subscription to the global bus channel (presence, invitations)
//!
//! ConnectionActor (one per client socket)
//! ├── read task: inbound frames, control messages, keepalive deadline
//! └── write task: outbound mailbox, coalescing, pings
//! ```
//!
//! # Key Design Decisions
//!
//! - **Bus round-trip delivery**: rooms never write relayed messages to
//!   mailboxes directly; every instance fans out what it receives on the
//!   room channel
//! - **No waiting downward**: hubs and rooms deliver to connections with
//!   `try_send`; a full mailbox disconnects the slow consumer
//! - **CancellationToken propagation**: rooms hold child tokens of the hub's
//! - **Message passing**: registries are actor state, read via request and
//!   response messages only
//!
//! # Modules
//!
//! - [`hub`] - `HubActor` registry and global channel consumer
//! - [`room`] - `RoomActor` per running room
//! - [`connection`] - `ConnectionActor` per client socket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring

pub mod connection;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionHandle, ConnectionSettings, DeliveryError};
pub use hub::{HubActor, HubHandle, HubSettings};
pub use messages::*;
pub use metrics::{ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomHandle, RoomRetention};
