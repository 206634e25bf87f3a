//! Chat Fanout Service Library
//!
//! Real-time fanout core for a multi-room chat service:
//!
//! - Routes messages between concurrently connected clients
//! - Manages dynamic room membership (public and private rooms)
//! - Keeps presence and room traffic consistent across horizontally scaled
//!   instances through an external publish/subscribe bus
//!
//! # Architecture
//!
//! ```text
//! HubActor (singleton per instance)
//! ├── registry of ConnectionActors
//! ├── supervises N RoomActors (one per running room)
//! └── global bus channel (presence, private invitations)
//!
//! RoomActor ──publish──▶ bus channel room:<name> ──▶ every instance's RoomActor
//!                                                    └── fan out to local members
//! ```
//!
//! Delivery to room members only happens on the bus round-trip, so a
//! message relayed on one instance reaches members connected to any
//! instance (the sender included).
//!
//! # Modules
//!
//! - [`actors`] - Hub, room and connection actors
//! - [`bus`] - Distributed bus trait with Redis and in-process implementations
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics and health endpoints
//! - [`protocol`] - Wire envelope and client events
//! - [`routes`] - WebSocket ingress router
//! - [`store`] - Identity and room stores
//! - [`transport`] - Frame-level transport abstraction

pub mod actors;
pub mod bus;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod store;
pub mod transport;
