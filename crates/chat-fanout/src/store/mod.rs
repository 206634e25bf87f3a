//! Keyed stores for identities and rooms.
//!
//! The fanout core treats durable storage as a simple keyed collaborator.
//! Writes must tolerate races and repetition: `create` overwrites,
//! `delete` of an absent key succeeds.

mod memory;
mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::errors::FanoutError;

use serde::{Deserialize, Serialize};

/// A connected user's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity identifier (the session id).
    pub id: String,
    /// Display name supplied at connect time.
    pub name: String,
}

/// A persisted room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Room identifier (UUID v4).
    pub id: String,
    /// Room name; the bus channel is derived from it.
    pub name: String,
    /// Private rooms are only joinable through an invitation.
    pub private: bool,
}

/// Identity persistence.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// Insert or overwrite an identity.
    async fn create(&self, identity: &Identity) -> Result<(), FanoutError>;

    /// Delete an identity. Deleting an absent identity succeeds.
    async fn delete(&self, identity_id: &str) -> Result<(), FanoutError>;

    /// Look up an identity by id.
    async fn get(&self, identity_id: &str) -> Result<Option<Identity>, FanoutError>;

    /// List every stored identity.
    async fn list(&self) -> Result<Vec<Identity>, FanoutError>;
}

/// Room persistence, keyed by room name.
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync + 'static {
    /// Insert or overwrite a room record.
    async fn create(&self, room: &RoomRecord) -> Result<(), FanoutError>;

    /// Look up a room by name.
    async fn get(&self, name: &str) -> Result<Option<RoomRecord>, FanoutError>;
}
