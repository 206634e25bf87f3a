//! Distributed bus bridge.
//!
//! Hub and room actors synchronize across instances only through this
//! publish/subscribe abstraction:
//!
//! - one global channel ([`GLOBAL_CHANNEL`]) for presence and private-room
//!   invitations
//! - one channel per room, [`room_channel`] of the room's *name*
//!
//! Room channels carry a prefix so a user-chosen room name can never
//! address the global channel.
//!
//! # Delivery contract
//!
//! - At-most-once. A subscriber that was not listening at publish time
//!   never receives the message; nothing is persisted.
//! - Per-channel publish order is preserved for a given subscriber.
//! - No ordering across channels.
//!
//! Two implementations:
//! - [`RedisBus`] for multi-instance deployments
//! - [`InMemoryBus`] for a single instance and for tests (several hubs
//!   sharing one `InMemoryBus` behave like separate instances)

mod memory;
mod redis;

pub use self::memory::InMemoryBus;
pub use self::redis::RedisBus;

use crate::errors::FanoutError;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Channel carrying presence events and private-room invitations.
pub const GLOBAL_CHANNEL: &str = "general";

/// Prefix that keeps room channels apart from [`GLOBAL_CHANNEL`].
const ROOM_CHANNEL_PREFIX: &str = "room:";

/// Bus channel for the room called `name`.
#[must_use]
pub fn room_channel(name: &str) -> String {
    format!("{ROOM_CHANNEL_PREFIX}{name}")
}

/// Publish/subscribe primitives used by hub and room actors.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish `payload` to every current subscriber of `channel`.
    ///
    /// Succeeds even when nobody is subscribed.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), FanoutError>;

    /// Subscribe to `channel`.
    ///
    /// Only messages published after this call returns are delivered.
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, FanoutError>;
}

/// A live subscription to one bus channel.
///
/// The stream ends when the bus shuts the subscription down; actors treat
/// that as their signal to stop.
pub struct BusSubscription {
    channel: String,
    stream: BoxStream<'static, Bytes>,
}

impl BusSubscription {
    /// Wrap a payload stream for `channel`.
    #[must_use]
    pub fn new(channel: impl Into<String>, stream: BoxStream<'static, Bytes>) -> Self {
        Self {
            channel: channel.into(),
            stream,
        }
    }

    /// Channel name this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload. `None` means the subscription closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Bounded metric label for a channel.
///
/// Room channels are user-named, so they collapse into one label value.
#[must_use]
pub fn channel_kind(channel: &str) -> &'static str {
    if channel == GLOBAL_CHANNEL {
        "global"
    } else {
        "room"
    }
}
