//! Redis pub/sub bus.
//!
//! Publishes go through one shared `ConnectionManager` (auto-reconnecting,
//! cheap to clone). Each subscription opens its own dedicated pub/sub
//! connection, because a connection in subscriber mode cannot issue other
//! commands.

use super::{BusSubscription, MessageBus};
use crate::errors::FanoutError;

use bytes::Bytes;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info};

/// Redis-backed message bus.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Bus` if the URL is invalid or the initial
    /// connection fails. Both are startup-fatal for the binary.
    pub async fn connect(redis_url: &str) -> Result<Self, FanoutError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            error!(target: "fanout.bus", error = %e, "Failed to open Redis client");
            FanoutError::Bus(format!("Failed to open Redis client: {e}"))
        })?;

        let publisher = ConnectionManager::new(client.clone()).await.map_err(|e| {
            error!(target: "fanout.bus", error = %e, "Failed to connect to Redis");
            FanoutError::Bus(format!("Failed to connect to Redis: {e}"))
        })?;

        info!(target: "fanout.bus", "Redis bus connected");

        Ok(Self { client, publisher })
    }
}

#[async_trait::async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), FanoutError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload.as_ref()).await?;

        debug!(
            target: "fanout.bus",
            channel = %channel,
            receivers,
            bytes = payload.len(),
            "Published to Redis channel"
        );

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, FanoutError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        debug!(target: "fanout.bus", channel = %channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));

        Ok(BusSubscription::new(channel, stream.boxed()))
    }
}
