//! Redis-backed store.
//!
//! Identities live in the hash `fanout:identities` (field = identity id),
//! rooms in `fanout:rooms` (field = room name). Values are JSON.

use super::{Identity, IdentityStore, RoomRecord, RoomStore};
use crate::errors::FanoutError;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{error, info};

const IDENTITIES_KEY: &str = "fanout:identities";
const ROOMS_KEY: &str = "fanout:rooms";

/// Identity and room store on a shared Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Store` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, FanoutError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            error!(target: "fanout.store", error = %e, "Failed to open Redis client");
            FanoutError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            error!(target: "fanout.store", error = %e, "Failed to connect to Redis");
            FanoutError::Store(format!("Failed to connect to Redis: {e}"))
        })?;

        info!(target: "fanout.store", "Redis store connected");

        Ok(Self { conn })
    }
}

fn store_err(e: redis::RedisError) -> FanoutError {
    FanoutError::Store(e.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, FanoutError> {
    serde_json::from_str(raw).map_err(|e| FanoutError::Store(format!("corrupt record: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, FanoutError> {
    serde_json::to_string(value).map_err(|e| FanoutError::Store(e.to_string()))
}

#[async_trait::async_trait]
impl IdentityStore for RedisStore {
    async fn create(&self, identity: &Identity) -> Result<(), FanoutError> {
        let mut conn = self.conn.clone();
        let value = encode(identity)?;
        let () = conn
            .hset(IDENTITIES_KEY, &identity.id, value)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, identity_id: &str) -> Result<(), FanoutError> {
        let mut conn = self.conn.clone();
        let () = conn
            .hdel(IDENTITIES_KEY, identity_id)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, identity_id: &str) -> Result<Option<Identity>, FanoutError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(IDENTITIES_KEY, identity_id)
            .await
            .map_err(store_err)?;
        raw.as_deref().map(decode).transpose()
    }

    async fn list(&self) -> Result<Vec<Identity>, FanoutError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(IDENTITIES_KEY).await.map_err(store_err)?;
        raw.iter().map(|value| decode(value)).collect()
    }
}

#[async_trait::async_trait]
impl RoomStore for RedisStore {
    async fn create(&self, room: &RoomRecord) -> Result<(), FanoutError> {
        let mut conn = self.conn.clone();
        let value = encode(room)?;
        let () = conn
            .hset(ROOMS_KEY, &room.name, value)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<RoomRecord>, FanoutError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(ROOMS_KEY, name).await.map_err(store_err)?;
        raw.as_deref().map(decode).transpose()
    }
}
