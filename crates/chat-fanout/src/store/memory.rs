//! In-process store, shared by clones.

use super::{Identity, IdentityStore, RoomRecord, RoomStore};
use crate::errors::FanoutError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory identity and room store.
///
/// Clones share state, so several hubs given clones of one store see the
/// same records (as they would with a shared database).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct InMemoryStoreInner {
    /// Identities by id.
    identities: HashMap<String, Identity>,
    /// Rooms by name.
    rooms: HashMap<String, RoomRecord>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identity (builder style, for tests and fixtures).
    #[must_use]
    pub fn with_identity(self, id: &str, name: &str) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.identities.insert(
                id.to_string(),
                Identity {
                    id: id.to_string(),
                    name: name.to_string(),
                },
            );
        }
        self
    }

    /// Seed a room record (builder style, for tests and fixtures).
    #[must_use]
    pub fn with_room(self, room: RoomRecord) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.rooms.insert(room.name.clone(), room);
        }
        self
    }

    /// Number of stored identities.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.inner.lock().map(|i| i.identities.len()).unwrap_or(0)
    }

    /// Number of stored rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.lock().map(|i| i.rooms.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryStoreInner>, FanoutError> {
        self.inner
            .lock()
            .map_err(|e| FanoutError::Store(format!("store lock poisoned: {e}")))
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryStore {
    async fn create(&self, identity: &Identity) -> Result<(), FanoutError> {
        self.lock()?
            .identities
            .insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn delete(&self, identity_id: &str) -> Result<(), FanoutError> {
        self.lock()?.identities.remove(identity_id);
        Ok(())
    }

    async fn get(&self, identity_id: &str) -> Result<Option<Identity>, FanoutError> {
        Ok(self.lock()?.identities.get(identity_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Identity>, FanoutError> {
        Ok(self.lock()?.identities.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl RoomStore for InMemoryStore {
    async fn create(&self, room: &RoomRecord) -> Result<(), FanoutError> {
        self.lock()?.rooms.insert(room.name.clone(), room.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<RoomRecord>, FanoutError> {
        Ok(self.lock()?.rooms.get(name).cloned())
    }
}
