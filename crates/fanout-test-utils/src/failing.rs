//! Fault-injecting bus and store doubles.
//!
//! Both wrap the in-process implementations and fail on demand, so tests
//! can check that storage and publish failures are logged and do not abort
//! the in-memory state transition.
//!
//! # Example
//!
//! ```rust,ignore
//! use fanout_test_utils::FailingStore;
//!
//! let store = FailingStore::new();
//! store.set_failing(true);
//! // identity and room operations now return FanoutError::Store
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chat_fanout::bus::{BusSubscription, InMemoryBus, MessageBus};
use chat_fanout::errors::FanoutError;
use chat_fanout::store::{Identity, IdentityStore, InMemoryStore, RoomRecord, RoomStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Bus whose publishes can be made to fail.
///
/// Subscriptions always delegate to the wrapped in-process bus, so a
/// failing publish means "not delivered this round" and nothing else.
#[derive(Debug, Clone, Default)]
pub struct FailingBus {
    inner: InMemoryBus,
    fail_publish: Arc<AtomicBool>,
    publish_attempts: Arc<AtomicUsize>,
    publish_failures: Arc<AtomicUsize>,
}

impl FailingBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing bus (to share it with healthy instances).
    #[must_use]
    pub fn wrapping(inner: InMemoryBus) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_publish.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn publish_failures(&self) -> usize {
        self.publish_failures.load(Ordering::SeqCst)
    }

    /// The wrapped bus.
    #[must_use]
    pub fn inner(&self) -> &InMemoryBus {
        &self.inner
    }
}

#[async_trait]
impl MessageBus for FailingBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), FanoutError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            self.publish_failures.fetch_add(1, Ordering::SeqCst);
            return Err(FanoutError::Bus(format!(
                "injected publish failure on {channel}"
            )));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, FanoutError> {
        self.inner.subscribe(channel).await
    }
}

/// Identity and room store that can be made to fail every operation.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl FailingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails from the start.
    #[must_use]
    pub fn always_failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Operations attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Operations that returned an injected error.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, operation: &str) -> Result<(), FanoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(FanoutError::Store(format!(
                "injected failure in {operation}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FailingStore {
    async fn create(&self, identity: &Identity) -> Result<(), FanoutError> {
        self.check("identity create")?;
        IdentityStore::create(&self.inner, identity).await
    }

    async fn delete(&self, identity_id: &str) -> Result<(), FanoutError> {
        self.check("identity delete")?;
        self.inner.delete(identity_id).await
    }

    async fn get(&self, identity_id: &str) -> Result<Option<Identity>, FanoutError> {
        self.check("identity get")?;
        IdentityStore::get(&self.inner, identity_id).await
    }

    async fn list(&self) -> Result<Vec<Identity>, FanoutError> {
        self.check("identity list")?;
        self.inner.list().await
    }
}

#[async_trait]
impl RoomStore for FailingStore {
    async fn create(&self, room: &RoomRecord) -> Result<(), FanoutError> {
        self.check("room create")?;
        RoomStore::create(&self.inner, room).await
    }

    async fn get(&self, name: &str) -> Result<Option<RoomRecord>, FanoutError> {
        self.check("room get")?;
        RoomStore::get(&self.inner, name).await
    }
}
