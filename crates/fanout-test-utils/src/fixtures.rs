//! Test fixtures: instances sharing one bus and store, and connected clients.
//!
//! Several hubs given clones of one [`InMemoryBus`] behave as separate
//! instances of a horizontally scaled deployment: the only thing they share
//! is the bus (and the store, like a shared Redis).

use chat_fanout::actors::{
    ConnectionActor, ConnectionHandle, ConnectionSettings, HubActor, HubHandle, HubSettings,
    RoomRetention,
};
use chat_fanout::bus::{InMemoryBus, MessageBus};
use chat_fanout::protocol::{Action, Envelope};
use chat_fanout::store::{IdentityStore, InMemoryStore, RoomStore};
use chat_fanout::transport::mock::{self, TestPeer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long fixture helpers wait for an expected event.
pub const FIXTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// A bus and store shared by every instance started from it.
#[derive(Debug, Clone, Default)]
pub struct TestCluster {
    pub bus: InMemoryBus,
    pub store: InMemoryStore,
}

impl TestCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an instance with default settings.
    pub async fn instance(&self, instance_id: &str) -> TestInstance {
        self.instance_with(instance_id, RoomRetention::Indefinite, ConnectionSettings::default())
            .await
    }

    /// Start an instance with explicit retention and connection settings.
    pub async fn instance_with(
        &self,
        instance_id: &str,
        retention: RoomRetention,
        connection_settings: ConnectionSettings,
    ) -> TestInstance {
        TestInstance::start(
            HubSettings::new(instance_id).with_room_retention(retention),
            connection_settings,
            Arc::new(self.bus.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
        )
        .await
    }
}

/// One running hub plus the settings its connections use.
pub struct TestInstance {
    pub hub: HubHandle,
    pub hub_task: JoinHandle<()>,
    pub connection_settings: ConnectionSettings,
    pub shutdown: CancellationToken,
}

impl TestInstance {
    /// Start a hub over arbitrary backends (e.g. failing doubles).
    ///
    /// # Panics
    ///
    /// Panics if the hub cannot subscribe to the global channel.
    pub async fn start(
        hub_settings: HubSettings,
        connection_settings: ConnectionSettings,
        bus: Arc<dyn MessageBus>,
        identities: Arc<dyn IdentityStore>,
        rooms: Arc<dyn RoomStore>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (hub, hub_task) =
            HubActor::start(hub_settings, bus, identities, rooms, shutdown.child_token())
                .await
                .expect("hub should start");

        Self {
            hub,
            hub_task,
            connection_settings,
            shutdown,
        }
    }

    /// Connect a client with a fresh session id.
    pub async fn connect(&self, name: &str) -> TestClient {
        self.connect_as(&uuid::Uuid::new_v4().to_string(), name)
            .await
    }

    /// Connect a client with a chosen session id and wait until the hub has
    /// registered it.
    ///
    /// # Panics
    ///
    /// Panics if registration does not complete within [`FIXTURE_TIMEOUT`].
    pub async fn connect_as(&self, session_id: &str, name: &str) -> TestClient {
        let before = self.client_count().await;
        let (transport, peer) = mock::pair();
        let (handle, task) = ConnectionActor::spawn(
            session_id.to_string(),
            name.to_string(),
            transport,
            self.hub.clone(),
            self.connection_settings.clone(),
            self.shutdown.child_token(),
        );

        let registered = wait_until(FIXTURE_TIMEOUT, move || async move {
            self.client_count().await > before
        })
        .await;
        assert!(registered, "session {session_id} was never registered");

        TestClient {
            session_id: session_id.to_string(),
            name: name.to_string(),
            peer,
            handle,
            task,
        }
    }

    /// Sessions registered with this instance's hub.
    ///
    /// # Panics
    ///
    /// Panics if the hub has stopped.
    pub async fn client_count(&self) -> usize {
        self.hub
            .get_status()
            .await
            .expect("hub should be running")
            .client_count
    }

    /// Wait until the hub's presence cache holds `expected` identities.
    pub async fn wait_for_presence(&self, expected: usize) -> bool {
        wait_until(FIXTURE_TIMEOUT, move || async move {
            self.hub
                .list_presence()
                .await
                .map(|presence| presence.len() == expected)
                .unwrap_or(false)
        })
        .await
    }
}

impl Drop for TestInstance {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A client connected through the in-memory transport.
pub struct TestClient {
    pub session_id: String,
    pub name: String,
    pub peer: TestPeer,
    pub handle: ConnectionHandle,
    pub task: JoinHandle<()>,
}

impl TestClient {
    /// Send `join_room` and wait for the `room-joined` confirmation.
    ///
    /// # Panics
    ///
    /// Panics if no confirmation arrives.
    pub async fn join_room(&mut self, name: &str) -> Envelope {
        self.peer.send_envelope(&Envelope {
            action: Action::JoinRoom,
            content: name.to_string(),
            target: String::new(),
            sender: String::new(),
        });
        self.peer
            .next_envelope_with_action(Action::RoomJoined)
            .await
            .unwrap_or_else(|| panic!("{} never joined {name}", self.name))
    }

    /// Send `join_room_private` targeting another identity.
    pub fn invite(&self, target_id: &str) {
        self.peer.send_envelope(&Envelope {
            action: Action::JoinRoomPrivate,
            content: target_id.to_string(),
            target: String::new(),
            sender: String::new(),
        });
    }

    /// Send `leave_room` for a room id.
    pub fn leave_room(&self, room_id: &str) {
        self.peer.send_envelope(&Envelope {
            action: Action::LeaveRoom,
            content: room_id.to_string(),
            target: String::new(),
            sender: String::new(),
        });
    }

    /// Send chat text to a room id.
    pub fn say(&self, room_id: &str, text: &str) {
        self.peer
            .send_envelope(&Envelope::send_message(room_id, text, self.session_id.as_str()));
    }

    /// Next chat message (skipping presence and confirmations).
    pub async fn next_message(&mut self) -> Option<Envelope> {
        self.peer.next_envelope_with_action(Action::SendMessage).await
    }

    /// Close the client side and wait for the connection to tear down.
    ///
    /// # Panics
    ///
    /// Panics if teardown does not finish within [`FIXTURE_TIMEOUT`].
    pub async fn disconnect(self) {
        self.peer.close();
        tokio::time::timeout(FIXTURE_TIMEOUT, self.task)
            .await
            .expect("connection should tear down")
            .expect("connection task should not panic");
    }
}

/// Poll `condition` every few milliseconds until it holds or `wait` passes.
pub async fn wait_until<F, Fut>(wait: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
