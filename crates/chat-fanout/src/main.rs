//! Chat Fanout
//!
//! WebSocket chat fanout server.
//!
//! # Servers
//!
//! - WebSocket ingress at `/ws?name=<display name>` (default: 0.0.0.0:8083)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8084)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the bus and stores (Redis when `REDIS_URL` is set, in-process otherwise)
//! 4. Start the `HubActor`
//! 5. Start the health HTTP server (liveness, readiness, metrics)
//! 6. Start the WebSocket server
//! 7. Wait for shutdown signal, then cancel the root token

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chat_fanout::actors::HubActor;
use chat_fanout::bus::{InMemoryBus, MessageBus, RedisBus};
use chat_fanout::config::Config;
use chat_fanout::observability::metrics::init_metrics_recorder;
use chat_fanout::observability::{health_router, HealthState};
use chat_fanout::routes::{build_routes, AppState};
use chat_fanout::store::{IdentityStore, InMemoryStore, RedisStore, RoomStore};
use secrecy::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bus and stores for one instance.
struct Backends {
    bus: Arc<dyn MessageBus>,
    identities: Arc<dyn IdentityStore>,
    rooms: Arc<dyn RoomStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_fanout=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chat Fanout");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        distributed = config.redis_url.is_some(),
        mailbox_capacity = config.mailbox_capacity,
        max_message_size = config.max_message_size,
        room_idle_eviction_seconds = ?config.room_idle_eviction_seconds,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new(config.instance_id.clone()));

    let backends = build_backends(&config).await?;

    // Root token: cancelling it stops the hub, every room and every connection.
    let root_token = CancellationToken::new();

    info!("Starting hub...");
    let (hub, hub_task) = HubActor::start(
        config.hub_settings(),
        backends.bus,
        backends.identities,
        backends.rooms,
        root_token.child_token(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to start hub");
        e
    })?;
    info!("Hub started");

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = root_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // WebSocket server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = build_routes(Arc::new(AppState {
        hub: hub.clone(),
        connection_settings: config.connection_settings(),
        shutdown: root_token.child_token(),
    }));

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    health_state.set_ready();
    info!(addr = %ws_addr, "Chat Fanout ready");

    let ws_shutdown_token = root_token.child_token();
    let server = axum::serve(ws_listener, app).with_graceful_shutdown(async move {
        ws_shutdown_token.cancelled().await;
    });

    let shutdown_token = root_token.clone();
    let shutdown_health = Arc::clone(&health_state);
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {}
            () = shutdown_token.cancelled() => {}
        }
        shutdown_health.set_not_ready();
        shutdown_token.cancel();
    });

    // A hub that stops on its own (lost bus subscription) takes the instance down.
    let hub_watch_token = root_token.clone();
    let hub_health = Arc::clone(&health_state);
    tokio::spawn(async move {
        if let Err(e) = hub_task.await {
            error!(error = %e, "Hub task failed");
        }
        if !hub_watch_token.is_cancelled() {
            warn!("Hub stopped unexpectedly, shutting down");
            hub_health.set_not_ready();
            hub_watch_token.cancel();
        }
    });

    if let Err(e) = server.await {
        error!(error = %e, "WebSocket server failed");
    }

    info!("Chat Fanout shutdown complete");
    Ok(())
}

async fn build_backends(config: &Config) -> Result<Backends, Box<dyn std::error::Error>> {
    match &config.redis_url {
        Some(redis_url) => {
            info!("Connecting to Redis...");
            let bus = RedisBus::connect(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect bus to Redis");
                    e
                })?;
            let store = Arc::new(RedisStore::connect(redis_url.expose_secret()).await.map_err(
                |e| {
                    error!(error = %e, "Failed to connect store to Redis");
                    e
                },
            )?);
            info!("Redis connection established");

            Ok(Backends {
                bus: Arc::new(bus),
                identities: Arc::clone(&store) as Arc<dyn IdentityStore>,
                rooms: store,
            })
        }
        None => {
            warn!("REDIS_URL not set, running as a single instance on the in-process bus");
            let store = Arc::new(InMemoryStore::new());
            Ok(Backends {
                bus: Arc::new(InMemoryBus::new()),
                identities: Arc::clone(&store) as Arc<dyn IdentityStore>,
                rooms: store,
            })
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
