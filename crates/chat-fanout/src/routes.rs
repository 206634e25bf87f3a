//! HTTP routes for the fanout service.
//!
//! Defines the Axum router serving the WebSocket ingress and its state.

use crate::actors::{ConnectionActor, ConnectionSettings, HubHandle};
use crate::transport::Transport;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub of this instance.
    pub hub: HubHandle,

    /// Limits and timers for every accepted connection.
    pub connection_settings: ConnectionSettings,

    /// Parent of every connection's token.
    pub shutdown: CancellationToken,
}

/// Query string of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Display name of the connecting client.
    #[serde(default)]
    pub name: String,
}

/// Build the application routes.
///
/// - `GET /ws?name=<display name>` - WebSocket upgrade into a session
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if params.name.trim().is_empty() {
        debug!(target: "fanout.routes", "Rejecting connection without a display name");
        return (StatusCode::BAD_REQUEST, "missing name").into_response();
    }

    let max_message_size = state.connection_settings.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| accept(socket, params.name, state))
}

async fn accept(socket: WebSocket, display_name: String, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();

    info!(
        target: "fanout.routes",
        session_id = %session_id,
        "WebSocket connection accepted"
    );

    let (_handle, task) = ConnectionActor::spawn(
        session_id,
        display_name,
        Transport::from_websocket(socket),
        state.hub.clone(),
        state.connection_settings.clone(),
        state.shutdown.child_token(),
    );

    // Keep the upgrade task alive for the life of the session.
    let _ = task.await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{HubActor, HubSettings};
    use crate::bus::InMemoryBus;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn app() -> Router {
        let store = InMemoryStore::new();
        let (hub, _task) = HubActor::start(
            HubSettings::new("fanout-test"),
            Arc::new(InMemoryBus::new()),
            Arc::new(store.clone()),
            Arc::new(store),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        build_routes(Arc::new(AppState {
            hub,
            connection_settings: ConnectionSettings::default(),
            shutdown: CancellationToken::new(),
        }))
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_plain_get_is_not_upgraded() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/ws?name=alice").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/chat").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
