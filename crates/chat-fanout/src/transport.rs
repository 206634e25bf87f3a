//! Client transport abstraction.
//!
//! A connection actor sees its client as a sink and a stream of [`Frame`]s.
//! The production transport is an upgraded axum WebSocket
//! ([`Transport::from_websocket`]); tests drive connections through an
//! in-memory pair ([`mock::pair`]).

use axum::extract::ws::{Message, WebSocket};
use futures::stream::BoxStream;
use futures::{future, Sink, SinkExt, StreamExt};
use std::pin::Pin;
use thiserror::Error;

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

impl Frame {
    /// Payload size in bytes (zero for control frames).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
            Frame::Ping | Frame::Pong | Frame::Close => 0,
        }
    }

    /// Whether the frame carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping => Message::Ping(Vec::new()),
            Frame::Pong => Message::Pong(Vec::new()),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(_) => Frame::Ping,
            Message::Pong(_) => Frame::Pong,
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Transport read/write failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a transport. The stream ends when the peer goes away.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// A bidirectional client transport, already split.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    /// Adapt an upgraded axum WebSocket.
    #[must_use]
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (ws_sink, ws_stream) = socket.split();

        let sink = ws_sink
            .sink_map_err(|e| TransportError(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));

        let stream = ws_stream.map(|result| {
            result
                .map(Frame::from)
                .map_err(|e| TransportError(e.to_string()))
        });

        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// In-memory transport for driving connections in tests.
///
/// This module is public so integration tests and the test-utils crate
/// can use it.
pub mod mock {
    use super::{Frame, Transport, TransportError};
    use crate::protocol::{Action, Envelope};

    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Default wait used by [`TestPeer::next_envelope`].
    pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a connected transport and the client-side peer that drives it.
    #[must_use]
    pub fn pair() -> (Transport, TestPeer) {
        let (client_tx, server_rx) = mpsc::unbounded::<Result<Frame, TransportError>>();
        let (server_tx, client_rx) = mpsc::unbounded::<Frame>();

        let sink = server_tx.sink_map_err(|e| TransportError(e.to_string()));

        let transport = Transport {
            sink: Box::pin(sink),
            stream: server_rx.boxed(),
        };

        let peer = TestPeer {
            outgoing: client_tx,
            incoming: client_rx,
            pending: VecDeque::new(),
            auto_pong: true,
            frames_received: 0,
            closed: false,
        };

        (transport, peer)
    }

    /// Client side of an in-memory transport.
    ///
    /// Answers server pings automatically unless told otherwise, and splits
    /// newline-coalesced text frames back into individual envelopes.
    #[derive(Debug)]
    pub struct TestPeer {
        outgoing: mpsc::UnboundedSender<Result<Frame, TransportError>>,
        incoming: mpsc::UnboundedReceiver<Frame>,
        pending: VecDeque<Envelope>,
        auto_pong: bool,
        frames_received: usize,
        closed: bool,
    }

    impl TestPeer {
        /// Send a raw frame to the server.
        pub fn send_frame(&self, frame: Frame) -> bool {
            self.outgoing.unbounded_send(Ok(frame)).is_ok()
        }

        /// Send a text frame to the server.
        pub fn send_text(&self, text: impl Into<String>) -> bool {
            self.send_frame(Frame::Text(text.into()))
        }

        /// Send one envelope as a text frame.
        pub fn send_envelope(&self, envelope: &Envelope) -> bool {
            match envelope.encode() {
                Ok(text) => self.send_text(text),
                Err(_) => false,
            }
        }

        /// Inject a transport error on the server's read side.
        pub fn fail(&self, reason: &str) -> bool {
            self.outgoing
                .unbounded_send(Err(TransportError(reason.to_string())))
                .is_ok()
        }

        /// Close the client side; the server's read stream ends.
        pub fn close(&self) {
            self.outgoing.close_channel();
        }

        /// Stop answering server pings.
        pub fn set_auto_pong(&mut self, enabled: bool) {
            self.auto_pong = enabled;
        }

        /// Number of frames received from the server so far.
        #[must_use]
        pub fn frames_received(&self) -> usize {
            self.frames_received
        }

        /// Whether the server closed the transport.
        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.closed
        }

        /// Next raw frame from the server, or `None` once the server side is gone.
        pub async fn next_frame(&mut self) -> Option<Frame> {
            let frame = self.incoming.next().await?;
            self.frames_received += 1;
            Some(frame)
        }

        /// Next envelope, waiting up to [`DEFAULT_RECV_TIMEOUT`].
        pub async fn next_envelope(&mut self) -> Option<Envelope> {
            self.next_envelope_within(DEFAULT_RECV_TIMEOUT).await
        }

        /// Next envelope, waiting up to `wait`.
        ///
        /// Returns `None` on timeout, on server close, or when the server
        /// side is dropped.
        pub async fn next_envelope_within(&mut self, wait: Duration) -> Option<Envelope> {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(envelope);
            }

            let deadline = tokio::time::Instant::now() + wait;
            loop {
                let frame = tokio::time::timeout_at(deadline, self.next_frame())
                    .await
                    .ok()??;

                match frame {
                    Frame::Text(text) => {
                        for line in text.split('\n').filter(|line| !line.is_empty()) {
                            if let Ok(envelope) = Envelope::decode(line.as_bytes()) {
                                self.pending.push_back(envelope);
                            }
                        }
                        if let Some(envelope) = self.pending.pop_front() {
                            return Some(envelope);
                        }
                    }
                    Frame::Binary(data) => {
                        if let Ok(envelope) = Envelope::decode(&data) {
                            return Some(envelope);
                        }
                    }
                    Frame::Ping => {
                        if self.auto_pong {
                            self.send_frame(Frame::Pong);
                        }
                    }
                    Frame::Pong => {}
                    Frame::Close => {
                        self.closed = true;
                        return None;
                    }
                }
            }
        }

        /// Skip envelopes until one with `action` arrives.
        pub async fn next_envelope_with_action(&mut self, action: Action) -> Option<Envelope> {
            let deadline = tokio::time::Instant::now() + DEFAULT_RECV_TIMEOUT;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let envelope = self.next_envelope_within(remaining).await?;
                if envelope.action == action {
                    return Some(envelope);
                }
            }
        }

        /// Drain everything that arrives within `wait`.
        pub async fn drain_within(&mut self, wait: Duration) -> Vec<Envelope> {
            let deadline = tokio::time::Instant::now() + wait;
            let mut drained = Vec::new();
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                match self.next_envelope_within(remaining).await {
                    Some(envelope) => drained.push(envelope),
                    None => return drained,
                }
            }
        }

        /// Wait until the server closes the transport or drops it.
        ///
        /// Returns `false` if neither happens within `wait`.
        pub async fn wait_closed(&mut self, wait: Duration) -> bool {
            let deadline = tokio::time::Instant::now() + wait;
            loop {
                match tokio::time::timeout_at(deadline, self.next_frame()).await {
                    Err(_) => return false,
                    Ok(None) | Ok(Some(Frame::Close)) => {
                        self.closed = true;
                        return true;
                    }
                    Ok(Some(Frame::Ping)) => {
                        if self.auto_pong {
                            self.send_frame(Frame::Pong);
                        }
                    }
                    Ok(Some(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;

    #[test]
    fn test_frame_message_conversion() {
        assert_eq!(
            Frame::from(Message::Text("hi".to_string())),
            Frame::Text("hi".to_string())
        );
        assert_eq!(Frame::from(Message::Ping(vec![1, 2])), Frame::Ping);
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);
        assert!(matches!(Message::from(Frame::Pong), Message::Pong(_)));
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::Text("abc".to_string()).len(), 3);
        assert!(Frame::Ping.is_empty());
    }

    #[tokio::test]
    async fn test_mock_pair_delivers_both_directions() {
        let (mut transport, mut peer) = mock::pair();

        assert!(peer.send_text("from client"));
        let inbound = transport.stream.next().await.unwrap().unwrap();
        assert_eq!(inbound, Frame::Text("from client".to_string()));

        let envelope = Envelope::user_joined("u1", "alice");
        transport
            .sink
            .send(Frame::Text(envelope.encode().unwrap()))
            .await
            .unwrap();
        assert_eq!(peer.next_envelope().await, Some(envelope));
    }

    #[tokio::test]
    async fn test_mock_peer_splits_coalesced_frames() {
        let (mut transport, mut peer) = mock::pair();
        let first = Envelope::user_joined("u1", "alice");
        let second = Envelope::user_left("u2", "bob");

        let coalesced = format!("{}\n{}", first.encode().unwrap(), second.encode().unwrap());
        transport.sink.send(Frame::Text(coalesced)).await.unwrap();

        assert_eq!(peer.next_envelope().await, Some(first));
        assert_eq!(peer.next_envelope().await, Some(second));
        assert_eq!(peer.frames_received(), 1);
    }

    #[tokio::test]
    async fn test_mock_peer_auto_pongs() {
        let (mut transport, mut peer) = mock::pair();

        transport.sink.send(Frame::Ping).await.unwrap();
        transport.sink.send(Frame::Close).await.unwrap();

        assert_eq!(peer.next_envelope().await, None);
        assert!(peer.is_closed());
        assert_eq!(transport.stream.next().await.unwrap().unwrap(), Frame::Pong);
    }

    #[tokio::test]
    async fn test_mock_peer_close_ends_server_stream() {
        let (mut transport, peer) = mock::pair();
        peer.close();
        assert!(transport.stream.next().await.is_none());
    }
}
