//! In-process bus backed by `tokio::sync::broadcast`.

use super::{BusSubscription, MessageBus};
use crate::errors::FanoutError;

use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-channel buffer. A subscriber that falls further behind loses the
/// overflow, matching the at-most-once contract.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus.
///
/// Cloning shares the channel set, so every clone observes the same
/// traffic. [`InMemoryBus::shutdown`] ends every open subscription stream.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Bytes>>>>,
    closed: CancellationToken,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    /// Number of channels with at least one subscriber at last check.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|channels| channels.len()).unwrap_or(0)
    }

    /// End every subscription stream (process shutdown).
    pub fn shutdown(&self) {
        self.closed.cancel();
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }
}

#[async_trait::async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), FanoutError> {
        if self.closed.is_cancelled() {
            return Err(FanoutError::Bus("bus is shut down".to_string()));
        }

        let mut channels = self
            .channels
            .lock()
            .map_err(|e| FanoutError::Internal(format!("bus lock poisoned: {e}")))?;

        // No subscribers is not an error: the message is simply not delivered.
        let abandoned = channels
            .get(channel)
            .is_some_and(|sender| sender.send(payload).is_err());
        if abandoned {
            channels.remove(channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, FanoutError> {
        if self.closed.is_cancelled() {
            return Err(FanoutError::Bus("bus is shut down".to_string()));
        }

        let receiver = {
            let mut channels = self
                .channels
                .lock()
                .map_err(|e| FanoutError::Internal(format!("bus lock poisoned: {e}")))?;
            channels.retain(|_, sender| sender.receiver_count() > 0);
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let closed = self.closed.clone();
        let name = channel.to_string();
        let stream = futures::stream::unfold(
            (receiver, closed, name),
            |(mut receiver, closed, name)| async move {
                loop {
                    tokio::select! {
                        () = closed.cancelled() => return None,
                        result = receiver.recv() => match result {
                            Ok(payload) => return Some((payload, (receiver, closed, name))),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(
                                    target: "fanout.bus",
                                    channel = %name,
                                    skipped,
                                    "Subscriber lagged, messages dropped"
                                );
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        },
                    }
                }
            },
        );

        Ok(BusSubscription::new(channel, stream.boxed()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("lobby").await.unwrap();
        let mut second = bus.subscribe("lobby").await.unwrap();

        bus.publish("lobby", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(first.next().await, Some(Bytes::from_static(b"hello")));
        assert_eq!(second.next().await, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        assert!(bus.publish("nobody", Bytes::from_static(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_messages() {
        let bus = InMemoryBus::new();
        let _early = bus.subscribe("lobby").await.unwrap();
        bus.publish("lobby", Bytes::from_static(b"first")).await.unwrap();

        let mut late = bus.subscribe("lobby").await.unwrap();
        bus.publish("lobby", Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(late.next().await, Some(Bytes::from_static(b"second")));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemoryBus::new();
        let mut lobby = bus.subscribe("lobby").await.unwrap();
        let _other = bus.subscribe("other").await.unwrap();

        bus.publish("other", Bytes::from_static(b"elsewhere")).await.unwrap();
        bus.publish("lobby", Bytes::from_static(b"here")).await.unwrap();

        assert_eq!(lobby.next().await, Some(Bytes::from_static(b"here")));
    }

    #[tokio::test]
    async fn test_per_channel_order_preserved() {
        let bus = InMemoryBus::new();
        let mut subscription = bus.subscribe("lobby").await.unwrap();

        for i in 0..10u8 {
            bus.publish("lobby", Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(subscription.next().await, Some(Bytes::from(vec![i])));
        }
    }

    #[tokio::test]
    async fn test_clones_share_channels() {
        let bus = InMemoryBus::new();
        let other_instance = bus.clone();
        let mut subscription = bus.subscribe("lobby").await.unwrap();

        other_instance
            .publish("lobby", Bytes::from_static(b"cross"))
            .await
            .unwrap();

        assert_eq!(subscription.next().await, Some(Bytes::from_static(b"cross")));
        assert_eq!(bus.subscriber_count("lobby"), 1);
    }

    #[tokio::test]
    async fn test_abandoned_channels_are_dropped() {
        let bus = InMemoryBus::new();
        for i in 0..100 {
            let channel = format!("room:{i}");
            let subscription = bus.subscribe(&channel).await.unwrap();
            drop(subscription);
            bus.publish(&channel, Bytes::from_static(b"x")).await.unwrap();
        }
        assert_eq!(bus.channel_count(), 0);

        // Channels nobody publishes to again go on the next subscribe.
        let gone = bus.subscribe("room:quiet").await.unwrap();
        drop(gone);
        let _live = bus.subscribe("room:busy").await.unwrap();
        assert_eq!(bus.channel_count(), 1);
        assert_eq!(bus.subscriber_count("room:busy"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions() {
        let bus = InMemoryBus::new();
        let mut subscription = bus.subscribe("lobby").await.unwrap();

        bus.shutdown();

        let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .expect("subscription should end promptly");
        assert_eq!(next, None);
        assert!(bus.publish("lobby", Bytes::from_static(b"x")).await.is_err());
        assert!(bus.subscribe("lobby").await.is_err());
    }
}
