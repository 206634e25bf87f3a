//! Chat fanout error types.
//!
//! Nothing here is surfaced to clients: the wire protocol has no error
//! envelope, so these errors are logged server-side and the affected
//! operation degrades (message dropped, join refused, connection closed).

use thiserror::Error;

/// Fanout core error type.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Publish or subscribe on the distributed bus failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Identity or room store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Client transport failed (read, write, or close).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound payload could not be decoded into an envelope.
    #[error("Decode error: {0}")]
    Decode(String),

    /// An actor mailbox or reply channel was closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FanoutError {
    /// Whether the error means the peer actor is gone.
    ///
    /// Used by callers that tolerate a departed actor (e.g. leaving a room
    /// whose actor was evicted) without logging a warning.
    #[must_use]
    pub const fn is_channel_closed(&self) -> bool {
        matches!(self, FanoutError::ChannelClosed(_))
    }
}

impl From<redis::RedisError> for FanoutError {
    fn from(err: redis::RedisError) -> Self {
        FanoutError::Bus(err.to_string())
    }
}

impl From<serde_json::Error> for FanoutError {
    fn from(err: serde_json::Error) -> Self {
        FanoutError::Decode(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FanoutError::Bus("connection refused".to_string());
        assert_eq!(format!("{err}"), "Bus error: connection refused");

        let err = FanoutError::ChannelClosed("hub mailbox".to_string());
        assert_eq!(format!("{err}"), "Channel closed: hub mailbox");

        let err = FanoutError::Decode("expected value".to_string());
        assert_eq!(format!("{err}"), "Decode error: expected value");
    }

    #[test]
    fn test_is_channel_closed() {
        assert!(FanoutError::ChannelClosed("room".to_string()).is_channel_closed());
        assert!(!FanoutError::Bus("down".to_string()).is_channel_closed());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let fanout_err: FanoutError = err.into();
        assert!(matches!(fanout_err, FanoutError::Decode(_)));
    }
}
