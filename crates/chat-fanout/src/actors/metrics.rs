//! Actor mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Hub        | < 100  | 100-500 | > 500    |
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! Each monitor is owned by the actor loop it observes, so plain integers
//! suffice.

use crate::observability::metrics;

use tracing::{debug, warn};

/// Mailbox depth thresholds for hub and room actors.
pub const ACTOR_MAILBOX_NORMAL: usize = 100;
pub const ACTOR_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection outbound queues.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `HubActor` (singleton per instance).
    Hub,
    /// `RoomActor` (one per running room).
    Room,
    /// `ConnectionActor` (one per client socket).
    Connection,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Hub => "hub",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Hub | ActorType::Room => ACTOR_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Hub | ActorType::Room => ACTOR_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks one actor's mailbox depth and throughput.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    last_level: MailboxLevel,
    peak_depth: usize,
    messages_processed: u64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            last_level: MailboxLevel::Normal,
            peak_depth: 0,
            messages_processed: 0,
        }
    }

    /// Record one processed message and the depth still queued behind it.
    pub fn record_processed(&mut self, queued: usize) {
        self.messages_processed += 1;
        self.peak_depth = self.peak_depth.max(queued);

        let level = self.level_for_depth(queued);
        if level != self.last_level {
            match level {
                MailboxLevel::Critical => warn!(
                    target: "fanout.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                ),
                MailboxLevel::Warning => debug!(
                    target: "fanout.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    "Mailbox depth elevated"
                ),
                MailboxLevel::Normal => {}
            }
            self.last_level = level;
        }

        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), queued);
    }

    /// Total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    /// Highest depth observed.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    /// Level at the last observation.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.last_level
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_labels() {
        assert_eq!(ActorType::Hub.as_str(), "hub");
        assert_eq!(ActorType::Room.as_str(), "room");
        assert_eq!(ActorType::Connection.as_str(), "connection");
    }

    #[test]
    fn test_levels_follow_thresholds() {
        let mut monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");

        monitor.record_processed(10);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_processed(CONNECTION_MAILBOX_NORMAL + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_processed(CONNECTION_MAILBOX_WARNING + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_processed(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_counts_and_peak() {
        let mut monitor = MailboxMonitor::new(ActorType::Hub, "fanout-test");

        monitor.record_processed(3);
        monitor.record_processed(7);
        monitor.record_processed(1);

        assert_eq!(monitor.messages_processed(), 3);
        assert_eq!(monitor.peak_depth(), 7);
    }
}
