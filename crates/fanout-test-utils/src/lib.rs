//! # Fanout Test Utilities
//!
//! Shared test utilities for the chat fanout core.
//!
//! ## Modules
//!
//! - `failing` - Fault-injecting bus and store doubles
//! - `fixtures` - Clusters of hubs sharing one in-process bus and store, and
//!   connected test clients
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fanout_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     // Two instances sharing one bus
//!     let cluster = TestCluster::new();
//!     let a = cluster.instance("hub-a").await;
//!     let b = cluster.instance("hub-b").await;
//!
//!     let mut alice = a.connect("alice").await;
//!     let mut bob = b.connect("bob").await;
//!
//!     let lobby = alice.join_room("lobby").await;
//!     bob.join_room("lobby").await;
//!     alice.say(&lobby.target, "hello");
//! }
//! ```

pub mod failing;
pub mod fixtures;

pub use failing::{FailingBus, FailingStore};
pub use fixtures::{wait_until, TestClient, TestCluster, TestInstance, FIXTURE_TIMEOUT};
