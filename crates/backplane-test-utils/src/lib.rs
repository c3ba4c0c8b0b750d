//! # Backplane Test Utilities
//!
//! Shared test utilities for the hub backplane.
//!
//! ## Modules
//!
//! - `mock_connection` - Client connection that records writes
//! - `mock_observer` - Server observer endpoint that records calls
//! - `mock_store` - Counting, optionally failing state store
//! - `cluster` - Several routing frontends sharing one actor runtime
//!
//! ## Usage
//!
//! ```rust,ignore
//! use backplane_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let cluster = TestCluster::new("chat", 3);
//!     let a = cluster.connect(0, "conn-a", None).await;
//!     let b = cluster.connect(1, "conn-b", None).await;
//!
//!     cluster.server(0).send_all(reply("hi")).await.unwrap();
//!
//!     assert_eq!(a.received_count(), 1);
//!     assert_eq!(b.received_count(), 1);
//! }
//! ```

pub mod cluster;
pub mod mock_connection;
pub mod mock_observer;
pub mod mock_store;

pub use cluster::*;
pub use mock_connection::*;
pub use mock_observer::*;
pub use mock_store::*;

use backplane_service::transport::Invocation;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// `Reply(text)` invocation used throughout the tests.
#[must_use]
pub fn reply(text: &str) -> Invocation {
    Invocation::new("Reply", vec![json!(text)])
}

/// Poll `check` until it holds, sleeping between attempts.
///
/// Works with paused time: each sleep lets spawned tasks run and auto-advances
/// the clock when the runtime is idle.
///
/// # Panics
///
/// Panics if `check` still fails after 100 attempts.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {what}");
}
