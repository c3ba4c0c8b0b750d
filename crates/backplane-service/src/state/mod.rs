//! Durable per-actor state.
//!
//! A coordinator's durable state is the set of server ids subscribed to it.
//! State is loaded explicitly when the coordinator activates and written
//! explicitly after a mutation that changed the subscriber count. An emptied
//! coordinator clears its key instead of writing an empty set.
//!
//! # Backends
//!
//! - [`MemoryStateStore`] - process-local map (single node, tests)
//! - [`RedisStateStore`] - shared Redis keyspace (multi-node deployments)

mod memory;
mod redis;

pub use self::memory::MemoryStateStore;
pub use self::redis::RedisStateStore;

use crate::errors::BackplaneError;
use crate::observability::metrics::record_state_operation;

use async_trait::async_trait;
use common::types::{EntityKey, ServerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Instant;

/// Persisted subscriber set of one coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// Servers currently subscribed.
    pub subscribers: BTreeSet<ServerId>,
}

impl SubscriptionState {
    /// Build state from an iterator of server ids.
    pub fn from_servers<'a>(servers: impl IntoIterator<Item = &'a ServerId>) -> Self {
        Self {
            subscribers: servers.into_iter().cloned().collect(),
        }
    }

    /// Whether no server is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Durable state backend for coordinator actors.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state for `key`; `None` when nothing was persisted.
    async fn load(&self, key: &EntityKey) -> Result<Option<SubscriptionState>, BackplaneError>;

    /// Persist the state for `key`.
    async fn save(&self, key: &EntityKey, state: &SubscriptionState) -> Result<(), BackplaneError>;

    /// Remove any persisted state for `key`.
    async fn clear(&self, key: &EntityKey) -> Result<(), BackplaneError>;
}

/// Storage key for a coordinator's subscriber set.
#[must_use]
pub fn storage_key(key: &EntityKey) -> String {
    format!("backplane:{}:{}:{}:subscribers", key.hub, key.kind, key.id)
}

/// Run a store operation and record its latency and outcome.
pub(crate) async fn timed<T>(
    operation: &'static str,
    call: impl Future<Output = Result<T, BackplaneError>>,
) -> Result<T, BackplaneError> {
    let start = Instant::now();
    let result = call.await;
    let status = if result.is_ok() { "success" } else { "error" };
    record_state_operation(operation, status, start.elapsed());
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(
            storage_key(&EntityKey::user("chat", "u1")),
            "backplane:chat:user:u1:subscribers"
        );
    }

    #[test]
    fn test_state_json_shape_is_stable() {
        let state = SubscriptionState::from_servers(&[ServerId::new("b"), ServerId::new("a")]);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"subscribers":["a","b"]}"#);
    }
}
