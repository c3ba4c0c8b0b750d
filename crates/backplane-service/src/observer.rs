//! Server-observer endpoints.
//!
//! A coordinator does not hold connections; it holds one [`ObserverHandle`]
//! per subscribed server. The handle is a callable endpoint for that server's
//! local delivery, addressed by `(hub, server_id)`. Durable coordinator state
//! stores only the server ids and re-resolves the endpoints through an
//! [`ObserverDirectory`] on activation.

use crate::errors::BackplaneError;
use crate::transport::Invocation;

use async_trait::async_trait;
use common::types::{EntityKey, ServerId};
use dashmap::DashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One fan-out request for a single server: deliver `invocation` to the local
/// connections matching `target`, skipping `excluded` connection ids.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Entity whose local members receive the invocation.
    pub target: EntityKey,
    /// Payload, shared across all targets.
    pub invocation: Arc<Invocation>,
    /// Connection ids that must not receive the invocation.
    pub excluded: Arc<[String]>,
}

impl Delivery {
    /// Create a delivery without exclusions.
    #[must_use]
    pub fn new(target: EntityKey, invocation: Arc<Invocation>) -> Self {
        Self {
            target,
            invocation,
            excluded: Arc::from(Vec::new()),
        }
    }

    /// Create a delivery with an exclusion list.
    #[must_use]
    pub fn with_excluded(
        target: EntityKey,
        invocation: Arc<Invocation>,
        excluded: Vec<String>,
    ) -> Self {
        Self {
            target,
            invocation,
            excluded: Arc::from(excluded),
        }
    }

    /// Whether the given connection is excluded from this delivery.
    #[must_use]
    pub fn is_excluded(&self, connection_id: &str) -> bool {
        self.excluded.iter().any(|id| id == connection_id)
    }
}

/// The callable endpoint of one server for one hub.
#[async_trait]
pub trait ServerObserver: Send + Sync {
    /// Deliver to this server's local connections matching the delivery target.
    async fn deliver(&self, delivery: &Delivery) -> Result<(), BackplaneError>;

    /// No-op liveness check.
    async fn ping(&self) -> Result<(), BackplaneError>;

    /// Another server of the hub was evicted by presence expiry.
    async fn server_evicted(&self, server_id: &ServerId) -> Result<(), BackplaneError>;

    /// Add one of this server's connections to a group on behalf of another
    /// server. Returns whether it was the first local member.
    async fn join_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError>;

    /// Remove one of this server's connections from a group on behalf of
    /// another server. Returns whether it was the last local member.
    async fn leave_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError>;
}

/// A server's observer endpoint, compared and hashed by server id.
#[derive(Clone)]
pub struct ObserverHandle {
    server_id: ServerId,
    endpoint: Arc<dyn ServerObserver>,
}

impl ObserverHandle {
    /// Wrap an endpoint for the given server.
    #[must_use]
    pub fn new(server_id: ServerId, endpoint: Arc<dyn ServerObserver>) -> Self {
        Self {
            server_id,
            endpoint,
        }
    }

    /// Server this handle points at.
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// The callable endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<dyn ServerObserver> {
        &self.endpoint
    }
}

impl PartialEq for ObserverHandle {
    fn eq(&self, other: &Self) -> bool {
        self.server_id == other.server_id
    }
}

impl Eq for ObserverHandle {}

impl Hash for ObserverHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_id.hash(state);
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

/// Resolves server ids back to callable endpoints.
pub trait ObserverDirectory: Send + Sync {
    /// Look up the endpoint of `server_id` for `hub`.
    fn resolve(&self, hub: &str, server_id: &ServerId) -> Option<ObserverHandle>;
}

/// In-memory observer directory for servers sharing one process (or one
/// in-process cluster harness).
#[derive(Default)]
pub struct LocalObserverDirectory {
    endpoints: DashMap<(String, ServerId), ObserverHandle>,
}

impl LocalObserverDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a server's endpoint for a hub.
    pub fn register(&self, hub: &str, handle: ObserverHandle) {
        self.endpoints
            .insert((hub.to_string(), handle.server_id().clone()), handle);
    }

    /// Remove a server's endpoint. Returns whether it was registered.
    pub fn unregister(&self, hub: &str, server_id: &ServerId) -> bool {
        self.endpoints
            .remove(&(hub.to_string(), server_id.clone()))
            .is_some()
    }

    /// Drop every registered endpoint.
    pub fn clear(&self) {
        self.endpoints.clear();
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl ObserverDirectory for LocalObserverDirectory {
    fn resolve(&self, hub: &str, server_id: &ServerId) -> Option<ObserverHandle> {
        self.endpoints
            .get(&(hub.to_string(), server_id.clone()))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct NoopObserver;

    #[async_trait]
    impl ServerObserver for NoopObserver {
        async fn deliver(&self, _delivery: &Delivery) -> Result<(), BackplaneError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), BackplaneError> {
            Ok(())
        }

        async fn server_evicted(&self, _server_id: &ServerId) -> Result<(), BackplaneError> {
            Ok(())
        }

        async fn join_group(
            &self,
            _connection_id: &str,
            _group: &str,
        ) -> Result<bool, BackplaneError> {
            Ok(false)
        }

        async fn leave_group(
            &self,
            _connection_id: &str,
            _group: &str,
        ) -> Result<bool, BackplaneError> {
            Ok(false)
        }
    }

    fn handle(id: &str) -> ObserverHandle {
        ObserverHandle::new(ServerId::new(id), Arc::new(NoopObserver))
    }

    #[test]
    fn test_handles_compare_by_server_id() {
        let mut set = HashSet::new();
        assert!(set.insert(handle("srv-a")));
        assert!(!set.insert(handle("srv-a")));
        assert!(set.insert(handle("srv-b")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_directory_resolves_per_hub() {
        let directory = LocalObserverDirectory::new();
        directory.register("chat", handle("srv-a"));

        assert!(directory.resolve("chat", &ServerId::new("srv-a")).is_some());
        assert!(directory.resolve("news", &ServerId::new("srv-a")).is_none());

        assert!(directory.unregister("chat", &ServerId::new("srv-a")));
        assert!(!directory.unregister("chat", &ServerId::new("srv-a")));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_delivery_exclusion() {
        let delivery = Delivery::with_excluded(
            EntityKey::group("chat", "g1"),
            Arc::new(Invocation::new("Reply", vec![])),
            vec!["conn-b".to_string()],
        );
        assert!(delivery.is_excluded("conn-b"));
        assert!(!delivery.is_excluded("conn-a"));
    }
}
