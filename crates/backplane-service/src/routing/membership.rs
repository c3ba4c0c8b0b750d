//! Group membership changes for connections held by this server.
//!
//! Only the first local member of a group subscribes this server to the
//! group coordinator, and only the last one unsubscribes it.

use crate::actors::runtime::ActorRuntime;
use crate::errors::BackplaneError;
use crate::observer::ObserverHandle;
use crate::registry::LocalConnectionRegistry;

use common::types::EntityKey;
use futures::future::join_all;
use tracing::{debug, info, warn};

/// Add a local connection to `group`, subscribing on the first member.
///
/// A failed subscribe undoes the registry change. Returns whether the
/// connection was the first local member.
pub(crate) async fn join_local(
    runtime: &ActorRuntime,
    registry: &LocalConnectionRegistry,
    observer: &ObserverHandle,
    hub: &str,
    connection_id: &str,
    group: &str,
) -> Result<bool, BackplaneError> {
    if !registry.join_group(connection_id, group)? {
        return Ok(false);
    }

    let coordinator = runtime.coordinator(EntityKey::group(hub, group));
    if let Err(e) = coordinator.subscribe(observer.clone()).await {
        warn!(
            target: "backplane.routing",
            hub,
            connection_id,
            group,
            error = %e,
            "Group subscribe failed, rolling back join"
        );
        if let Err(rollback) = registry.leave_group(connection_id, group) {
            debug!(
                target: "backplane.routing",
                hub,
                connection_id,
                group,
                error = %rollback,
                "Connection disconnected before the join was rolled back"
            );
        }
        return Err(e);
    }

    debug!(
        target: "backplane.routing",
        hub,
        connection_id,
        group,
        server_id = %observer.server_id(),
        "First local member joined group"
    );
    Ok(true)
}

/// Remove a local connection from `group`, unsubscribing on the last member.
///
/// Returns whether the connection was the last local member.
pub(crate) async fn leave_local(
    runtime: &ActorRuntime,
    registry: &LocalConnectionRegistry,
    observer: &ObserverHandle,
    hub: &str,
    connection_id: &str,
    group: &str,
) -> Result<bool, BackplaneError> {
    if !registry.leave_group(connection_id, group)? {
        return Ok(false);
    }

    runtime
        .coordinator(EntityKey::group(hub, group))
        .unsubscribe(observer.server_id())
        .await?;

    debug!(
        target: "backplane.routing",
        hub,
        connection_id,
        group,
        server_id = %observer.server_id(),
        "Last local member left group"
    );
    Ok(true)
}

/// Subscribe again to every coordinator this server holds a local member of:
/// `all`, each local group and user, and each connection.
///
/// Returns the number of failed subscribes, which are logged.
pub(crate) async fn resubscribe_local(
    runtime: &ActorRuntime,
    registry: &LocalConnectionRegistry,
    observer: &ObserverHandle,
    hub: &str,
) -> usize {
    if registry.is_empty() {
        return 0;
    }

    let keys: Vec<EntityKey> = std::iter::once(EntityKey::all(hub))
        .chain(
            registry
                .local_groups()
                .into_iter()
                .map(|group| EntityKey::group(hub, &group)),
        )
        .chain(
            registry
                .local_users()
                .into_iter()
                .map(|user| EntityKey::user(hub, &user)),
        )
        .chain(
            registry
                .connection_ids()
                .into_iter()
                .map(|id| EntityKey::connection(hub, &id)),
        )
        .collect();

    let results = join_all(keys.iter().map(|key| {
        let coordinator = runtime.coordinator(key.clone());
        let observer = observer.clone();
        async move { coordinator.subscribe(observer).await }
    }))
    .await;

    let mut failed = 0;
    for (key, result) in keys.iter().zip(results) {
        if let Err(e) = result {
            failed += 1;
            warn!(
                target: "backplane.routing",
                entity = %key,
                error = %e,
                "Resubscribe failed"
            );
        }
    }

    info!(
        target: "backplane.routing",
        hub,
        server_id = %observer.server_id(),
        coordinators = keys.len(),
        failed,
        "Local subscriptions restored"
    );
    failed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::runtime::RuntimeSettings;
    use crate::observer::{Delivery, ServerObserver};
    use crate::state::{MemoryStateStore, StateStore, SubscriptionState};
    use crate::transport::{ClientConnection, Invocation, SharedConnection};
    use async_trait::async_trait;
    use common::types::ServerId;
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct StubConnection {
        id: String,
        user: Option<String>,
    }

    #[async_trait]
    impl ClientConnection for StubConnection {
        fn connection_id(&self) -> &str {
            &self.id
        }

        fn user_id(&self) -> Option<&str> {
            self.user.as_deref()
        }

        async fn write(&self, _invocation: &Invocation) -> Result<(), BackplaneError> {
            Ok(())
        }
    }

    fn conn(id: &str, user: Option<&str>) -> SharedConnection {
        Arc::new(StubConnection {
            id: id.to_string(),
            user: user.map(str::to_string),
        })
    }

    struct StubObserver;

    #[async_trait]
    impl ServerObserver for StubObserver {
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

    fn observer() -> ObserverHandle {
        ObserverHandle::new(ServerId::new("srv-a"), Arc::new(StubObserver))
    }

    /// Store whose saves wait for a release, then fail.
    #[derive(Default)]
    struct GatedStore {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StateStore for GatedStore {
        async fn load(
            &self,
            _key: &EntityKey,
        ) -> Result<Option<SubscriptionState>, BackplaneError> {
            Ok(None)
        }

        async fn save(
            &self,
            _key: &EntityKey,
            _state: &SubscriptionState,
        ) -> Result<(), BackplaneError> {
            self.entered.notify_one();
            self.release.notified().await;
            Err(BackplaneError::StateStore("unavailable".to_string()))
        }

        async fn clear(&self, _key: &EntityKey) -> Result<(), BackplaneError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_member_subscribes_and_last_unsubscribes() {
        let runtime =
            ActorRuntime::new(Arc::new(MemoryStateStore::new()), RuntimeSettings::default());
        let registry = LocalConnectionRegistry::new();
        let observer = observer();
        registry.add(conn("c1", None));
        registry.add(conn("c2", None));
        let group = runtime.coordinator(EntityKey::group("chat", "g1"));

        assert!(join_local(&runtime, &registry, &observer, "chat", "c1", "g1").await.unwrap());
        assert!(!join_local(&runtime, &registry, &observer, "chat", "c2", "g1").await.unwrap());
        assert_eq!(group.subscribers().await.unwrap(), vec![ServerId::new("srv-a")]);

        assert!(!leave_local(&runtime, &registry, &observer, "chat", "c1", "g1").await.unwrap());
        assert_eq!(group.subscribers().await.unwrap().len(), 1);
        assert!(leave_local(&runtime, &registry, &observer, "chat", "c2", "g1").await.unwrap());
        assert!(group.subscribers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_rollback_tolerates_concurrent_disconnect() {
        let store = Arc::new(GatedStore::default());
        let runtime = ActorRuntime::new(store.clone(), RuntimeSettings::default());
        let registry = Arc::new(LocalConnectionRegistry::new());
        registry.add(conn("c1", None));

        let join = {
            let runtime = runtime.clone();
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                join_local(&runtime, &registry, &observer(), "chat", "c1", "g1").await
            })
        };

        store.entered.notified().await;
        assert!(registry.remove("c1").is_some());
        store.release.notify_one();

        let result = join.await.unwrap();
        assert!(matches!(result, Err(BackplaneError::StateStore(_))));
        assert!(registry.group_connections("g1").is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_restores_every_local_entity() {
        let runtime =
            ActorRuntime::new(Arc::new(MemoryStateStore::new()), RuntimeSettings::default());
        let registry = LocalConnectionRegistry::new();
        let observer = observer();
        registry.add(conn("c1", Some("alice")));
        registry.join_group("c1", "g1").unwrap();

        assert_eq!(resubscribe_local(&runtime, &registry, &observer, "chat").await, 0);

        let srv_a = vec![ServerId::new("srv-a")];
        for key in [
            EntityKey::all("chat"),
            EntityKey::group("chat", "g1"),
            EntityKey::user("chat", "alice"),
            EntityKey::connection("chat", "c1"),
        ] {
            assert_eq!(runtime.coordinator(key).subscribers().await.unwrap(), srv_a);
        }
    }

    #[tokio::test]
    async fn test_resubscribe_with_no_connections_is_a_no_op() {
        let runtime =
            ActorRuntime::new(Arc::new(MemoryStateStore::new()), RuntimeSettings::default());
        let registry = LocalConnectionRegistry::new();

        assert_eq!(resubscribe_local(&runtime, &registry, &observer(), "chat").await, 0);
        assert!(runtime.active_coordinators().is_empty());
    }
}
