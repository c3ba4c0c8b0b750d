//! Local delivery: writing to this server's own connections.
//!
//! [`LocalDelivery`] is the server's observer endpoint. Coordinators call it
//! to push a fan-out to this server; the frontend uses the same resolution
//! path for its own local half of a send.

use super::membership;
use crate::actors::runtime::{ActorRuntime, WeakActorRuntime};
use crate::errors::BackplaneError;
use crate::observability::metrics as prom;
use crate::observer::{Delivery, ObserverDirectory, ObserverHandle, ServerObserver};
use crate::registry::LocalConnectionRegistry;
use crate::transport::{Invocation, SharedConnection};

use async_trait::async_trait;
use common::types::{EntityKey, EntityKind, ServerId};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one local write round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Local connections matching `target`, minus the excluded ids.
pub(crate) fn resolve_targets(
    registry: &LocalConnectionRegistry,
    delivery: &Delivery,
) -> Vec<SharedConnection> {
    let target = &delivery.target;
    let connections = match target.kind {
        EntityKind::All => registry.all_connections(),
        EntityKind::Group => registry.resolve(&registry.group_connections(&target.id)),
        EntityKind::User => registry.resolve(&registry.user_connections(&target.id)),
        EntityKind::Connection => registry.get(&target.id).into_iter().collect(),
    };

    connections
        .into_iter()
        .filter(|connection| !delivery.is_excluded(connection.connection_id()))
        .collect()
}

/// Write `invocation` to every connection. All writes are started before any
/// is awaited; a failed write only affects its own connection.
pub(crate) async fn write_all(
    connections: &[SharedConnection],
    invocation: &Invocation,
) -> LocalReport {
    let results = join_all(connections.iter().map(|connection| async move {
        (connection.connection_id(), connection.write(invocation).await)
    }))
    .await;

    let mut report = LocalReport::default();
    for (connection_id, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                prom::record_connection_write_failure();
                debug!(
                    target: "backplane.routing",
                    connection_id,
                    error = %e,
                    "Write to connection failed"
                );
            }
        }
    }
    report
}

/// Deliver to the local connections matching the delivery target.
pub(crate) async fn deliver_local(
    registry: &LocalConnectionRegistry,
    delivery: &Delivery,
) -> LocalReport {
    let connections = resolve_targets(registry, delivery);
    if connections.is_empty() {
        return LocalReport::default();
    }
    write_all(&connections, &delivery.invocation).await
}

/// Observer endpoint of one server for one hub.
pub(crate) struct LocalDelivery {
    hub: String,
    server_id: ServerId,
    registry: Arc<LocalConnectionRegistry>,
    runtime: WeakActorRuntime,
}

impl LocalDelivery {
    pub(crate) fn new(
        hub: String,
        server_id: ServerId,
        registry: Arc<LocalConnectionRegistry>,
        runtime: WeakActorRuntime,
    ) -> Self {
        Self {
            hub,
            server_id,
            registry,
            runtime,
        }
    }

    /// Live runtime plus this server's own registered handle.
    fn own_endpoint(&self) -> Result<(ActorRuntime, ObserverHandle), BackplaneError> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BackplaneError::Unreachable("actor runtime dropped".to_string()))?;
        let observer = runtime
            .directory()
            .resolve(&self.hub, &self.server_id)
            .ok_or_else(|| {
                BackplaneError::Unreachable(format!("server {} is not registered", self.server_id))
            })?;
        Ok((runtime, observer))
    }
}

#[async_trait]
impl ServerObserver for LocalDelivery {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), BackplaneError> {
        deliver_local(&self.registry, delivery).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackplaneError> {
        Ok(())
    }

    /// Evict `dead` from the coordinators of every group and user held here.
    ///
    /// Runs on a spawned task so the presence sweep is not held up.
    async fn server_evicted(&self, dead: &ServerId) -> Result<(), BackplaneError> {
        if dead == &self.server_id {
            warn!(
                target: "backplane.routing",
                hub = %self.hub,
                server_id = %self.server_id,
                "This server was reported as expired, restoring subscriptions"
            );
            let (runtime, observer) = self.own_endpoint()?;
            let registry = Arc::clone(&self.registry);
            let hub = self.hub.clone();
            tokio::spawn(async move {
                membership::resubscribe_local(&runtime, &registry, &observer, &hub).await;
            });
            return Ok(());
        }

        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BackplaneError::Unreachable("actor runtime dropped".to_string()))?;

        let keys: Vec<EntityKey> = self
            .registry
            .local_groups()
            .iter()
            .map(|group| EntityKey::group(&self.hub, group))
            .chain(
                self.registry
                    .local_users()
                    .iter()
                    .map(|user| EntityKey::user(&self.hub, user)),
            )
            .collect();

        info!(
            target: "backplane.routing",
            hub = %self.hub,
            server_id = %self.server_id,
            dead = %dead,
            coordinators = keys.len(),
            "Evicting expired server from local coordinators"
        );

        let dead = dead.clone();
        tokio::spawn(async move {
            let results = join_all(keys.into_iter().map(|key| {
                let coordinator = runtime.coordinator(key);
                let dead = &dead;
                async move { (coordinator.key().clone(), coordinator.evict(dead).await) }
            }))
            .await;

            for (key, result) in results {
                if let Err(e) = result {
                    debug!(
                        target: "backplane.routing",
                        entity = %key,
                        error = %e,
                        "Failed to evict expired server"
                    );
                }
            }
        });

        Ok(())
    }

    async fn join_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError> {
        let (runtime, observer) = self.own_endpoint()?;
        membership::join_local(
            &runtime,
            &self.registry,
            &observer,
            &self.hub,
            connection_id,
            group,
        )
        .await
    }

    async fn leave_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError> {
        let (runtime, observer) = self.own_endpoint()?;
        membership::leave_local(
            &runtime,
            &self.registry,
            &observer,
            &self.hub,
            connection_id,
            group,
        )
        .await
    }
}
