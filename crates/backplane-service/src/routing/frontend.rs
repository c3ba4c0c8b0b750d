//! `RoutingFrontend` - one server's view of one hub.
//!
//! The frontend turns connection lifecycle and group membership into
//! coordinator subscriptions, and sends into a local write plus a coordinator
//! fan-out.
//!
//! # Subscriptions
//!
//! | Entity      | Subscribed when                         | Unsubscribed when                  |
//! |-------------|-----------------------------------------|------------------------------------|
//! | `all`       | first local connection of the hub       | last local connection disconnects  |
//! | `user`      | first local connection of the user      | last local connection of the user  |
//! | `group`     | first local member joins                | last local member leaves           |
//! | `connection`| the connection connects                 | the connection disconnects         |
//!
//! A server expired from presence while still holding connections is evicted
//! from these coordinators by its peers. Its next heartbeat re-registers it
//! and re-subscribes every entity it still holds.
//!
//! # Sends
//!
//! Every send resolves matching local connections and writes to them while
//! the target coordinator fans the same delivery out to every other
//! subscribed server. Remote failures are logged and absorbed; only invalid
//! input is returned to the caller.

use super::delivery::{deliver_local, LocalDelivery};
use super::membership;
use super::{require_id, require_ids, require_method};
use crate::actors::messages::HeartbeatOutcome;
use crate::actors::runtime::{call_with_timeout, ActorRuntime, PresenceRef};
use crate::errors::BackplaneError;
use crate::observability::metrics as prom;
use crate::observer::{Delivery, ObserverDirectory, ObserverHandle};
use crate::registry::LocalConnectionRegistry;
use crate::transport::{Invocation, SharedConnection};

use common::types::{EntityKey, EntityKind, ServerId};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Background presence heartbeat of one frontend.
struct HeartbeatTask {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatTask {
    fn stop(self) {
        self.cancel_token.cancel();
        if self.task.is_finished() {
            trace!(target: "backplane.routing", "Heartbeat loop had already stopped");
        }
    }
}

/// Routing adapter for one hub on one server.
pub struct RoutingFrontend {
    hub: String,
    server_id: ServerId,
    registry: Arc<LocalConnectionRegistry>,
    runtime: ActorRuntime,
    observer: ObserverHandle,
    heartbeat_interval: Duration,
    heartbeat: Mutex<Option<HeartbeatTask>>,
}

impl RoutingFrontend {
    /// Create the frontend and register this server's observer endpoint for
    /// `hub`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `hub` is empty.
    pub fn new(
        hub: impl Into<String>,
        server_id: ServerId,
        runtime: ActorRuntime,
        heartbeat_interval: Duration,
    ) -> Result<Self, BackplaneError> {
        let hub = hub.into();
        require_id("hub name", &hub)?;

        let registry = Arc::new(LocalConnectionRegistry::new());
        let endpoint = LocalDelivery::new(
            hub.clone(),
            server_id.clone(),
            Arc::clone(&registry),
            runtime.downgrade(),
        );
        let observer = ObserverHandle::new(server_id.clone(), Arc::new(endpoint));
        runtime.directory().register(&hub, observer.clone());

        info!(
            target: "backplane.routing",
            hub = %hub,
            server_id = %server_id,
            heartbeat_interval_secs = heartbeat_interval.as_secs(),
            "Routing frontend started"
        );

        Ok(Self {
            hub,
            server_id,
            registry,
            runtime,
            observer,
            heartbeat_interval,
            heartbeat: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Connections held by this server for the hub.
    #[must_use]
    pub fn registry(&self) -> &Arc<LocalConnectionRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Register a new connection and subscribe to the coordinators it makes
    /// this server a member of.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty connection id. A failed subscribe
    /// rolls the registration back and returns the error.
    #[instrument(
        skip_all,
        name = "backplane.routing.connect",
        fields(hub = %self.hub, connection_id = %connection.connection_id())
    )]
    pub async fn on_connected(&self, connection: SharedConnection) -> Result<(), BackplaneError> {
        let connection_id = connection.connection_id().to_string();
        require_id("connection id", &connection_id)?;
        let user_id = connection
            .user_id()
            .filter(|user| !user.is_empty())
            .map(str::to_string);

        let outcome = self.registry.add(connection);
        if !outcome.added {
            debug!(
                target: "backplane.routing",
                hub = %self.hub,
                connection_id = %connection_id,
                "Connection re-registered, subscriptions unchanged"
            );
            return Ok(());
        }
        prom::set_connections_active(&self.hub, self.registry.len());

        let mut keys = vec![EntityKey::connection(&self.hub, &connection_id)];
        if outcome.first_for_hub {
            keys.push(EntityKey::all(&self.hub));
        }
        if let Some(user) = user_id.as_deref().filter(|_| outcome.first_for_user) {
            keys.push(EntityKey::user(&self.hub, user));
        }

        if let Err(e) = self.subscribe_keys(keys).await {
            warn!(
                target: "backplane.routing",
                hub = %self.hub,
                connection_id = %connection_id,
                error = %e,
                "Subscribe failed, rejecting connection"
            );
            self.registry.remove(&connection_id);
            prom::set_connections_active(&self.hub, self.registry.len());
            return Err(e);
        }

        if outcome.first_for_hub {
            self.start_heartbeat();
            send_heartbeat(&self.presence(), &self.server_id).await;
        }

        debug!(
            target: "backplane.routing",
            hub = %self.hub,
            connection_id = %connection_id,
            user_id = ?user_id,
            first_for_hub = outcome.first_for_hub,
            first_for_user = outcome.first_for_user,
            "Connection registered"
        );
        Ok(())
    }

    /// Unregister a connection and unsubscribe from every coordinator it was
    /// the last local member of.
    ///
    /// Unsubscribe failures are logged; the subscriber is removed later by a
    /// failed delivery or ping.
    ///
    /// # Errors
    ///
    /// `ConnectionNotFound` if the connection is not registered here.
    #[instrument(
        skip_all,
        name = "backplane.routing.disconnect",
        fields(hub = %self.hub, connection_id = %connection_id)
    )]
    pub async fn on_disconnected(&self, connection_id: &str) -> Result<(), BackplaneError> {
        let outcome = self
            .registry
            .remove(connection_id)
            .ok_or_else(|| BackplaneError::ConnectionNotFound(connection_id.to_string()))?;
        prom::set_connections_active(&self.hub, self.registry.len());

        let mut keys = vec![EntityKey::connection(&self.hub, connection_id)];
        if outcome.last_for_hub {
            self.stop_heartbeat();
            keys.push(EntityKey::all(&self.hub));
        }
        if let Some(user) = outcome.user_id.as_deref().filter(|_| outcome.last_for_user) {
            keys.push(EntityKey::user(&self.hub, user));
        }
        keys.extend(
            outcome
                .emptied_groups
                .iter()
                .map(|group| EntityKey::group(&self.hub, group)),
        );

        let failed = self.unsubscribe_keys(keys).await;

        debug!(
            target: "backplane.routing",
            hub = %self.hub,
            connection_id,
            last_for_hub = outcome.last_for_hub,
            last_for_user = outcome.last_for_user,
            emptied_groups = outcome.emptied_groups.len(),
            failed_unsubscribes = failed,
            "Connection unregistered"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group membership
    // ------------------------------------------------------------------

    /// Add a connection to a group. The connection may live on another
    /// server of the hub.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty ids, `ConnectionNotFound` if no server
    /// holds the connection, or the subscribe error (the join is undone).
    pub async fn join_group(&self, connection_id: &str, group: &str) -> Result<(), BackplaneError> {
        require_id("connection id", connection_id)?;
        require_id("group name", group)?;

        if self.registry.contains(connection_id) {
            membership::join_local(
                &self.runtime,
                &self.registry,
                &self.observer,
                &self.hub,
                connection_id,
                group,
            )
            .await?;
            return Ok(());
        }

        let owner = self.owner_of(connection_id).await?;
        call_with_timeout(
            self.runtime.settings().call_timeout,
            owner.endpoint().join_group(connection_id, group),
        )
        .await?;
        debug!(
            target: "backplane.routing",
            hub = %self.hub,
            connection_id,
            group,
            owner = %owner.server_id(),
            "Forwarded group join"
        );
        Ok(())
    }

    /// Remove a connection from a group. The connection may live on another
    /// server of the hub.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty ids, `ConnectionNotFound` if no server
    /// holds the connection, or the unsubscribe error of the last member.
    pub async fn leave_group(
        &self,
        connection_id: &str,
        group: &str,
    ) -> Result<(), BackplaneError> {
        require_id("connection id", connection_id)?;
        require_id("group name", group)?;

        if self.registry.contains(connection_id) {
            membership::leave_local(
                &self.runtime,
                &self.registry,
                &self.observer,
                &self.hub,
                connection_id,
                group,
            )
            .await?;
            return Ok(());
        }

        let owner = self.owner_of(connection_id).await?;
        call_with_timeout(
            self.runtime.settings().call_timeout,
            owner.endpoint().leave_group(connection_id, group),
        )
        .await?;
        debug!(
            target: "backplane.routing",
            hub = %self.hub,
            connection_id,
            group,
            owner = %owner.server_id(),
            "Forwarded group leave"
        );
        Ok(())
    }

    /// Endpoint of the other server hosting `connection_id`.
    async fn owner_of(&self, connection_id: &str) -> Result<ObserverHandle, BackplaneError> {
        let servers = self
            .runtime
            .coordinator(EntityKey::connection(&self.hub, connection_id))
            .subscribers()
            .await?;

        servers
            .iter()
            .filter(|id| **id != self.server_id)
            .find_map(|id| self.runtime.directory().resolve(&self.hub, id))
            .ok_or_else(|| BackplaneError::ConnectionNotFound(connection_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    /// Send to every connection of the hub.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty method name.
    pub async fn send_all(&self, invocation: Invocation) -> Result<(), BackplaneError> {
        require_method(&invocation)?;
        let delivery = Delivery::new(EntityKey::all(&self.hub), Arc::new(invocation));
        self.send("send_all", delivery).await;
        Ok(())
    }

    /// Send to every connection of the hub except `excluded`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty method name.
    pub async fn send_all_except(
        &self,
        invocation: Invocation,
        excluded: &[String],
    ) -> Result<(), BackplaneError> {
        require_method(&invocation)?;
        let delivery = Delivery::with_excluded(
            EntityKey::all(&self.hub),
            Arc::new(invocation),
            excluded.to_vec(),
        );
        self.send("send_all_except", delivery).await;
        Ok(())
    }

    /// Send to one connection, wherever it is hosted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty connection id or method name.
    pub async fn send_connection(
        &self,
        connection_id: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("connection id", connection_id)?;
        require_method(&invocation)?;
        let delivery = Delivery::new(
            EntityKey::connection(&self.hub, connection_id),
            Arc::new(invocation),
        );
        self.send("send_connection", delivery).await;
        Ok(())
    }

    /// Send to several connections.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any id or the method name is empty.
    pub async fn send_connections(
        &self,
        connection_ids: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("connection id", connection_ids)?;
        require_method(&invocation)?;
        let keys = connection_ids
            .iter()
            .map(|id| EntityKey::connection(&self.hub, id))
            .collect();
        self.send_many("send_connections", keys, invocation).await;
        Ok(())
    }

    /// Send to every member of a group.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty group name or method name.
    pub async fn send_group(
        &self,
        group: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("group name", group)?;
        require_method(&invocation)?;
        let delivery = Delivery::new(EntityKey::group(&self.hub, group), Arc::new(invocation));
        self.send("send_group", delivery).await;
        Ok(())
    }

    /// Send to every member of several groups.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any group name or the method name is empty.
    pub async fn send_groups(
        &self,
        groups: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("group name", groups)?;
        require_method(&invocation)?;
        let keys = groups
            .iter()
            .map(|group| EntityKey::group(&self.hub, group))
            .collect();
        self.send_many("send_groups", keys, invocation).await;
        Ok(())
    }

    /// Send to every member of a group except `excluded`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty group name or method name.
    pub async fn send_group_except(
        &self,
        group: &str,
        invocation: Invocation,
        excluded: &[String],
    ) -> Result<(), BackplaneError> {
        require_id("group name", group)?;
        require_method(&invocation)?;
        let delivery = Delivery::with_excluded(
            EntityKey::group(&self.hub, group),
            Arc::new(invocation),
            excluded.to_vec(),
        );
        self.send("send_group_except", delivery).await;
        Ok(())
    }

    /// Send to every connection of a user.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id or method name.
    pub async fn send_user(
        &self,
        user_id: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("user id", user_id)?;
        require_method(&invocation)?;
        let delivery = Delivery::new(EntityKey::user(&self.hub, user_id), Arc::new(invocation));
        self.send("send_user", delivery).await;
        Ok(())
    }

    /// Send to every connection of several users.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any user id or the method name is empty.
    pub async fn send_users(
        &self,
        user_ids: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("user id", user_ids)?;
        require_method(&invocation)?;
        let keys = user_ids
            .iter()
            .map(|user| EntityKey::user(&self.hub, user))
            .collect();
        self.send_many("send_users", keys, invocation).await;
        Ok(())
    }

    /// One payload, many targets. The targets are sent concurrently.
    async fn send_many(
        &self,
        operation: &'static str,
        keys: Vec<EntityKey>,
        invocation: Invocation,
    ) {
        let invocation = Arc::new(invocation);
        join_all(
            keys.into_iter()
                .map(|key| self.send(operation, Delivery::new(key, Arc::clone(&invocation)))),
        )
        .await;
    }

    /// Local write and remote fan-out, run concurrently.
    ///
    /// A connection target held by this server is delivered locally only.
    async fn send(&self, operation: &'static str, delivery: Delivery) {
        let started = Instant::now();
        let local_only = delivery.target.kind == EntityKind::Connection
            && self.registry.contains(&delivery.target.id);

        let local = deliver_local(&self.registry, &delivery);
        let remote = async {
            if local_only {
                return None;
            }
            let coordinator = self.runtime.coordinator(delivery.target.clone());
            Some(
                coordinator
                    .notify(delivery.clone(), Some(self.server_id.clone()))
                    .await,
            )
        };
        let (report, remote) = tokio::join!(local, remote);

        let mut status = if report.failed == 0 { "success" } else { "error" };
        match remote {
            Some(Ok(outcome)) => {
                if !outcome.evicted.is_empty() {
                    status = "error";
                }
                debug!(
                    target: "backplane.routing",
                    operation,
                    entity = %delivery.target,
                    local_delivered = report.delivered,
                    local_failed = report.failed,
                    remote_delivered = outcome.delivered,
                    remote_evicted = outcome.evicted.len(),
                    "Send completed"
                );
            }
            Some(Err(e)) => {
                status = "error";
                warn!(
                    target: "backplane.routing",
                    operation,
                    entity = %delivery.target,
                    local_delivered = report.delivered,
                    error = %e,
                    "Remote fan-out failed"
                );
            }
            None => {
                debug!(
                    target: "backplane.routing",
                    operation,
                    entity = %delivery.target,
                    local_delivered = report.delivered,
                    local_failed = report.failed,
                    "Send completed locally"
                );
            }
        }

        prom::record_send(operation, status, started.elapsed());
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Servers subscribed to a group's coordinator.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty group name, or the coordinator call
    /// error.
    pub async fn group_servers(&self, group: &str) -> Result<Vec<ServerId>, BackplaneError> {
        require_id("group name", group)?;
        self.runtime
            .coordinator(EntityKey::group(&self.hub, group))
            .subscribers()
            .await
    }

    /// Servers subscribed to a user's coordinator.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id, or the coordinator call error.
    pub async fn user_servers(&self, user_id: &str) -> Result<Vec<ServerId>, BackplaneError> {
        require_id("user id", user_id)?;
        self.runtime
            .coordinator(EntityKey::user(&self.hub, user_id))
            .subscribers()
            .await
    }

    /// Servers with at least one connection to the hub.
    ///
    /// # Errors
    ///
    /// The coordinator call error.
    pub async fn hub_servers(&self) -> Result<Vec<ServerId>, BackplaneError> {
        self.runtime
            .coordinator(EntityKey::all(&self.hub))
            .subscribers()
            .await
    }

    /// Servers with an unexpired presence heartbeat.
    ///
    /// # Errors
    ///
    /// The presence call error.
    pub async fn live_servers(&self) -> Result<Vec<ServerId>, BackplaneError> {
        self.presence().live_servers().await
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Leave the hub cleanly: stop heartbeating, unsubscribe from every
    /// coordinator, deregister presence and drop all local connections.
    pub async fn shutdown(&self) {
        self.stop_heartbeat();

        let mut keys = Vec::new();
        if !self.registry.is_empty() {
            keys.push(EntityKey::all(&self.hub));
        }
        keys.extend(
            self.registry
                .local_groups()
                .iter()
                .map(|group| EntityKey::group(&self.hub, group)),
        );
        keys.extend(
            self.registry
                .local_users()
                .iter()
                .map(|user| EntityKey::user(&self.hub, user)),
        );
        keys.extend(
            self.registry
                .connection_ids()
                .iter()
                .map(|id| EntityKey::connection(&self.hub, id)),
        );

        let subscriptions = keys.len();
        let failed = self.unsubscribe_keys(keys).await;

        if let Err(e) = self.presence().deregister(&self.server_id).await {
            warn!(
                target: "backplane.routing",
                hub = %self.hub,
                server_id = %self.server_id,
                error = %e,
                "Failed to deregister presence"
            );
        }

        self.runtime
            .directory()
            .unregister(&self.hub, &self.server_id);
        let connections = self.registry.len();
        self.registry.clear();
        prom::set_connections_active(&self.hub, 0);

        info!(
            target: "backplane.routing",
            hub = %self.hub,
            server_id = %self.server_id,
            connections,
            subscriptions,
            failed_unsubscribes = failed,
            "Routing frontend stopped"
        );
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn presence(&self) -> PresenceRef {
        self.runtime.presence(&self.hub)
    }

    /// Subscribe to every key concurrently. On any failure the successful
    /// subscriptions are undone and the first error is returned.
    async fn subscribe_keys(&self, keys: Vec<EntityKey>) -> Result<(), BackplaneError> {
        let results = join_all(keys.iter().map(|key| {
            let coordinator = self.runtime.coordinator(key.clone());
            let observer = self.observer.clone();
            async move { coordinator.subscribe(observer).await }
        }))
        .await;

        let mut subscribed = Vec::new();
        let mut first_error = None;
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(()) => subscribed.push(key),
                Err(e) => {
                    warn!(
                        target: "backplane.routing",
                        entity = %key,
                        error = %e,
                        "Subscribe failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => {
                self.unsubscribe_keys(subscribed).await;
                Err(e)
            }
        }
    }

    /// Unsubscribe from every key concurrently. Returns the number of
    /// failures, which are logged.
    async fn unsubscribe_keys(&self, keys: Vec<EntityKey>) -> usize {
        let results = join_all(keys.into_iter().map(|key| {
            let coordinator = self.runtime.coordinator(key);
            let server_id = &self.server_id;
            async move {
                let result = coordinator.unsubscribe(server_id).await;
                (coordinator, result)
            }
        }))
        .await;

        let mut failed = 0;
        for (coordinator, result) in results {
            if let Err(e) = result {
                failed += 1;
                warn!(
                    target: "backplane.routing",
                    entity = %coordinator.key(),
                    error = %e,
                    "Unsubscribe failed"
                );
            }
        }
        failed
    }

    fn heartbeat_slot(&self) -> MutexGuard<'_, Option<HeartbeatTask>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (Re)start the heartbeat loop.
    fn start_heartbeat(&self) {
        let cancel_token = self.runtime.child_token();
        let task = tokio::spawn(heartbeat_loop(
            self.runtime.clone(),
            self.hub.clone(),
            self.observer.clone(),
            Arc::clone(&self.registry),
            self.heartbeat_interval,
            cancel_token.clone(),
        ));

        if let Some(previous) = self
            .heartbeat_slot()
            .replace(HeartbeatTask { cancel_token, task })
        {
            previous.stop();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat_slot().take() {
            task.stop();
        }
    }
}

impl Drop for RoutingFrontend {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

/// Heartbeat every `interval` while the registry holds a connection.
///
/// A heartbeat that (re)registers the server means it was expired while still
/// serving; every local subscription is then restored.
async fn heartbeat_loop(
    runtime: ActorRuntime,
    hub: String,
    observer: ObserverHandle,
    registry: Arc<LocalConnectionRegistry>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let presence = runtime.presence(&hub);
    let server_id = observer.server_id();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => break,

            _ = ticker.tick() => {
                if registry.is_empty() {
                    debug!(
                        target: "backplane.routing",
                        hub = %presence.hub(),
                        server_id = %server_id,
                        "No local connections, stopping heartbeat"
                    );
                    break;
                }
                if send_heartbeat(&presence, server_id).await {
                    warn!(
                        target: "backplane.routing",
                        hub = %hub,
                        server_id = %server_id,
                        "Re-registered after presence expiry, restoring subscriptions"
                    );
                    membership::resubscribe_local(&runtime, &registry, &observer, &hub).await;
                }
            }
        }
    }
}

/// Returns whether the heartbeat (re)registered the server.
async fn send_heartbeat(presence: &PresenceRef, server_id: &ServerId) -> bool {
    match presence.heartbeat(server_id).await {
        Ok(HeartbeatOutcome {
            registered,
            evicted,
        }) => {
            prom::record_presence_heartbeat("success");
            if !evicted.is_empty() {
                info!(
                    target: "backplane.routing",
                    hub = %presence.hub(),
                    server_id = %server_id,
                    evicted = ?evicted.iter().map(ServerId::as_str).collect::<Vec<_>>(),
                    "Heartbeat expired other servers"
                );
            }
            registered
        }
        Err(e) => {
            prom::record_presence_heartbeat("error");
            warn!(
                target: "backplane.routing",
                hub = %presence.hub(),
                server_id = %server_id,
                error = %e,
                "Presence heartbeat failed"
            );
            false
        }
    }
}
