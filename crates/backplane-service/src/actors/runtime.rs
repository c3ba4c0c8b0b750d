//! In-process actor runtime.
//!
//! The runtime hands out cheap references ([`CoordinatorRef`],
//! [`PresenceRef`]) addressed by key. Nothing runs until the first call: the
//! reference looks the key up in the activation table and spawns a new actor
//! task when there is no live activation.
//!
//! ```text
//! ActorRuntime (one per process, cheap to clone)
//! ├── ActivationTable: EntityKey -> EntityCoordinator (lazy, self-deactivating)
//! ├── presence: hub -> ServerPresenceCoordinator (lazy, lives until shutdown)
//! ├── StateStore (durable coordinator state)
//! └── LocalObserverDirectory (server id -> observer endpoint)
//! ```
//!
//! A coordinator that deactivates while a call is queued answers
//! `Deactivated`; references re-activate and retry a bounded number of times.
//! Control calls (subscribe, unsubscribe, evict, presence) are bounded by the
//! call timeout. Fan-out calls are not: each observer delivery inside the
//! coordinator is bounded instead.

use super::coordinator::{
    ActivationTable, CoordinatorContext, CoordinatorHandle, CoordinatorSettings, EntityCoordinator,
};
use super::messages::{
    CoordinatorMessage, CoordinatorStatus, HeartbeatOutcome, NotifyOutcome, Reply,
};
use super::metrics::ActorMetrics;
use super::presence::{PresenceHandle, ServerPresenceCoordinator};
use crate::errors::BackplaneError;
use crate::observer::{Delivery, LocalObserverDirectory, ObserverHandle};
use crate::state::StateStore;

use common::types::{EntityKey, ServerId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// How many times a reference re-activates a coordinator that deactivated
/// under it before giving up.
const MAX_ACTIVATION_ATTEMPTS: u32 = 3;

/// Default liveness reminder period (idle cleanup).
pub const DEFAULT_LIVENESS_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound for one remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default presence expiry window.
pub const DEFAULT_PRESENCE_EXPIRY: Duration = Duration::from_secs(30);

/// Bound `call` by `timeout`, mapping expiry to [`BackplaneError::Timeout`].
pub async fn call_with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, BackplaneError>>,
) -> Result<T, BackplaneError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BackplaneError::Timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

/// Runtime timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Coordinator liveness reminder period.
    pub liveness_period: Duration,
    /// Bound for one remote call.
    pub call_timeout: Duration,
    /// Servers whose last heartbeat is older than this are evicted.
    pub presence_expiry: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            liveness_period: DEFAULT_LIVENESS_PERIOD,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            presence_expiry: DEFAULT_PRESENCE_EXPIRY,
        }
    }
}

struct RuntimeInner {
    coordinators: Arc<ActivationTable>,
    presence: Mutex<HashMap<String, PresenceHandle>>,
    store: Arc<dyn StateStore>,
    directory: Arc<LocalObserverDirectory>,
    metrics: Arc<ActorMetrics>,
    settings: RuntimeSettings,
    cancel_token: CancellationToken,
    next_activation_id: AtomicU64,
}

/// Handle to the process-wide actor runtime. Cheap to clone.
#[derive(Clone)]
pub struct ActorRuntime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning runtime handle held by long-lived actors.
#[derive(Clone)]
pub struct WeakActorRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakActorRuntime {
    #[must_use]
    pub fn upgrade(&self) -> Option<ActorRuntime> {
        self.inner.upgrade().map(|inner| ActorRuntime { inner })
    }
}

impl ActorRuntime {
    /// Create a runtime over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, settings: RuntimeSettings) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                coordinators: Arc::new(ActivationTable::default()),
                presence: Mutex::new(HashMap::new()),
                store,
                directory: Arc::new(LocalObserverDirectory::new()),
                metrics: ActorMetrics::new(),
                settings,
                cancel_token: CancellationToken::new(),
                next_activation_id: AtomicU64::new(1),
            }),
        }
    }

    /// Reference to the coordinator for `key`. Does not activate it.
    #[must_use]
    pub fn coordinator(&self, key: EntityKey) -> CoordinatorRef {
        CoordinatorRef {
            key,
            runtime: self.clone(),
        }
    }

    /// Reference to the presence coordinator of `hub`. Does not activate it.
    #[must_use]
    pub fn presence(&self, hub: &str) -> PresenceRef {
        PresenceRef {
            hub: hub.to_string(),
            runtime: self.clone(),
        }
    }

    /// Observer endpoints of every server in this process.
    #[must_use]
    pub fn directory(&self) -> &Arc<LocalObserverDirectory> {
        &self.inner.directory
    }

    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.inner.metrics
    }

    /// Keys with a live coordinator activation.
    #[must_use]
    pub fn active_coordinators(&self) -> Vec<EntityKey> {
        self.inner.coordinators.keys()
    }

    /// Whether `key` has a live coordinator activation.
    #[must_use]
    pub fn is_active(&self, key: &EntityKey) -> bool {
        self.inner.coordinators.contains(key)
    }

    /// Child of the root token for tasks that must stop with the runtime.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancel_token.child_token()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakActorRuntime {
        WeakActorRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop every actor and reminder and forget all activations.
    ///
    /// Durable state is left as is.
    pub fn shutdown(&self) {
        info!(
            target: "backplane.actor.runtime",
            active_coordinators = self.inner.coordinators.len(),
            "Shutting down actor runtime"
        );

        self.inner.cancel_token.cancel();
        self.inner.coordinators.clear();
        self.presence_table().clear();
        self.inner.directory.clear();
    }

    fn ensure_running(&self) -> Result<(), BackplaneError> {
        if self.is_shut_down() {
            Err(BackplaneError::Unreachable(
                "actor runtime is shut down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn activate_coordinator(&self, key: &EntityKey) -> Result<CoordinatorHandle, BackplaneError> {
        self.ensure_running()?;

        let inner = &self.inner;
        let handle = inner.coordinators.get_or_activate(key, || {
            let activation_id = inner.next_activation_id.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "backplane.actor.runtime",
                entity = %key,
                activation_id,
                "Activating coordinator"
            );

            let ctx = CoordinatorContext {
                store: Arc::clone(&inner.store),
                directory: Arc::clone(&inner.directory) as _,
                table: Arc::clone(&inner.coordinators),
                metrics: Arc::clone(&inner.metrics),
                settings: CoordinatorSettings {
                    liveness_period: inner.settings.liveness_period,
                    call_timeout: inner.settings.call_timeout,
                },
            };

            EntityCoordinator::spawn(
                key.clone(),
                activation_id,
                ctx,
                inner.cancel_token.child_token(),
            )
        });

        Ok(handle)
    }

    fn presence_table(&self) -> MutexGuard<'_, HashMap<String, PresenceHandle>> {
        self.inner
            .presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn activate_presence(&self, hub: &str) -> Result<PresenceHandle, BackplaneError> {
        self.ensure_running()?;

        let mut table = self.presence_table();
        if let Some(handle) = table.get(hub) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        trace!(target: "backplane.actor.runtime", hub, "Activating presence coordinator");
        let handle = ServerPresenceCoordinator::spawn(
            hub.to_string(),
            self.downgrade(),
            self.inner.settings,
            self.inner.cancel_token.child_token(),
        );
        table.insert(hub.to_string(), handle.clone());
        Ok(handle)
    }
}

/// Reference to the coordinator of one entity.
#[derive(Clone)]
pub struct CoordinatorRef {
    key: EntityKey,
    runtime: ActorRuntime,
}

impl CoordinatorRef {
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Subscribe a server's observer (idempotent).
    pub async fn subscribe(&self, observer: ObserverHandle) -> Result<(), BackplaneError> {
        self.call_bounded(|respond_to| CoordinatorMessage::Subscribe {
            observer: observer.clone(),
            respond_to,
        })
        .await
    }

    /// Unsubscribe a server (idempotent).
    pub async fn unsubscribe(&self, server_id: &ServerId) -> Result<(), BackplaneError> {
        self.call_bounded(|respond_to| CoordinatorMessage::Unsubscribe {
            server_id: server_id.clone(),
            respond_to,
        })
        .await
    }

    /// Remove a server declared dead. Returns whether it was subscribed.
    pub async fn evict(&self, server_id: &ServerId) -> Result<bool, BackplaneError> {
        self.call_bounded(|respond_to| CoordinatorMessage::Evict {
            server_id: server_id.clone(),
            respond_to,
        })
        .await
    }

    /// Fan `delivery` out to every subscribed server except `origin`.
    pub async fn notify(
        &self,
        delivery: Delivery,
        origin: Option<ServerId>,
    ) -> Result<NotifyOutcome, BackplaneError> {
        self.call(|respond_to| CoordinatorMessage::Notify {
            delivery: delivery.clone(),
            origin: origin.clone(),
            respond_to,
        })
        .await
    }

    /// Snapshot of subscribed server ids.
    pub async fn subscribers(&self) -> Result<Vec<ServerId>, BackplaneError> {
        self.call_bounded(|respond_to| CoordinatorMessage::GetSubscribers { respond_to })
            .await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, BackplaneError> {
        self.call_bounded(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await
    }

    async fn call_bounded<T>(
        &self,
        message: impl Fn(Reply<T>) -> CoordinatorMessage,
    ) -> Result<T, BackplaneError> {
        call_with_timeout(self.runtime.settings().call_timeout, self.call(message)).await
    }

    async fn call<T>(
        &self,
        message: impl Fn(Reply<T>) -> CoordinatorMessage,
    ) -> Result<T, BackplaneError> {
        for attempt in 1..=MAX_ACTIVATION_ATTEMPTS {
            let handle = self.runtime.activate_coordinator(&self.key)?;
            match handle.request(&message).await {
                Err(BackplaneError::Deactivated) => {
                    trace!(
                        target: "backplane.actor.runtime",
                        entity = %self.key,
                        activation_id = handle.activation_id(),
                        attempt,
                        "Coordinator deactivated under call, re-activating"
                    );
                }
                result => return result,
            }
        }

        Err(BackplaneError::Deactivated)
    }
}

/// Reference to the presence coordinator of one hub.
#[derive(Clone)]
pub struct PresenceRef {
    hub: String,
    runtime: ActorRuntime,
}

impl PresenceRef {
    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Record a heartbeat. Reports whether the server was (re)registered and
    /// which servers the expiry sweep evicted.
    pub async fn heartbeat(
        &self,
        server_id: &ServerId,
    ) -> Result<HeartbeatOutcome, BackplaneError> {
        let handle = self.runtime.activate_presence(&self.hub)?;
        call_with_timeout(
            self.runtime.settings().call_timeout,
            handle.heartbeat(server_id.clone()),
        )
        .await
    }

    /// Remove a server that is shutting down cleanly.
    pub async fn deregister(&self, server_id: &ServerId) -> Result<bool, BackplaneError> {
        let handle = self.runtime.activate_presence(&self.hub)?;
        call_with_timeout(
            self.runtime.settings().call_timeout,
            handle.deregister(server_id.clone()),
        )
        .await
    }

    /// Servers with an unexpired heartbeat.
    pub async fn live_servers(&self) -> Result<Vec<ServerId>, BackplaneError> {
        let handle = self.runtime.activate_presence(&self.hub)?;
        call_with_timeout(self.runtime.settings().call_timeout, handle.live_servers()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observer::ServerObserver;
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;

    struct IdleObserver;

    #[async_trait]
    impl ServerObserver for IdleObserver {
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

    fn runtime() -> ActorRuntime {
        ActorRuntime::new(Arc::new(MemoryStateStore::new()), RuntimeSettings::default())
    }

    #[tokio::test]
    async fn test_call_with_timeout_maps_elapsed() {
        let result: Result<(), BackplaneError> = call_with_timeout(
            Duration::from_millis(10),
            std::future::pending::<Result<(), BackplaneError>>(),
        )
        .await;
        assert_eq!(result, Err(BackplaneError::Timeout(10)));
    }

    #[tokio::test]
    async fn test_reference_reactivates_after_teardown() {
        let runtime = runtime();
        let key = EntityKey::group("chat", "g1");
        let coordinator = runtime.coordinator(key.clone());
        let observer = ObserverHandle::new(ServerId::new("srv-a"), Arc::new(IdleObserver));

        coordinator.subscribe(observer.clone()).await.unwrap();
        let first = coordinator.status().await.unwrap().activation_id;

        coordinator.unsubscribe(&ServerId::new("srv-a")).await.unwrap();
        coordinator.subscribe(observer).await.unwrap();
        let second = coordinator.status().await.unwrap();

        assert_ne!(first, second.activation_id);
        assert_eq!(second.subscriber_count, 1);
        assert!(second.reminder_active);
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let runtime = runtime();
        runtime.shutdown();

        let result = runtime
            .coordinator(EntityKey::all("chat"))
            .subscribers()
            .await;
        assert!(matches!(result, Err(BackplaneError::Unreachable(_))));
        assert!(runtime.active_coordinators().is_empty());
    }
}
