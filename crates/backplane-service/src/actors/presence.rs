//! `ServerPresenceCoordinator` - live servers of one hub.
//!
//! Every frontend with at least one connection heartbeats its hub's presence
//! coordinator. Each heartbeat upserts the caller's timestamp and sweeps
//! entries older than the expiry window. For every server evicted by a sweep:
//!
//! 1. the server is evicted from the hub-level `all` coordinator
//! 2. every still-live server's observer receives `server_evicted`, so it can
//!    evict the dead server from the group and user coordinators it uses
//!
//! Both steps run on a spawned task; the heartbeat reply does not wait for
//! them.

use super::messages::{HeartbeatOutcome, PresenceMessage, Reply};
use super::metrics::{ActorType, MailboxMonitor};
use super::runtime::{call_with_timeout, ActorRuntime, RuntimeSettings, WeakActorRuntime};
use crate::errors::BackplaneError;
use crate::observability::metrics as prom;
use crate::observer::ObserverDirectory;

use common::types::{EntityKey, ServerId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Presence mailbox size.
const PRESENCE_CHANNEL_BUFFER: usize = 256;

/// Mailbox side of a hub's presence coordinator.
#[derive(Clone)]
pub(crate) struct PresenceHandle {
    sender: mpsc::Sender<PresenceMessage>,
    mailbox: Arc<MailboxMonitor>,
}

impl PresenceHandle {
    async fn request<T>(
        &self,
        message: impl FnOnce(Reply<T>) -> PresenceMessage,
    ) -> Result<T, BackplaneError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| BackplaneError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();

        rx.await
            .map_err(|e| BackplaneError::Internal(format!("response receive failed: {e}")))?
    }

    pub(crate) async fn heartbeat(
        &self,
        server_id: ServerId,
    ) -> Result<HeartbeatOutcome, BackplaneError> {
        self.request(|respond_to| PresenceMessage::Heartbeat {
            server_id,
            respond_to,
        })
        .await
    }

    pub(crate) async fn deregister(&self, server_id: ServerId) -> Result<bool, BackplaneError> {
        self.request(|respond_to| PresenceMessage::Deregister {
            server_id,
            respond_to,
        })
        .await
    }

    pub(crate) async fn live_servers(&self) -> Result<Vec<ServerId>, BackplaneError> {
        self.request(|respond_to| PresenceMessage::LiveServers { respond_to })
            .await
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The presence actor of one hub.
pub(crate) struct ServerPresenceCoordinator {
    hub: String,
    receiver: mpsc::Receiver<PresenceMessage>,
    cancel_token: CancellationToken,
    runtime: WeakActorRuntime,
    expiry: Duration,
    call_timeout: Duration,
    last_seen: HashMap<ServerId, Instant>,
    mailbox: Arc<MailboxMonitor>,
}

impl ServerPresenceCoordinator {
    pub(crate) fn spawn(
        hub: String,
        runtime: WeakActorRuntime,
        settings: RuntimeSettings,
        cancel_token: CancellationToken,
    ) -> PresenceHandle {
        let (sender, receiver) = mpsc::channel(PRESENCE_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Presence, hub.clone()));

        let actor = Self {
            hub,
            receiver,
            cancel_token,
            runtime,
            expiry: settings.presence_expiry,
            call_timeout: settings.call_timeout,
            last_seen: HashMap::new(),
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        PresenceHandle { sender, mailbox }
    }

    #[instrument(skip_all, name = "backplane.actor.presence", fields(hub = %self.hub))]
    async fn run(mut self) {
        info!(
            target: "backplane.actor.presence",
            hub = %self.hub,
            expiry_secs = self.expiry.as_secs(),
            "ServerPresenceCoordinator started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.handle_message(message);
                    self.mailbox.record_dequeue();
                }
            }
        }

        info!(
            target: "backplane.actor.presence",
            hub = %self.hub,
            live_servers = self.last_seen.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ServerPresenceCoordinator stopped"
        );
    }

    fn handle_message(&mut self, message: PresenceMessage) {
        match message {
            PresenceMessage::Heartbeat {
                server_id,
                respond_to,
            } => {
                let outcome = self.heartbeat(server_id);
                let _ = respond_to.send(Ok(outcome));
            }

            PresenceMessage::Deregister {
                server_id,
                respond_to,
            } => {
                let known = self.last_seen.remove(&server_id).is_some();
                debug!(
                    target: "backplane.actor.presence",
                    hub = %self.hub,
                    server_id = %server_id,
                    known,
                    "Server deregistered"
                );
                let _ = respond_to.send(Ok(known));
            }

            PresenceMessage::LiveServers { respond_to } => {
                let now = Instant::now();
                let mut live: Vec<ServerId> = self
                    .last_seen
                    .iter()
                    .filter(|(_, last)| !self.is_expired(now, **last))
                    .map(|(id, _)| id.clone())
                    .collect();
                live.sort();
                let _ = respond_to.send(Ok(live));
            }
        }
    }

    fn is_expired(&self, now: Instant, last: Instant) -> bool {
        now.duration_since(last) > self.expiry
    }

    fn heartbeat(&mut self, server_id: ServerId) -> HeartbeatOutcome {
        let now = Instant::now();
        let registered = match self.last_seen.insert(server_id.clone(), now) {
            None => true,
            Some(previous) => self.is_expired(now, previous),
        };
        if registered {
            info!(
                target: "backplane.actor.presence",
                hub = %self.hub,
                server_id = %server_id,
                "Server registered"
            );
        }

        let mut evicted: Vec<ServerId> = self
            .last_seen
            .iter()
            .filter(|(_, last)| self.is_expired(now, **last))
            .map(|(id, _)| id.clone())
            .collect();
        evicted.sort();

        if evicted.is_empty() {
            return HeartbeatOutcome {
                registered,
                evicted,
            };
        }

        for id in &evicted {
            self.last_seen.remove(id);
        }

        warn!(
            target: "backplane.actor.presence",
            hub = %self.hub,
            evicted = ?evicted.iter().map(ServerId::as_str).collect::<Vec<_>>(),
            live = self.last_seen.len(),
            "Evicted servers with expired heartbeats"
        );
        prom::record_presence_evictions(evicted.len());

        if let Some(runtime) = self.runtime.upgrade() {
            let live: Vec<ServerId> = self.last_seen.keys().cloned().collect();
            for dead in &evicted {
                tokio::spawn(propagate_eviction(
                    runtime.clone(),
                    self.hub.clone(),
                    dead.clone(),
                    live.clone(),
                    self.call_timeout,
                ));
            }
        }

        HeartbeatOutcome {
            registered,
            evicted,
        }
    }
}

/// Remove `dead` from the hub's `all` coordinator and tell every live server.
async fn propagate_eviction(
    runtime: ActorRuntime,
    hub: String,
    dead: ServerId,
    live: Vec<ServerId>,
    call_timeout: Duration,
) {
    match runtime.coordinator(EntityKey::all(&hub)).evict(&dead).await {
        Ok(was_subscribed) => debug!(
            target: "backplane.actor.presence",
            hub = %hub,
            server_id = %dead,
            was_subscribed,
            "Evicted expired server from hub coordinator"
        ),
        Err(e) => warn!(
            target: "backplane.actor.presence",
            hub = %hub,
            server_id = %dead,
            error = %e,
            "Failed to evict expired server from hub coordinator"
        ),
    }

    let observers: Vec<_> = live
        .iter()
        .filter_map(|id| runtime.directory().resolve(&hub, id))
        .collect();

    let results = join_all(observers.iter().map(|observer| {
        let dead = &dead;
        async move {
            let result =
                call_with_timeout(call_timeout, observer.endpoint().server_evicted(dead)).await;
            (observer.server_id(), result)
        }
    }))
    .await;

    for (server_id, result) in results {
        if let Err(e) = result {
            debug!(
                target: "backplane.actor.presence",
                hub = %hub,
                server_id = %server_id,
                error = %e,
                "Server did not acknowledge eviction notice"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::actors::runtime::{ActorRuntime, RuntimeSettings};
    use crate::state::MemoryStateStore;
    use common::types::ServerId;
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime() -> ActorRuntime {
        ActorRuntime::new(
            Arc::new(MemoryStateStore::new()),
            RuntimeSettings {
                presence_expiry: Duration::from_secs(30),
                ..RuntimeSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_server_evicted_by_next_heartbeat() {
        let runtime = runtime();
        let presence = runtime.presence("chat");
        let a = ServerId::new("srv-a");
        let b = ServerId::new("srv-b");

        presence.heartbeat(&a).await.unwrap();
        presence.heartbeat(&b).await.unwrap();
        assert_eq!(presence.live_servers().await.unwrap(), vec![a.clone(), b.clone()]);

        tokio::time::advance(Duration::from_secs(20)).await;
        let outcome = presence.heartbeat(&a).await.unwrap();
        assert!(!outcome.registered);
        assert!(outcome.evicted.is_empty());

        tokio::time::advance(Duration::from_secs(15)).await;
        let outcome = presence.heartbeat(&a).await.unwrap();
        assert_eq!(outcome.evicted, vec![b]);
        assert_eq!(presence.live_servers().await.unwrap(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_registration() {
        let runtime = runtime();
        let presence = runtime.presence("chat");
        let a = ServerId::new("srv-a");

        assert!(presence.heartbeat(&a).await.unwrap().registered);
        assert!(!presence.heartbeat(&a).await.unwrap().registered);

        // A heartbeat after a gap longer than the expiry re-registers, even
        // when no other server swept the stale entry.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(presence.heartbeat(&a).await.unwrap().registered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_servers_excludes_expired_entries() {
        let runtime = runtime();
        let presence = runtime.presence("chat");
        let a = ServerId::new("srv-a");

        presence.heartbeat(&a).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(presence.live_servers().await.unwrap(), vec![a.clone()]);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(presence.live_servers().await.unwrap().is_empty());

        presence.heartbeat(&a).await.unwrap();
        assert_eq!(presence.live_servers().await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn test_deregister_removes_server() {
        let runtime = runtime();
        let presence = runtime.presence("chat");
        let a = ServerId::new("srv-a");

        presence.heartbeat(&a).await.unwrap();
        assert!(presence.deregister(&a).await.unwrap());
        assert!(!presence.deregister(&a).await.unwrap());
        assert!(presence.live_servers().await.unwrap().is_empty());
    }
}
