//! `EntityCoordinator` - routing state for one `{hub, kind, id}` entity.
//!
//! A coordinator tracks which *servers* have at least one local member of its
//! entity and holds one observer handle per such server. It is the only
//! writer of that subscriber set:
//!
//! - `Subscribe` / `Unsubscribe` / `Evict` mutate the set
//! - `Notify` fans a delivery out to every subscriber concurrently; observers
//!   that fail are removed in the same update
//! - `LivenessTick` (from the reminder) pings every subscriber and removes the
//!   ones that fail
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --load--> Active --(set empties)--> Idle --> deactivated
//! ```
//!
//! Durable state is written only when the subscriber count changes. When the
//! set empties, the persisted key is cleared, the reminder is cancelled, the
//! coordinator leaves the activation table and answers anything still queued
//! with [`BackplaneError::Deactivated`]. References re-activate on their next
//! call.

use super::messages::{CoordinatorMessage, CoordinatorStatus, Lifecycle, NotifyOutcome, Reply};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::reminder::Reminder;
use super::runtime::call_with_timeout;
use crate::errors::BackplaneError;
use crate::observability::metrics as prom;
use crate::observer::{Delivery, ObserverDirectory, ObserverHandle};
use crate::state::{self, StateStore, SubscriptionState};

use common::types::{EntityKey, ServerId};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Coordinator mailbox size.
const COORDINATOR_CHANNEL_BUFFER: usize = 1024;

/// Timing settings shared by every coordinator of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Period of the liveness reminder.
    pub liveness_period: Duration,
    /// Upper bound for one observer call (deliver or ping).
    pub call_timeout: Duration,
}

/// Collaborators handed to every coordinator activation.
#[derive(Clone)]
pub(crate) struct CoordinatorContext {
    pub store: Arc<dyn StateStore>,
    pub directory: Arc<dyn ObserverDirectory>,
    pub table: Arc<ActivationTable>,
    pub metrics: Arc<ActorMetrics>,
    pub settings: CoordinatorSettings,
}

/// Mailbox side of one coordinator activation.
#[derive(Clone)]
pub(crate) struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    activation_id: u64,
    mailbox: Arc<MailboxMonitor>,
}

impl CoordinatorHandle {
    /// Send a request and wait for the reply.
    ///
    /// A closed mailbox or a dropped reply channel both mean the activation
    /// went away and surface as [`BackplaneError::Deactivated`].
    pub(crate) async fn request<T>(
        &self,
        message: impl FnOnce(Reply<T>) -> CoordinatorMessage,
    ) -> Result<T, BackplaneError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| BackplaneError::Deactivated)?;
        self.mailbox.record_enqueue();

        rx.await.map_err(|_| BackplaneError::Deactivated)?
    }

    pub(crate) fn activation_id(&self) -> u64 {
        self.activation_id
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Live coordinator activations, one per entity key.
#[derive(Default)]
pub(crate) struct ActivationTable {
    entries: Mutex<HashMap<EntityKey, CoordinatorHandle>>,
}

impl ActivationTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<EntityKey, CoordinatorHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live activation for `key`, or register the one built by
    /// `activate`.
    pub(crate) fn get_or_activate(
        &self,
        key: &EntityKey,
        activate: impl FnOnce() -> CoordinatorHandle,
    ) -> CoordinatorHandle {
        let mut entries = self.lock();
        if let Some(handle) = entries.get(key) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let handle = activate();
        entries.insert(key.clone(), handle.clone());
        handle
    }

    /// Remove `key` only if it still maps to `activation_id`.
    pub(crate) fn remove_if(&self, key: &EntityKey, activation_id: u64) -> bool {
        let mut entries = self.lock();
        if entries
            .get(key)
            .is_some_and(|handle| handle.activation_id == activation_id)
        {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn contains(&self, key: &EntityKey) -> bool {
        self.lock().contains_key(key)
    }

    pub(crate) fn keys(&self) -> Vec<EntityKey> {
        self.lock().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}

/// The coordinator actor. Owned by its task; reached through a
/// [`CoordinatorHandle`].
pub(crate) struct EntityCoordinator {
    key: EntityKey,
    activation_id: u64,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    ctx: CoordinatorContext,
    subscribers: BTreeMap<ServerId, ObserverHandle>,
    lifecycle: Lifecycle,
    reminder: Option<Reminder>,
    mailbox: Arc<MailboxMonitor>,
}

impl EntityCoordinator {
    /// Spawn a new activation for `key` and return its handle.
    ///
    /// Durable state is loaded by the task before the first message is
    /// served; messages sent meanwhile queue in the mailbox.
    pub(crate) fn spawn(
        key: EntityKey,
        activation_id: u64,
        ctx: CoordinatorContext,
        cancel_token: CancellationToken,
    ) -> CoordinatorHandle {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Coordinator, key.to_string()));

        let actor = Self {
            key,
            activation_id,
            receiver,
            self_sender: sender.downgrade(),
            cancel_token,
            ctx,
            subscribers: BTreeMap::new(),
            lifecycle: Lifecycle::Uninitialized,
            reminder: None,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        CoordinatorHandle {
            sender,
            activation_id,
            mailbox,
        }
    }

    #[instrument(
        skip_all,
        name = "backplane.actor.coordinator",
        fields(entity = %self.key, activation_id = self.activation_id)
    )]
    async fn run(mut self) {
        if let Err(e) = self.load().await {
            warn!(
                target: "backplane.actor.coordinator",
                entity = %self.key,
                error = %e,
                "Failed to load coordinator state, refusing activation"
            );
            self.teardown(&e);
            return;
        }

        self.ctx.metrics.coordinator_activated(self.key.kind.as_str());
        debug!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            subscribers = self.subscribers.len(),
            "EntityCoordinator activated"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "backplane.actor.coordinator",
                        entity = %self.key,
                        "EntityCoordinator received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };

                    self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    self.ctx.metrics.record_message_processed();

                    if self.subscribers.is_empty() {
                        self.lifecycle = Lifecycle::Idle;
                        break;
                    }
                }
            }
        }

        self.teardown(&BackplaneError::Deactivated);
        self.ctx
            .metrics
            .coordinator_deactivated(self.key.kind.as_str());

        debug!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            messages_processed = self.mailbox.messages_processed(),
            "EntityCoordinator deactivated"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Subscribe {
                observer,
                respond_to,
            } => {
                let result = self.subscribe(observer).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Unsubscribe {
                server_id,
                respond_to,
            } => {
                let result = self.remove(&server_id, "unsubscribed").await.map(|_| ());
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Evict {
                server_id,
                respond_to,
            } => {
                let result = self.remove(&server_id, "server_expired").await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Notify {
                delivery,
                origin,
                respond_to,
            } => {
                let outcome = self.notify(&delivery, origin.as_ref()).await;
                let _ = respond_to.send(Ok(outcome));
            }

            CoordinatorMessage::LivenessTick => {
                self.liveness_sweep().await;
            }

            CoordinatorMessage::GetSubscribers { respond_to } => {
                let _ = respond_to.send(Ok(self.subscribers.keys().cloned().collect()));
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(Ok(self.status()));
            }
        }
    }

    /// Load durable state and re-resolve observer endpoints.
    async fn load(&mut self) -> Result<(), BackplaneError> {
        let loaded = state::timed("load", self.ctx.store.load(&self.key)).await?;

        if let Some(persisted) = loaded {
            let persisted_count = persisted.subscribers.len();
            for server_id in persisted.subscribers {
                match self.ctx.directory.resolve(&self.key.hub, &server_id) {
                    Some(observer) => {
                        self.subscribers.insert(server_id, observer);
                    }
                    None => {
                        debug!(
                            target: "backplane.actor.coordinator",
                            entity = %self.key,
                            server_id = %server_id,
                            "Dropping subscriber with no registered endpoint"
                        );
                    }
                }
            }

            let dropped = persisted_count.saturating_sub(self.subscribers.len());
            if dropped > 0 {
                prom::record_subscribers_evicted(self.key.kind.as_str(), "unresolved", dropped);
                if let Err(e) = self.persist().await {
                    warn!(
                        target: "backplane.actor.coordinator",
                        entity = %self.key,
                        error = %e,
                        "Failed to persist pruned subscriber set"
                    );
                }
            }
        }

        if self.subscribers.is_empty() {
            self.lifecycle = Lifecycle::Idle;
        } else {
            self.lifecycle = Lifecycle::Active;
            self.ensure_reminder();
        }

        Ok(())
    }

    async fn subscribe(&mut self, observer: ObserverHandle) -> Result<(), BackplaneError> {
        let server_id = observer.server_id().clone();

        // Re-subscribing refreshes the endpoint; the count is unchanged.
        if self
            .subscribers
            .insert(server_id.clone(), observer)
            .is_some()
        {
            return Ok(());
        }

        if let Err(e) = self.persist().await {
            self.subscribers.remove(&server_id);
            return Err(e);
        }

        self.lifecycle = Lifecycle::Active;
        self.ensure_reminder();

        debug!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            server_id = %server_id,
            subscribers = self.subscribers.len(),
            "Server subscribed"
        );

        Ok(())
    }

    /// Remove one subscriber. Returns whether it was present.
    async fn remove(&mut self, server_id: &ServerId, reason: &str) -> Result<bool, BackplaneError> {
        if self.subscribers.remove(server_id).is_none() {
            return Ok(false);
        }

        debug!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            server_id = %server_id,
            reason,
            subscribers = self.subscribers.len(),
            "Server removed"
        );

        if reason != "unsubscribed" {
            prom::record_subscribers_evicted(self.key.kind.as_str(), reason, 1);
        }
        self.after_removal();
        self.persist().await.map(|()| true)
    }

    /// Remove every failed subscriber in one update.
    async fn evict_failed(&mut self, failed: &[ServerId], reason: &str) {
        for server_id in failed {
            self.subscribers.remove(server_id);
        }

        warn!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            evicted = failed.len(),
            remaining = self.subscribers.len(),
            reason,
            "Evicted unreachable subscribers"
        );

        prom::record_subscribers_evicted(self.key.kind.as_str(), reason, failed.len());
        self.after_removal();

        if let Err(e) = self.persist().await {
            warn!(
                target: "backplane.actor.coordinator",
                entity = %self.key,
                error = %e,
                "Failed to persist subscriber set after eviction"
            );
        }
    }

    /// Deliver to every subscriber except `origin`, concurrently.
    async fn notify(&mut self, delivery: &Delivery, origin: Option<&ServerId>) -> NotifyOutcome {
        let start = Instant::now();
        let call_timeout = self.ctx.settings.call_timeout;

        let targets: Vec<ObserverHandle> = self
            .subscribers
            .values()
            .filter(|observer| Some(observer.server_id()) != origin)
            .cloned()
            .collect();

        let results = join_all(targets.iter().map(|observer| async move {
            let result =
                call_with_timeout(call_timeout, observer.endpoint().deliver(delivery)).await;
            (observer.server_id(), result)
        }))
        .await;

        let mut outcome = NotifyOutcome::default();
        for (server_id, result) in results {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!(
                        target: "backplane.actor.coordinator",
                        entity = %self.key,
                        server_id = %server_id,
                        error = %e,
                        "Delivery to subscriber failed"
                    );
                    outcome.evicted.push(server_id.clone());
                }
            }
        }

        if !outcome.evicted.is_empty() {
            self.evict_failed(&outcome.evicted, "delivery_failed").await;
        }

        prom::record_notify(self.key.kind.as_str(), outcome.delivered, start.elapsed());
        outcome
    }

    /// Ping every subscriber; remove the ones that do not answer.
    async fn liveness_sweep(&mut self) {
        let call_timeout = self.ctx.settings.call_timeout;

        let results = join_all(self.subscribers.values().map(|observer| async move {
            let result = call_with_timeout(call_timeout, observer.endpoint().ping()).await;
            (observer.server_id().clone(), result.is_ok())
        }))
        .await;

        let failed: Vec<ServerId> = results
            .into_iter()
            .filter_map(|(server_id, alive)| (!alive).then_some(server_id))
            .collect();

        debug!(
            target: "backplane.actor.coordinator",
            entity = %self.key,
            subscribers = self.subscribers.len(),
            failed = failed.len(),
            "Liveness sweep complete"
        );

        if !failed.is_empty() {
            self.evict_failed(&failed, "ping_failed").await;
        }
    }

    /// Write the subscriber set, or clear it once empty.
    async fn persist(&self) -> Result<(), BackplaneError> {
        if self.subscribers.is_empty() {
            state::timed("clear", self.ctx.store.clear(&self.key)).await
        } else {
            let snapshot = SubscriptionState::from_servers(self.subscribers.keys());
            state::timed("save", self.ctx.store.save(&self.key, &snapshot)).await
        }
    }

    fn after_removal(&mut self) {
        if self.subscribers.is_empty() {
            self.lifecycle = Lifecycle::Idle;
            self.cancel_reminder();
        }
    }

    fn ensure_reminder(&mut self) {
        if self.reminder.as_ref().is_some_and(Reminder::is_active) {
            return;
        }

        self.reminder = Some(Reminder::start(
            self.key.to_string(),
            self.ctx.settings.liveness_period,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
        ));
    }

    fn cancel_reminder(&mut self) {
        if let Some(reminder) = self.reminder.take() {
            reminder.cancel();
        }
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            key: self.key.clone(),
            activation_id: self.activation_id,
            lifecycle: self.lifecycle,
            subscriber_count: self.subscribers.len(),
            reminder_active: self.reminder.as_ref().is_some_and(Reminder::is_active),
            messages_processed: self.mailbox.messages_processed(),
        }
    }

    /// Leave the activation table and reject everything still queued.
    fn teardown(&mut self, reason: &BackplaneError) {
        self.cancel_reminder();
        self.ctx.table.remove_if(&self.key, self.activation_id);
        self.receiver.close();

        while let Ok(message) = self.receiver.try_recv() {
            message.reject(reason.clone());
            self.mailbox.record_dequeue();
        }
    }
}
