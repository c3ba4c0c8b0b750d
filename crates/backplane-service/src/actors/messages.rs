//! Message types for coordinator and presence actors.
//!
//! Request/reply messages carry a `oneshot` sender. Every reply is a
//! `Result` so a deactivating actor can answer queued requests with
//! [`BackplaneError::Deactivated`].

use crate::errors::BackplaneError;
use crate::observer::{Delivery, ObserverHandle};

use common::types::{EntityKey, ServerId};
use tokio::sync::oneshot;

/// Reply channel for actor requests.
pub type Reply<T> = oneshot::Sender<Result<T, BackplaneError>>;

/// Messages handled by an entity coordinator.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Add a server's observer to the subscriber set (idempotent).
    Subscribe {
        observer: ObserverHandle,
        respond_to: Reply<()>,
    },

    /// Remove a server from the subscriber set (idempotent).
    Unsubscribe {
        server_id: ServerId,
        respond_to: Reply<()>,
    },

    /// Remove a server declared dead elsewhere. Replies whether it was present.
    Evict {
        server_id: ServerId,
        respond_to: Reply<bool>,
    },

    /// Fan a delivery out to every subscriber except `origin`.
    Notify {
        delivery: Delivery,
        origin: Option<ServerId>,
        respond_to: Reply<NotifyOutcome>,
    },

    /// Periodic liveness sweep (reminder task, fire-and-forget).
    LivenessTick,

    /// Current subscriber ids.
    GetSubscribers { respond_to: Reply<Vec<ServerId>> },

    /// Coordinator status snapshot.
    GetStatus { respond_to: Reply<CoordinatorStatus> },
}

impl CoordinatorMessage {
    /// Answer the message with an error without handling it.
    pub fn reject(self, error: BackplaneError) {
        match self {
            CoordinatorMessage::Subscribe { respond_to, .. }
            | CoordinatorMessage::Unsubscribe { respond_to, .. } => {
                let _ = respond_to.send(Err(error));
            }
            CoordinatorMessage::Evict { respond_to, .. } => {
                let _ = respond_to.send(Err(error));
            }
            CoordinatorMessage::Notify { respond_to, .. } => {
                let _ = respond_to.send(Err(error));
            }
            CoordinatorMessage::GetSubscribers { respond_to } => {
                let _ = respond_to.send(Err(error));
            }
            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(Err(error));
            }
            CoordinatorMessage::LivenessTick => {}
        }
    }
}

/// Result of one fan-out round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Observers that accepted the delivery.
    pub delivered: usize,
    /// Observers removed because the delivery failed.
    pub evicted: Vec<ServerId>,
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Activated, durable state not loaded yet.
    Uninitialized,
    /// Subscriber set non-empty.
    Active,
    /// Subscriber set empty; the coordinator tears down after the current message.
    Idle,
}

/// Snapshot of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub key: EntityKey,
    pub activation_id: u64,
    pub lifecycle: Lifecycle,
    pub subscriber_count: usize,
    pub reminder_active: bool,
    pub messages_processed: u64,
}

/// Result of one presence heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// The caller was absent or already expired before this heartbeat.
    pub registered: bool,
    /// Servers expired by the sweep this heartbeat triggered.
    pub evicted: Vec<ServerId>,
}

/// Messages handled by a hub's presence registry.
#[derive(Debug)]
pub enum PresenceMessage {
    /// Record a heartbeat and sweep expired servers.
    Heartbeat {
        server_id: ServerId,
        respond_to: Reply<HeartbeatOutcome>,
    },

    /// Remove a server that is shutting down. Replies whether it was known.
    Deregister {
        server_id: ServerId,
        respond_to: Reply<bool>,
    },

    /// Servers with an unexpired heartbeat.
    LiveServers { respond_to: Reply<Vec<ServerId>> },
}
