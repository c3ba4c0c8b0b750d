//! Mailbox monitoring and node-level actor counters.
//!
//! | Actor Type  | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Coordinator | < 256  | 256-1024| > 1024   |
//! | Presence    | < 64   | 64-256  | > 256    |

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const COORDINATOR_MAILBOX_NORMAL: usize = 256;
pub const COORDINATOR_MAILBOX_WARNING: usize = 1024;

pub const PRESENCE_MAILBOX_NORMAL: usize = 64;
pub const PRESENCE_MAILBOX_WARNING: usize = 256;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// Entity coordinator (one per active hub/group/user/connection key).
    Coordinator,
    /// Presence registry (one per hub).
    Presence,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Presence => "presence",
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_NORMAL,
            ActorType::Presence => PRESENCE_MAILBOX_NORMAL,
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_WARNING,
            ActorType::Presence => PRESENCE_MAILBOX_WARNING,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks the queue depth of one actor.
///
/// The handle side calls [`record_enqueue`](Self::record_enqueue) after a
/// successful send; the actor calls [`record_dequeue`](Self::record_dequeue)
/// after handling a message.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = self.level_for_depth(new_depth);
        if level != MailboxLevel::Normal {
            prom::set_actor_mailbox_depth(self.actor_type.as_str(), new_depth);
        }

        match level {
            MailboxLevel::Critical => warn!(
                target: "backplane.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "backplane.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    pub fn record_dequeue(&self) {
        // Saturating: a message sent before the monitor was shared is not counted.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Node-wide actor counters shared by the runtime and every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_coordinators: AtomicUsize,
    activations: AtomicU64,
    deactivations: AtomicU64,
    total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A coordinator finished loading its state and is serving messages.
    pub fn coordinator_activated(&self, kind: &str) {
        let active = self.active_coordinators.fetch_add(1, Ordering::Relaxed) + 1;
        self.activations.fetch_add(1, Ordering::Relaxed);
        prom::record_coordinator_activation(kind);
        prom::set_coordinators_active(active);
    }

    /// A coordinator left the activation table.
    pub fn coordinator_deactivated(&self, kind: &str) {
        let previous = self
            .active_coordinators
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        self.deactivations.fetch_add(1, Ordering::Relaxed);
        prom::record_coordinator_deactivation(kind);
        prom::set_coordinators_active(previous.saturating_sub(1));
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active_coordinators(&self) -> usize {
        self.active_coordinators.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn deactivations(&self) -> u64 {
        self.deactivations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.total_messages_processed.load(Ordering::Relaxed)
    }
}
