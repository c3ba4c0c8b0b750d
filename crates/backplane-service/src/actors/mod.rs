//! Actor model for cluster routing state.
//!
//! ```text
//! ActorRuntime (one per process)
//! ├── EntityCoordinator (one per active {hub, kind, id})
//! │   ├── subscriber set: server id -> observer handle (durable)
//! │   └── Reminder (liveness sweep, cancelled at teardown)
//! └── ServerPresenceCoordinator (one per hub)
//!     └── server id -> last heartbeat
//! ```
//!
//! Each actor is a tokio task draining a bounded `mpsc` mailbox; callers talk
//! to it through request/reply messages with a `oneshot` reply channel.

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod presence;
pub mod reminder;
pub mod runtime;

pub use coordinator::CoordinatorSettings;
pub use messages::{CoordinatorStatus, HeartbeatOutcome, Lifecycle, NotifyOutcome};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use runtime::{
    call_with_timeout, ActorRuntime, CoordinatorRef, PresenceRef, RuntimeSettings,
    WeakActorRuntime, DEFAULT_CALL_TIMEOUT, DEFAULT_LIVENESS_PERIOD, DEFAULT_PRESENCE_EXPIRY,
};
