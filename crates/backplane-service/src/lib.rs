//! Hub Backplane Library
//!
//! Cluster-wide routing and membership for real-time messaging servers. Each
//! server holds its own client connections; the backplane decides which
//! servers must see a message sent to all connections, a group, a user or a
//! single connection, and delivers it there.
//!
//! # Architecture
//!
//! ```text
//! RoutingFrontend (one per hub per server)
//! ├── LocalConnectionRegistry (connections, groups, users held here)
//! ├── LocalDelivery (observer endpoint coordinators call back into)
//! └── ActorRuntime (shared by every frontend in the process)
//!     ├── EntityCoordinator (one per {hub, kind, id}, self-deactivating)
//!     │   ├── subscriber set: servers with a local member
//!     │   └── liveness reminder
//!     ├── ServerPresenceCoordinator (one per hub, heartbeat expiry)
//!     └── StateStore (memory or Redis)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-entity subscriptions**: a server subscribes to a coordinator only
//!   on the first local member and unsubscribes on the last.
//! - **Self-healing fan-out**: a server that fails a delivery or a liveness
//!   ping is evicted from the subscriber set in the same update.
//! - **Sends never fail on remote errors**: only invalid input is returned to
//!   the caller.
//!
//! # Modules
//!
//! - [`actors`] - Coordinator and presence actors plus the runtime
//! - [`client`] - Send-only hub context for processes without connections
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with error codes
//! - [`observability`] - Metrics and health endpoints
//! - [`observer`] - Server observer endpoints and their directory
//! - [`registry`] - Per-server connection registry
//! - [`routing`] - The per-server routing frontend
//! - [`state`] - Durable coordinator state
//! - [`transport`] - Client connection contract

pub mod actors;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod observer;
pub mod registry;
pub mod routing;
pub mod state;
pub mod transport;
