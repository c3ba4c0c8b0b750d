//! Observability for the backplane node.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Payloads (invocation arguments) are never logged or used as labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `backplane_coordinator_activations_total` | Counter | `kind` |
//! | `backplane_coordinator_deactivations_total` | Counter | `kind` |
//! | `backplane_coordinators_active` | Gauge | none |
//! | `backplane_subscribers_evicted_total` | Counter | `kind`, `reason` |
//! | `backplane_notify_duration_seconds` | Histogram | `kind` |
//! | `backplane_notify_deliveries_total` | Counter | `kind` |
//! | `backplane_send_duration_seconds` | Histogram | `operation` |
//! | `backplane_sends_total` | Counter | `operation`, `status` |
//! | `backplane_connection_write_failures_total` | Counter | none |
//! | `backplane_connections_active` | Gauge | `hub` |
//! | `backplane_presence_heartbeats_total` | Counter | `status` |
//! | `backplane_presence_evictions_total` | Counter | none |
//! | `backplane_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `backplane_state_duration_seconds` | Histogram | `operation` |
//! | `backplane_state_operations_total` | Counter | `operation`, `status` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
