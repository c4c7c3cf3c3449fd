//! Observability for the watch-party service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Chat text, display names, passwords and host tokens are never recorded
//! in spans or metric labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `wm_rooms_active` | Gauge | none |
//! | `wm_connections_active` | Gauge | none |
//! | `wm_rooms_created_total` | Counter | none |
//! | `wm_joins_total` | Counter | `status` |
//! | `wm_events_relayed_total` | Counter | `event_type` |
//! | `wm_countdowns_total` | Counter | `trigger` |
//! | `wm_events_rejected_total` | Counter | `reason` |
//! | `wm_room_create_duration_seconds` | Histogram | none |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
