//! Observability for the signaling hub.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit safe fields.
//! Display names and chat text never appear in logs or labels; only their
//! lengths are recorded. Metric labels are bounded:
//! - `kind`: wire message kinds (join, signal, chat, leave)
//! - `reason`: drop reasons (stale_recipient, not_member, writer_closed)
//! - `result`: join outcomes (ok, rejoin, capacity, invalid)
//! - `actor_type`: hub, session, connection
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_sessions_active` | Gauge | none | Sessions with at least one member |
//! | `hub_participants_active` | Gauge | none | Joined participants across sessions |
//! | `hub_connections_active` | Gauge | none | Open WebSocket connections |
//! | `hub_messages_relayed_total` | Counter | `kind` | Frames delivered to a peer |
//! | `hub_messages_dropped_total` | Counter | `reason` | Frames not delivered |
//! | `hub_joins_total` | Counter | `result` | Join attempts |
//! | `hub_message_latency_seconds` | Histogram | `kind` | Per-frame handling time |
//! | `hub_actor_panics_total` | Counter | `actor_type` | Actor tasks that panicked |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, Readiness};
pub use metrics::init_metrics_recorder;
