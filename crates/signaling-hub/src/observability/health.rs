//! Operational HTTP surface of the hub.
//!
//! - `GET /health` 200 while the process can answer at all
//! - `GET /ready` 200 once the signaling listener is bound, 503 while
//!   starting and again once the hub begins draining
//! - `GET /metrics` Prometheus text exposition, when a recorder is installed
//!
//! Served on its own bind address so probes keep answering while the
//! signaling listener drains.

use crate::actors::HubActorHandle;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness as reported on `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Signaling listener not bound yet.
    Starting,
    Ready,
    /// Shutdown started; no new connections should be routed here.
    Draining,
}

impl Readiness {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Readiness::Starting => "starting",
            Readiness::Ready => "ready",
            Readiness::Draining => "draining",
        }
    }

    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Readiness::Ready => StatusCode::OK,
            Readiness::Starting | Readiness::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Inputs of the readiness probe.
#[derive(Default)]
pub struct HealthState {
    listening: AtomicBool,
    draining: AtomicBool,
    /// A cancelled hub is draining even if nobody flagged it.
    hub: Option<HubActorHandle>,
}

impl HealthState {
    /// Standalone state (not tied to a hub actor).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State that also reports draining once `hub` is cancelled.
    #[must_use]
    pub fn watching(hub: HubActorHandle) -> Self {
        Self {
            hub: Some(hub),
            ..Self::default()
        }
    }

    /// The signaling listener is bound and serving.
    pub fn set_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        let hub_stopped = self.hub.as_ref().is_some_and(HubActorHandle::is_cancelled);
        if self.draining.load(Ordering::SeqCst) || hub_stopped {
            Readiness::Draining
        } else if self.listening.load(Ordering::SeqCst) {
            Readiness::Ready
        } else {
            Readiness::Starting
        }
    }
}

/// Router for `/health`, `/ready` and, given a recorder handle, `/metrics`.
pub fn health_router(state: Arc<HealthState>, prometheus: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler));

    if let Some(handle) = prometheus {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router.with_state(state)
}

async fn liveness_handler() -> &'static str {
    "ok"
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    let readiness = state.readiness();
    (readiness.status_code(), readiness.as_str())
}
