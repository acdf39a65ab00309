//! Signaling Hub
//!
//! WebSocket signaling server for Mesh Meeting sessions.
//!
//! # Servers
//!
//! - WebSocket signaling endpoint `GET /ws` (default: 0.0.0.0:8080)
//! - HTTP server for `/health`, `/ready`, `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! Configuration, then logging and the metrics recorder, then the hub actor.
//! Both listeners are bound before either is served; readiness flips once
//! they are. On SIGTERM or Ctrl+C readiness drops first, then the hub drains.

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signaling_hub::actors::{HubActorHandle, HubMetrics};
use signaling_hub::config::{Config, LogFormat};
use signaling_hub::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_hub::store::InMemorySessionStore;
use signaling_hub::transport::{ws_router, WsState};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time given to open sockets to flush after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Loaded before logging: it selects the log format
    let config = Config::from_env();
    init_tracing(matches!(&config, Ok(c) if c.log_format == LogFormat::Json));

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_sessions = config.limits.max_sessions,
        max_participants_per_session = config.limits.max_participants_per_session,
        max_frame_bytes = config.limits.max_frame_bytes,
        "Starting Signaling Hub"
    );

    // Must happen before any metrics are recorded
    let prometheus = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let metrics = HubMetrics::new();
    let hub = HubActorHandle::new(
        config.instance_id.clone(),
        Arc::new(InMemorySessionStore::new()),
        config.limits,
        Arc::clone(&metrics),
    );
    let health = Arc::new(HealthState::watching(hub.clone()));

    // Both listeners are bound before anything is served so a bad address
    // fails startup instead of a background task
    let health_listener = bind(&config.health_bind_address, "health").await?;
    let ws_listener = bind(&config.bind_address, "signaling").await?;

    // Probes outlive the hub so `/ready` reports draining during the grace period
    let probes_shutdown = CancellationToken::new();
    spawn_server(
        "health",
        health_listener,
        health_router(Arc::clone(&health), Some(prometheus)),
        probes_shutdown.clone(),
    );
    spawn_server(
        "signaling",
        ws_listener,
        ws_router(WsState {
            hub: hub.clone(),
            limits: config.limits,
            metrics: Arc::clone(&metrics),
            shutdown: hub.child_token(),
        })
        .layer(TraceLayer::new_for_http()),
        hub.child_token(),
    );

    health.set_listening();
    info!("Signaling Hub running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, draining");
    health.begin_draining();

    if let Err(e) = hub.shutdown().await {
        warn!(error = %e, "Hub shutdown request failed, cancelling");
        hub.cancel();
    }

    // Writer tasks send the draining error and close their sockets
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    probes_shutdown.cancel();

    let snapshot = metrics.snapshot();
    info!(
        sessions = snapshot.sessions,
        participants = snapshot.participants,
        connections = snapshot.connections,
        "Signaling Hub shutdown complete"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signaling_hub=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn bind(addr: &str, name: &'static str) -> Result<TcpListener, String> {
    TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, server = name, "Failed to bind listener");
        format!("Failed to bind {name} server to {addr}: {e}")
    })
}

/// Serve `router` on `listener` until `shutdown` fires.
fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => info!(server = name, addr = %addr, "Server listening"),
            Err(e) => warn!(server = name, error = %e, "Server address unavailable"),
        }
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!(server = name, "Server shutting down");
        });
        if let Err(e) = server.await {
            error!(server = name, error = %e, "Server failed");
        }
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
