//! Test server harness for E2E testing
//!
//! Provides `TestHubServer` for spawning real hub instances in tests.

use signaling_hub::actors::{HubActorHandle, HubMetrics};
use signaling_hub::config::Limits;
use signaling_hub::store::InMemorySessionStore;
use signaling_hub::transport::{ws_router, WsState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning a signaling hub in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_flow_e2e() -> Result<()> {
///     let server = TestHubServer::spawn().await?;
///     let mut alice = TestWsClient::connect(&server.url()).await?;
///     alice.join("/room1", "alice").await;
///     Ok(())
/// }
/// ```
pub struct TestHubServer {
    addr: SocketAddr,
    hub: HubActorHandle,
    metrics: Arc<HubMetrics>,
    limits: Limits,
    _handle: JoinHandle<()>,
}

impl TestHubServer {
    /// Spawn a hub with default limits.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_limits(Limits::default()).await
    }

    /// Spawn a hub with custom limits.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the WebSocket server in the background
    pub async fn spawn_with_limits(limits: Limits) -> Result<Self, anyhow::Error> {
        let metrics = HubMetrics::new();
        let hub = HubActorHandle::new(
            "hub-test".to_string(),
            Arc::new(InMemorySessionStore::new()),
            limits,
            Arc::clone(&metrics),
        );

        let app = ws_router(WsState {
            hub: hub.clone(),
            limits,
            metrics: Arc::clone(&metrics),
            shutdown: hub.child_token(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test hub server error: {e}");
            }
        });

        Ok(Self {
            addr,
            hub,
            metrics,
            limits,
            _handle: handle,
        })
    }

    /// WebSocket URL of the signaling endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Bound socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle to the hub actor, for status queries and shutdown.
    pub fn hub(&self) -> &HubActorHandle {
        &self.hub
    }

    /// In-process hub metrics.
    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    /// Limits the hub was started with.
    pub fn limits(&self) -> Limits {
        self.limits
    }
}

impl Drop for TestHubServer {
    fn drop(&mut self) {
        self.hub.cancel();
        self._handle.abort();
    }
}
