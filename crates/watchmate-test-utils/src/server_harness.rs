//! Test server harness for E2E testing
//!
//! Provides `TestPartyServer` for spawning real Watchmate instances in tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use watchmate_service::actors::{ActorMetrics, RoomControllerActorHandle};
use watchmate_service::config::Config;
use watchmate_service::lifecycle::ConnectionLifecycle;
use watchmate_service::models::CreateRoomResponse;
use watchmate_service::observability::{init_metrics_recorder, HealthState};
use watchmate_service::party::SessionDirectory;
use watchmate_service::rooms::host_token::HostTokenIssuer;
use watchmate_service::routes::{self, AppState};

/// Countdown tick used by test servers, so countdown tests finish quickly.
pub const TEST_COUNTDOWN_TICK: Duration = Duration::from_millis(100);

/// Test harness for spawning a Watchmate server in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_room_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestPartyServer::spawn().await?;
///     let response = reqwest::Client::new()
///         .post(format!("{}/api/v1/rooms", server.url()))
///         .json(&serde_json::json!({"isPrivate": false}))
///         .send()
///         .await?;
///     assert_eq!(response.status(), 201);
///     Ok(())
/// }
/// ```
pub struct TestPartyServer {
    addr: SocketAddr,
    config: Config,
    controller: RoomControllerActorHandle,
    health_state: Arc<HealthState>,
    handle: JoinHandle<()>,
}

impl TestPartyServer {
    /// Spawn a new test server instance
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use a fixed host token secret, bcrypt cost 4 and a 100ms countdown tick
    /// - Start the HTTP + WebSocket server in the background
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn with extra `WM_*` variables layered over the test defaults.
    pub async fn spawn_with_vars(
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars: HashMap<String, String> = [
            ("WM_BIND_ADDRESS", "127.0.0.1:0".to_string()),
            ("WM_INSTANCE_ID", "wm-test".to_string()),
            ("WM_BCRYPT_COST", "4".to_string()),
            (
                "WM_COUNTDOWN_TICK_MS",
                TEST_COUNTDOWN_TICK.as_millis().to_string(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to build test config: {}", e))?;

        let issuer = HostTokenIssuer::new(vec![0x5a; 32])
            .map_err(|e| anyhow::anyhow!("Failed to build host token issuer: {}", e))?;

        let actor_metrics = ActorMetrics::new();
        let controller =
            RoomControllerActorHandle::new(&config, issuer, Arc::clone(&actor_metrics));
        let lifecycle =
            ConnectionLifecycle::new(controller.clone(), Arc::new(SessionDirectory::new()));

        let state = Arc::new(AppState {
            config: config.clone(),
            controller: controller.clone(),
            lifecycle,
            actor_metrics,
        });

        // Initialize metrics recorder for test server
        // Note: This may fail if already installed in the test process.
        // In that case, we create a new recorder without installing it globally.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        let health_state = Arc::new(HealthState::new());
        health_state.set_ready();

        let app = routes::build_routes(state, Arc::clone(&health_state), metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            controller,
            health_state,
            handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket URL of the test server
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the room registry, bypassing HTTP
    pub fn controller(&self) -> &RoomControllerActorHandle {
        &self.controller
    }

    pub fn health_state(&self) -> &Arc<HealthState> {
        &self.health_state
    }

    /// Create a room through the HTTP API
    pub async fn create_room(
        &self,
        is_private: bool,
        password: Option<&str>,
    ) -> Result<CreateRoomResponse, anyhow::Error> {
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/rooms", self.url()))
            .json(&serde_json::json!({
                "isPrivate": is_private,
                "password": password,
            }))
            .send()
            .await?;

        anyhow::ensure!(
            response.status() == reqwest::StatusCode::CREATED,
            "room creation failed with status {}",
            response.status()
        );

        Ok(response.json().await?)
    }
}

impl Drop for TestPartyServer {
    fn drop(&mut self) {
        self.controller.cancel();
        self.handle.abort();
    }
}
