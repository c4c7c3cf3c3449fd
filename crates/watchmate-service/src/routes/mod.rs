//! HTTP routes for Watchmate.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, RoomControllerActorHandle};
use crate::config::Config;
use crate::handlers;
use crate::lifecycle::ConnectionLifecycle;
use crate::observability::{health_router, HealthState};

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Room registry.
    pub controller: RoomControllerActorHandle,

    /// Join/disconnect orchestration for WebSocket connections.
    pub lifecycle: ConnectionLifecycle,

    /// Shared actor counters (rooms, connections, panics).
    pub actor_metrics: Arc<ActorMetrics>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe
/// - `/ready` - Readiness probe
/// - `/metrics` - Prometheus metrics endpoint
/// - `/api/v1/rooms` - Create room
/// - `/api/v1/rooms/{code}` - Get room
/// - `/api/v1/rooms/{code}/verify-password` - Verify room password
/// - `/ws` - WebSocket event surface
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/rooms", post(handlers::create_room))
        .route("/api/v1/rooms/:code", get(handlers::get_room))
        .route(
            "/api/v1/rooms/:code/verify-password",
            post(handlers::verify_password),
        )
        .route("/ws", get(handlers::ws_upgrade))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    api_routes
        .merge(metrics_routes)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
