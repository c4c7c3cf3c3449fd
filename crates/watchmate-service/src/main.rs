//! Watchmate
//!
//! Watch-party room coordination server.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize host token issuer and actor system
//! 4. Start HTTP + WebSocket server
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watchmate_service::actors::{ActorMetrics, RoomControllerActorHandle};
use watchmate_service::config::Config;
use watchmate_service::lifecycle::ConnectionLifecycle;
use watchmate_service::observability::{init_metrics_recorder, HealthState};
use watchmate_service::party::SessionDirectory;
use watchmate_service::rooms::host_token::HostTokenIssuer;
use watchmate_service::routes::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchmate_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Watchmate");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        max_rooms = config.max_rooms,
        countdown_tick_ms = config.countdown_tick.as_millis(),
        bcrypt_cost = config.bcrypt_cost,
        host_token_secret_configured = config.host_token_secret.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    if config.host_token_secret.is_none() {
        warn!("WM_HOST_TOKEN_SECRET not set, generated a per-process host token secret");
    }
    let issuer = HostTokenIssuer::from_config(config.host_token_secret.as_ref()).map_err(|e| {
        error!(error = %e, "Invalid host token secret");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let actor_metrics = ActorMetrics::new();
    let controller = RoomControllerActorHandle::new(&config, issuer, Arc::clone(&actor_metrics));
    let lifecycle = ConnectionLifecycle::new(controller.clone(), Arc::new(SessionDirectory::new()));
    info!("Actor system initialized");

    let bind_address: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let state = Arc::new(AppState {
        config,
        controller: controller.clone(),
        lifecycle,
        actor_metrics,
    });
    let app = routes::build_routes(state, Arc::clone(&health_state), metrics_handle);

    // Bind before marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_address, "Failed to bind listener");
            format!("Failed to bind to {bind_address}: {e}")
        })?;
    info!(addr = %bind_address, "Watchmate listening");

    health_state.set_ready();

    let shutdown_health = Arc::clone(&health_state);
    let shutdown_controller = controller.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");

            // Mark as not ready immediately so load balancers stop routing here
            shutdown_health.set_not_ready();

            // Cancels every room and connection, which closes open sockets
            if let Err(e) = shutdown_controller.shutdown().await {
                warn!(error = %e, "Actor system shutdown error");
            }
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    controller.cancel();

    info!("Watchmate shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
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
