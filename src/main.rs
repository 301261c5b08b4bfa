//! # Beatmap Hub - Main Application Entry Point
//!
//! A small HTTP backend for sharing rhythm-game levels. Players upload an
//! audio file together with a level name, a source link and two
//! beat-detection tuning values; other players list, download and delete
//! those levels.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **state**: shared state handed to every handler
//! - **storage**: the levels JSON file and the audio upload directory
//! - **rate_limit**: per-route, per-client request ceilings
//! - **middleware**: request metrics and rate-limit enforcement
//! - **handlers**: the HTTP endpoints
//! - **error**: error types and their JSON responses

mod config;
mod error;
mod handlers;
mod health;
mod level;
mod middleware;
mod rate_limit;
mod state;
mod storage;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Opens the stores** (creating the upload directory if needed)
/// 4. **Starts the HTTP server** with CORS, request tracing, metrics and routes
/// 5. **Prunes idle rate-limit entries** in the background
/// 6. **Stops gracefully** on SIGINT / SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting beatmap-hub v{}", env!("CARGO_PKG_VERSION"));
    info!(
        levels_file = %config.storage.levels_file,
        uploads_dir = %config.storage.uploads_dir,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cleanup_interval = Duration::from_secs(config.rate_limit.cleanup_interval_secs);

    // Built once here so every worker shares the same stores and limiters.
    let app_state = AppState::new(config).await?;

    spawn_rate_limit_cleanup(app_state.clone(), cleanup_interval);

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let state = server_state.clone();
        App::new()
            .app_data(web::Data::new(state.clone()))
            // The last wrap is the outermost layer, so CORS sees requests first.
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(move |cfg| handlers::configure(cfg, &state))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "beatmap_hub=trace")
/// - If not set, defaults to "beatmap_hub=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beatmap_hub=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Periodically drop clients whose rate-limit windows have all expired, so
/// the limiters' memory does not grow with every address ever seen.
fn spawn_rate_limit_cleanup(state: AppState, every: Duration) {
    if !state.config.rate_limit.enabled {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.rate_limits.retain_recent();
        }
    });
}

/// Resolves on the first SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
