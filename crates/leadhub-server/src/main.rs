mod config;

use std::sync::Arc;

use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use leadhub_api::auth::{AppState, AppStateInner};
use leadhub_connect::{ChannelService, CompletionWorker};
use leadhub_db::Database;
use leadhub_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadhub=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.webhook_secret.is_none() {
        warn!("LEADHUB_WEBHOOK_SECRET is unset; inbound webhooks are accepted unsigned");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new();
    let channels = ChannelService::new(db.clone(), dispatcher.clone(), config.lifecycle.clone());

    // Deadlines are persisted, so overdue attempts from a previous run are
    // picked up on the first tick.
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(CompletionWorker::new(channels.clone()).run(shutdown.clone()));

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        webhook_secret: config.webhook_secret.clone(),
        dispatcher,
        channels,
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = leadhub_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("LeadHub server listening on {}", config.addr);
    info!(
        "Connection delays: whatsapp {:?}, instagram {:?}; stale after {:?}",
        config.lifecycle.whatsapp_delay, config.lifecycle.instagram_delay, config.lifecycle.stale_after
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        warn!("Completion worker ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
