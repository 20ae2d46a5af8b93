use std::{net::SocketAddr, sync::Arc};
use throttle_gate::{
    api::create_router,
    clock::SystemClock,
    config::Config,
    observability::init_tracing,
    rate_limit::{LimiterSettings, RateLimiter},
    redis::create_client,
    storage::{create_storage, BackendKind},
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting Throttle Gate service");
    tracing::info!("Configuration loaded: {:?}", config.server);

    let backend: BackendKind = config.rate_limit.backend.parse()?;

    // Only the networked backend needs Redis
    let connection = match backend {
        BackendKind::Networked => {
            let manager = create_client(&config.redis).await?;
            tracing::info!("Redis connection established");
            Some(manager)
        }
        BackendKind::Memory => None,
    };

    let clock = Arc::new(SystemClock);
    let storage = create_storage(backend, connection, clock.clone())?;

    let settings = LimiterSettings::from(&config.rate_limit);
    tracing::info!(
        ip_limit = settings.ip.limit,
        ip_enabled = settings.ip.enabled,
        token_limit = settings.token.limit,
        token_enabled = settings.token.enabled,
        "Rate limiter configured"
    );

    let limiter = Arc::new(RateLimiter::new(storage.clone(), settings, clock));

    // Create router
    let app = create_router(limiter, storage, &config)?;

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Throttle Gate service is ready to accept requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("Throttle Gate service stopped");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
