//! cart-service - Shopping Cart Microservice
//!
//! HTTP API over a single-table key-value store with optimistic concurrency
//! on cart mutations, idempotent retries, and best-effort domain events.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cart_service::events::{EventPublisher, NoopPublisher, PgOutboxPublisher};
use cart_service::jobs::JobScheduler;
use cart_service::persistence::PgCartRepository;
use cart_service::{api, db, Application, Config};

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    // Production keeps the HTTP layer quieter regardless of LOG_LEVEL
    let tower_http_level = if config.is_production() { "info" } else { "debug" };
    let default_filter = format!(
        "cart_service={},tower_http={}",
        config.log_level, tower_http_level
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config);

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "Starting cart-service"
    );

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Bootstrap the single-table store and outbox
    db::verify_connection(&pool).await?;
    db::init_schema(&pool, &config.carts_table).await?;
    if !db::check_schema(&pool, &config.carts_table).await? {
        tracing::error!("Database schema is not complete");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!(table = %config.carts_table, "Database ready");

    // Assemble dependencies
    let repository = Arc::new(PgCartRepository::new(pool.clone(), config.carts_table.clone()));
    let publisher: Arc<dyn EventPublisher> = if config.events_enabled {
        Arc::new(PgOutboxPublisher::new(
            pool.clone(),
            config.event_bus_name.clone(),
        ))
    } else {
        Arc::new(NoopPublisher::new())
    };

    let app = Arc::new(Application::new(config.clone(), repository, publisher));

    // Start background maintenance
    let scheduler = JobScheduler::new(
        app.repository.clone(),
        app.events.clone(),
        config.events_enabled,
        app.idempotency_store.clone(),
    );
    let scheduler_handle = scheduler.start();
    app.register_shutdown(move || async move {
        scheduler_handle.abort();
        Ok(())
    });

    {
        let pool = pool.clone();
        app.register_shutdown(move || async move {
            pool.close().await;
            tracing::info!("Database connections closed");
            Ok(())
        });
    }

    // Build router and start server
    let router = api::build_router(app.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Run teardown hooks (LIFO)
    app.shutdown().await?;
    tracing::info!("Goodbye");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
