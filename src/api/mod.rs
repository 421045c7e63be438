//! HTTP API
//!
//! Router assembly, shared handler state, and the health endpoints.

pub mod middleware;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app::Application;
use crate::error::AppError;
use crate::idempotency::IdempotencyStore;
use crate::service::CartService;

use middleware::RateLimiter;

/// Shared state available to handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CartService>,
    pub idempotency_store: Arc<dyn IdempotencyStore>,
    pub idempotency_enabled: bool,
    pub idempotency_ttl: Duration,
    pub max_request_size: usize,
    pub rate_limiter: Arc<RateLimiter>,
    pub app: Arc<Application>,
}

/// Build the application router with the full middleware chain.
pub fn build_router(app: Arc<Application>) -> Router {
    let state = AppState {
        service: app.service.clone(),
        idempotency_store: app.idempotency_store.clone() as Arc<dyn IdempotencyStore>,
        idempotency_enabled: app.config.idempotency_enabled,
        idempotency_ttl: app.config.idempotency_ttl,
        max_request_size: app.config.max_request_size,
        rate_limiter: Arc::new(RateLimiter::new(
            app.config.rate_limit_rps,
            app.config.rate_limit_burst,
        )),
        app,
    };

    // Note: Axum layers are applied in reverse order (last added = first
    // executed). Order: trace -> context -> logging -> recovery -> cors ->
    // body limit -> rate limit -> idempotency -> handler
    let api = routes::create_router()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(state.max_request_size))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(
            middleware::request_context_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    Router::new()
        // Health endpoints bypass the API middleware chain
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(api)
        .with_state(state)
}

/// Liveness probe; never touches the backend.
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe; fails when the critical dependencies are not usable.
async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.app.readiness_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready" })),
            )
                .into_response()
        }
    }
}

/// Convert a handler panic into a logged 500 response.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Recovered from panic in handler");
    AppError::internal(anyhow::anyhow!("panic: {detail}")).into_response()
}
