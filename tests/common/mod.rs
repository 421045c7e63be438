//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use serde_json::Value;

use cart_service::api;
use cart_service::events::RecordingPublisher;
use cart_service::persistence::InMemoryCartRepository;
use cart_service::{Application, Config};

/// Assembled application over in-memory adapters.
pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryCartRepository>,
    pub recorder: Arc<RecordingPublisher>,
    pub app: Arc<Application>,
}

/// Config with defaults suitable for in-process tests.
pub fn test_config() -> Config {
    Config {
        port: 8080,
        environment: "dev".to_string(),
        service_name: "cart-service".to_string(),
        log_level: "info".to_string(),
        database_url: "postgres://localhost/unused".to_string(),
        database_max_connections: 5,
        carts_table: "cart_rows".to_string(),
        events_enabled: true,
        event_bus_name: "default".to_string(),
        event_source: "cart-service".to_string(),
        rate_limit_rps: 100,
        rate_limit_burst: 200,
        max_request_size: 1_048_576,
        idempotency_enabled: true,
        idempotency_ttl: Duration::from_secs(24 * 3600),
        circuit_breaker_enabled: true,
        circuit_breaker_failure_threshold: 5,
        circuit_breaker_success_threshold: 3,
        circuit_breaker_timeout: Duration::from_secs(30),
        retry_max_attempts: 3,
        retry_initial_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(100),
        read_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_secs(1),
    }
}

/// Build the full router over an in-memory repository and a recording
/// publisher.
pub fn setup_test_app() -> TestApp {
    setup_test_app_with_config(test_config())
}

/// Same as [`setup_test_app`] with a custom config.
pub fn setup_test_app_with_config(config: Config) -> TestApp {
    let repo = Arc::new(InMemoryCartRepository::new());
    let recorder = Arc::new(RecordingPublisher::new());
    let app = Arc::new(Application::new(config, repo.clone(), recorder.clone()));
    let router = api::build_router(app.clone());

    TestApp {
        router,
        repo,
        recorder,
        app,
    }
}

/// Build a JSON request.
pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

/// Build a bodyless request.
pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("failed to build request")
}

/// Read a response body as raw bytes.
pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body")
        .to_vec()
}

/// Read a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("response body is not valid JSON")
}
