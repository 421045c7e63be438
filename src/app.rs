//! Application container
//!
//! The composition root: resolves the resilience envelope around the
//! repository and publisher, builds the cart service, and owns the ordered
//! teardown hooks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::AppResult;
use crate::events::{CartEventPublisher, EventPublisher};
use crate::idempotency::InMemoryIdempotencyStore;
use crate::persistence::CartRepository;
use crate::resilience::{
    BulkheadConfig, BulkheadRegistry, CircuitBreakerConfig, CircuitBreakerRegistry,
    ResiliencePolicy, ResilientCartRepository, ResilientEventPublisher, RetryConfig, TimeoutConfig,
};

use crate::service::CartService;

/// Resource name guarding repository calls.
const CARTS_RESOURCE: &str = "carts-table";
/// Resource name guarding bus calls.
const EVENT_BUS_RESOURCE: &str = "event-bus";

type ShutdownHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// Holds the resolved singletons and lifecycle hooks.
pub struct Application {
    pub config: Config,
    /// Repository with the resilience envelope applied
    pub repository: Arc<dyn CartRepository>,
    /// Publisher with the resilience envelope applied
    pub publisher: Arc<dyn EventPublisher>,
    /// Typed cart event publisher over `publisher`
    pub events: CartEventPublisher,
    pub service: Arc<CartService>,
    pub idempotency_store: Arc<InMemoryIdempotencyStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub bulkheads: Arc<BulkheadRegistry>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
}

impl Application {
    /// Assemble the application from its outer dependencies, wrapping the
    /// given repository and publisher in the resilience envelope.
    pub fn new(
        config: Config,
        repository: Arc<dyn CartRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
            success_threshold: config.circuit_breaker_success_threshold,
            timeout: config.circuit_breaker_timeout,
            ..CircuitBreakerConfig::default()
        }));
        let bulkheads = Arc::new(BulkheadRegistry::new(BulkheadConfig::default()));

        let timeouts = TimeoutConfig {
            read: config.read_timeout,
            write: config.write_timeout,
            ..TimeoutConfig::default()
        };
        let retry = RetryConfig {
            max_attempts: config.retry_max_attempts,
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
            ..RetryConfig::default()
        };

        let repo_breaker = config
            .circuit_breaker_enabled
            .then(|| breakers.get(CARTS_RESOURCE));
        let repo_policy = ResiliencePolicy::new(
            CARTS_RESOURCE,
            timeouts.clone(),
            retry.clone(),
            repo_breaker,
            bulkheads.get(CARTS_RESOURCE),
        );
        let resilient_repository: Arc<dyn CartRepository> =
            Arc::new(ResilientCartRepository::new(repository.clone(), repo_policy));

        let bus_breaker = config
            .circuit_breaker_enabled
            .then(|| breakers.get(EVENT_BUS_RESOURCE));
        let bus_policy = ResiliencePolicy::new(
            EVENT_BUS_RESOURCE,
            timeouts,
            retry,
            bus_breaker,
            bulkheads.get(EVENT_BUS_RESOURCE),
        );
        let resilient_publisher: Arc<dyn EventPublisher> =
            Arc::new(ResilientEventPublisher::new(publisher.clone(), bus_policy));

        let events =
            CartEventPublisher::new(resilient_publisher.clone(), config.event_source.clone());
        let service = Arc::new(CartService::new(
            resilient_repository.clone(),
            events.clone(),
            config.events_enabled,
        ));

        Self {
            config,
            repository: resilient_repository,
            publisher: resilient_publisher,
            events,
            service,
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
            breakers,
            bulkheads,
            shutdown_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a teardown hook; hooks run in LIFO order on shutdown.
    pub fn register_shutdown<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shutdown_hooks
            .lock()
            .unwrap()
            .push(Box::new(move || Box::pin(hook())));
    }

    /// Run all teardown hooks in reverse registration order.
    ///
    /// Every hook runs even when earlier ones fail; the first error is
    /// returned.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Starting graceful shutdown");

        let hooks: Vec<ShutdownHook> = {
            let mut guard = self.shutdown_hooks.lock().unwrap();
            guard.drain(..).collect()
        };

        let mut first_err = None;
        for hook in hooks.into_iter().rev() {
            if let Err(err) = hook().await {
                tracing::error!(error = %err, "Shutdown hook failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => {
                tracing::info!("Shutdown completed");
                Ok(())
            }
        }
    }

    /// Verify the service can handle traffic.
    pub async fn readiness_check(&self) -> AppResult<()> {
        self.service.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopPublisher;
    use crate::persistence::InMemoryCartRepository;

    fn test_config() -> Config {
        Config {
            port: 8080,
            environment: "dev".to_string(),
            service_name: "cart-service".to_string(),
            log_level: "info".to_string(),
            database_url: "postgres://localhost/test".to_string(),
            database_max_connections: 5,
            carts_table: "cart_rows".to_string(),
            events_enabled: true,
            event_bus_name: "default".to_string(),
            event_source: "cart-service".to_string(),
            rate_limit_rps: 100,
            rate_limit_burst: 200,
            max_request_size: 1_048_576,
            idempotency_enabled: true,
            idempotency_ttl: std::time::Duration::from_secs(24 * 3600),
            circuit_breaker_enabled: true,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 3,
            circuit_breaker_timeout: std::time::Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_initial_delay: std::time::Duration::from_millis(100),
            retry_max_delay: std::time::Duration::from_secs(5),
            read_timeout: std::time::Duration::from_millis(500),
            write_timeout: std::time::Duration::from_secs(1),
        }
    }

    fn test_app() -> Application {
        Application::new(
            test_config(),
            Arc::new(InMemoryCartRepository::new()),
            Arc::new(NoopPublisher::new()),
        )
    }

    #[tokio::test]
    async fn test_readiness_check_with_memory_repo() {
        let app = test_app();
        app.readiness_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_runs_hooks_in_lifo_order() {
        let app = test_app();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            app.register_shutdown(move || async move {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        app.shutdown().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_shutdown_collects_first_error_but_runs_all_hooks() {
        let app = test_app();
        let ran = Arc::new(Mutex::new(Vec::new()));

        {
            let ran = ran.clone();
            app.register_shutdown(move || async move {
                ran.lock().unwrap().push("first");
                Ok(())
            });
        }
        {
            let ran = ran.clone();
            app.register_shutdown(move || async move {
                ran.lock().unwrap().push("failing");
                Err(anyhow::anyhow!("teardown failed"))
            });
        }

        let err = app.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("teardown failed"));
        // The failing hook ran first (LIFO), the other still ran after it
        assert_eq!(*ran.lock().unwrap(), vec!["failing", "first"]);
    }
}
