//! Resilience envelope
//!
//! Every outbound call is wrapped by the composition, from the inside out:
//! deadline -> retry -> circuit breaker -> bulkhead. The bulkhead sits
//! outermost so queue overflow cannot consume the breaker's probe budget.

mod bulkhead;
mod circuit_breaker;
mod retry;
mod timeout;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadRegistry, BulkheadStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Counts,
};
pub use retry::{retry, RetryConfig};
pub use timeout::{execute_with_timeout, OperationClass, TimeoutConfig};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Cart;
use crate::error::{AppError, AppResult};
use crate::events::{Event, EventPublisher};
use crate::persistence::CartRepository;

/// Composition of the resilience layers for one named resource.
#[derive(Clone)]
pub struct ResiliencePolicy {
    resource: String,
    timeouts: TimeoutConfig,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    bulkhead: Arc<Bulkhead>,
}

impl ResiliencePolicy {
    pub fn new(
        resource: impl Into<String>,
        timeouts: TimeoutConfig,
        retry: RetryConfig,
        breaker: Option<Arc<CircuitBreaker>>,
        bulkhead: Arc<Bulkhead>,
    ) -> Self {
        Self {
            resource: resource.into(),
            timeouts,
            retry,
            breaker,
            bulkhead,
        }
    }

    /// Execute an operation under the full envelope.
    ///
    /// Only transient faults are retried or counted against the breaker;
    /// conflicts and not-found outcomes pass straight through.
    pub async fn execute<T, F, Fut>(&self, class: OperationClass, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let deadline = self.timeouts.for_class(class);

        self.bulkhead
            .execute(|| async move {
                match &self.breaker {
                    Some(breaker) => {
                        breaker
                            .call(AppError::is_transient, move || async move {
                                retry(&self.retry, AppError::is_transient, || {
                                    execute_with_timeout(deadline, &self.resource, op())
                                })
                                .await
                            })
                            .await
                    }
                    None => {
                        retry(&self.retry, AppError::is_transient, || {
                            execute_with_timeout(deadline, &self.resource, op())
                        })
                        .await
                    }
                }
            })
            .await
    }
}

/// Repository decorator applying the resilience envelope to every call.
pub struct ResilientCartRepository {
    inner: Arc<dyn CartRepository>,
    policy: ResiliencePolicy,
}

impl ResilientCartRepository {
    pub fn new(inner: Arc<dyn CartRepository>, policy: ResiliencePolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl CartRepository for ResilientCartRepository {
    async fn get_cart(&self, user_id: &str) -> AppResult<Cart> {
        self.policy
            .execute(OperationClass::Read, || self.inner.get_cart(user_id))
            .await
    }

    async fn save_cart(&self, cart: &Cart) -> AppResult<()> {
        self.policy
            .execute(OperationClass::Write, || self.inner.save_cart(cart))
            .await
    }

    async fn save_cart_with_version(&self, cart: &Cart, expected_version: i64) -> AppResult<()> {
        self.policy
            .execute(OperationClass::Write, || {
                self.inner.save_cart_with_version(cart, expected_version)
            })
            .await
    }

    async fn delete_cart(&self, user_id: &str) -> AppResult<()> {
        self.policy
            .execute(OperationClass::Write, || self.inner.delete_cart(user_id))
            .await
    }

    async fn list_expired_carts(&self, limit: i64) -> AppResult<Vec<Cart>> {
        self.policy
            .execute(OperationClass::Read, || self.inner.list_expired_carts(limit))
            .await
    }

    async fn health_check(&self) -> AppResult<()> {
        self.policy
            .execute(OperationClass::Read, || self.inner.health_check())
            .await
    }
}

/// Publisher decorator applying the resilience envelope to bus calls.
pub struct ResilientEventPublisher {
    inner: Arc<dyn EventPublisher>,
    policy: ResiliencePolicy,
}

impl ResilientEventPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, policy: ResiliencePolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EventPublisher for ResilientEventPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        self.policy
            .execute(OperationClass::External, || self.inner.publish(event.clone()))
            .await
    }

    async fn publish_batch(&self, events: Vec<Event>) -> AppResult<()> {
        self.policy
            .execute(OperationClass::External, || {
                self.inner.publish_batch(events.clone())
            })
            .await
    }
}
