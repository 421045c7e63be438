//! Scheduled Jobs
//!
//! Background maintenance: sweeping expired idempotency records and reaping
//! carts whose time-to-live has passed. The reaper is the store-driven
//! expiry of the KV model; reads never rely on it, they check expiry
//! themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use uuid::Uuid;

use crate::domain::RequestContext;
use crate::error::AppError;
use crate::events::CartEventPublisher;
use crate::idempotency::InMemoryIdempotencyStore;
use crate::persistence::CartRepository;

/// How many expired carts one reaper pass may remove.
const REAPER_BATCH_SIZE: i64 = 100;

/// Configuration for the job scheduler.
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for removing expired idempotency records (default: 5 minutes)
    pub idempotency_sweep_interval: Duration,
    /// Interval for reaping expired carts (default: 10 minutes)
    pub cart_reaper_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            idempotency_sweep_interval: Duration::from_secs(5 * 60),
            cart_reaper_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Runs periodic maintenance tasks.
pub struct JobScheduler {
    repo: Arc<dyn CartRepository>,
    events: CartEventPublisher,
    publish_events: bool,
    idempotency_store: Arc<InMemoryIdempotencyStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub fn new(
        repo: Arc<dyn CartRepository>,
        events: CartEventPublisher,
        publish_events: bool,
        idempotency_store: Arc<InMemoryIdempotencyStore>,
    ) -> Self {
        Self {
            repo,
            events,
            publish_events,
            idempotency_store,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration.
    pub fn with_config(mut self, config: JobSchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the scheduler in the background.
    ///
    /// Returns a handle that can be aborted on shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut sweep_interval = interval(self.config.idempotency_sweep_interval);
        let mut reaper_interval = interval(self.config.cart_reaper_interval);

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    self.sweep_idempotency_records();
                }
                _ = reaper_interval.tick() => {
                    if let Err(e) = self.reap_expired_carts().await {
                        tracing::error!(error = %e, "Cart reaper failed");
                    }
                }
            }
        }
    }

    /// Remove expired idempotency records.
    pub fn sweep_idempotency_records(&self) -> usize {
        let removed = self.idempotency_store.remove_expired();
        if removed > 0 {
            tracing::info!(removed, "Swept expired idempotency records");
        }
        removed
    }

    /// Delete carts whose TTL has passed, announcing abandonment for
    /// non-empty ones.
    pub async fn reap_expired_carts(&self) -> Result<usize, AppError> {
        let expired = self.repo.list_expired_carts(REAPER_BATCH_SIZE).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let ctx = RequestContext::new().with_request_id(Uuid::new_v4().to_string());
        let mut reaped = 0;

        for cart in expired {
            tracing::debug!(cart = ?cart.summary(), "Reaping expired cart");

            if self.publish_events && cart.item_count() > 0 {
                self.events.cart_abandoned(&ctx, &cart).await;
            }

            match self.repo.delete_cart(&cart.user_id).await {
                Ok(()) => reaped += 1,
                // Someone else removed it first, which is fine
                Err(AppError::CartNotFound { .. }) => {}
                Err(err) => {
                    tracing::warn!(user_id = %cart.user_id, error = %err, "Failed to reap cart");
                }
            }
        }

        if reaped > 0 {
            tracing::info!(reaped, "Reaped expired carts");
        }
        Ok(reaped)
    }

    /// Run all maintenance jobs once (for manual trigger or testing).
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        report.idempotency_records_removed = self.sweep_idempotency_records();

        match self.reap_expired_carts().await {
            Ok(count) => report.carts_reaped = count,
            Err(e) => report.errors.push(format!("Cart reaper: {e}")),
        }

        report
    }
}

/// Report from running maintenance jobs.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub idempotency_records_removed: usize,
    pub carts_reaped: usize,
    pub errors: Vec<String>,
}
