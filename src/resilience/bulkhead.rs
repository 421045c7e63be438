//! Bulkhead
//!
//! Bounded concurrency pool isolating one dependency from starving others.
//! At most `max_concurrent` callers run at once; at most `max_waiting`
//! callers may be queued or running. Overflow is rejected immediately with
//! `SERVICE_UNAVAILABLE`, and a queued caller that is cancelled releases its
//! slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;

use crate::error::{AppError, AppResult};

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub max_waiting: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_waiting: 100,
        }
    }
}

/// Per-resource bulkhead, safe for concurrent callers.
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    max_concurrent: usize,
    max_waiting: usize,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Semaphore::new(config.max_concurrent),
            in_flight: AtomicUsize::new(0),
            max_concurrent: config.max_concurrent,
            max_waiting: config.max_waiting,
        }
    }

    /// Run an operation within the bulkhead limits.
    pub async fn execute<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_waiting {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(AppError::service_unavailable(&self.name));
        }
        let _in_flight = InFlightGuard(&self.in_flight);

        // Waiting here observes cancellation: dropping the future releases
        // the queue slot via the guard above.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::service_unavailable(&self.name))?;

        op().await
    }

    /// Current statistics.
    pub fn stats(&self) -> BulkheadStats {
        let in_flight = self.in_flight.load(Ordering::Acquire);
        let available = self.semaphore.available_permits();
        BulkheadStats {
            name: self.name.clone(),
            active: self.max_concurrent.saturating_sub(available),
            max_concurrent: self.max_concurrent,
            waiting: in_flight.saturating_sub(self.max_concurrent.saturating_sub(available)),
            max_waiting: self.max_waiting,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bulkhead statistics snapshot.
#[derive(Debug, Clone)]
pub struct BulkheadStats {
    pub name: String,
    pub active: usize,
    pub max_concurrent: usize,
    pub waiting: usize,
    pub max_waiting: usize,
}

/// Named bulkheads, created on first use.
#[derive(Debug, Default)]
pub struct BulkheadRegistry {
    bulkheads: RwLock<HashMap<String, Arc<Bulkhead>>>,
    config: BulkheadConfig,
}

impl BulkheadRegistry {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            bulkheads: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the bulkhead for a named resource.
    pub fn get(&self, name: &str) -> Arc<Bulkhead> {
        if let Some(bulkhead) = self.bulkheads.read().unwrap().get(name) {
            return bulkhead.clone();
        }

        let mut bulkheads = self.bulkheads.write().unwrap();
        // Double-check after acquiring the write lock
        bulkheads
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::new(name, self.config.clone())))
            .clone()
    }

    /// Stats for all registered bulkheads.
    pub fn all_stats(&self) -> Vec<BulkheadStats> {
        self.bulkheads
            .read()
            .unwrap()
            .values()
            .map(|bulkhead| bulkhead.stats())
            .collect()
    }
}
