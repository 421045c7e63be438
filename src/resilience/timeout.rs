//! Per-call deadlines
//!
//! Deadlines are derived from the operation class. Timeouts nest: a wrapped
//! future that already carries a shorter deadline completes (or fails) first,
//! so the tighter bound always wins.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Operation classes with distinct deadline budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Read,
    Write,
    External,
}

/// Deadlines per operation class.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub read: Duration,
    pub write: Duration,
    pub external: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(500),
            write: Duration::from_secs(1),
            external: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    /// Deadline for an operation class.
    pub fn for_class(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::Read => self.read,
            OperationClass::Write => self.write,
            OperationClass::External => self.external,
        }
    }
}

/// Execute a future under a deadline.
///
/// Expiry surfaces as a transient persistence fault on the named resource so
/// the retry layer treats it like any other backend hiccup.
pub async fn execute_with_timeout<T, Fut>(
    deadline: Duration,
    resource: &str,
    fut: Fut,
) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::persistence(
            resource,
            anyhow::anyhow!("operation timed out after {}ms", deadline.as_millis()),
        )),
    }
}
