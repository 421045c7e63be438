//! Retry with exponential backoff
//!
//! Delays grow by the configured multiplier up to a cap, with uniform jitter
//! in [0.5, 1.5] applied to each wait. A predicate decides which errors are
//! worth retrying; everything else propagates immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, AppResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Execute an operation with retry.
///
/// The operation is attempted at most `max_attempts` times. Sleeps are plain
/// awaits, so dropping the returned future cancels any pending wait.
pub async fn retry<T, F, Fut, P>(cfg: &RetryConfig, retryable: P, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
    P: Fn(&AppError) -> bool,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut delay = cfg.initial_delay;
    let mut attempt = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if !retryable(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let wait = if cfg.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
        } else {
            delay
        };

        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = wait.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );

        tokio::time::sleep(wait).await;

        delay = delay.mul_f64(cfg.multiplier).min(cfg.max_delay);
    }
}
