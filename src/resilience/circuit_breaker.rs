//! Circuit breaker
//!
//! Per-resource state machine: `closed -> open -> half_open`. The breaker
//! opens after five consecutive failures, or once the failure ratio reaches
//! 0.6 over a rolling window with at least ten requests. After the cooldown
//! it admits a bounded number of probes; enough consecutive successes close
//! it, any failure reopens it.
//!
//! Results are tagged with the generation they were acquired under, so an
//! outcome that straddles a state change cannot corrupt the counters of the
//! new state.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::{AppError, AppResult};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Failure ratio that opens the breaker
    pub failure_ratio: f64,
    /// Requests seen in the window before the ratio applies
    pub min_requests: u32,
    /// Cooldown before an open breaker admits probes
    pub timeout: Duration,
    /// Concurrent probes allowed while half-open
    pub max_probe_requests: u32,
    /// Rolling window for clearing closed-state counts
    pub interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            failure_ratio: 0.6,
            min_requests: 10,
            timeout: Duration::from_secs(30),
            max_probe_requests: 3,
            interval: Duration::from_secs(10),
        }
    }
}

/// Request counts within the current state/window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub requests: u32,
    pub total_failures: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    opened_at: Option<Instant>,
    window_started: Instant,
    probes: u32,
}

/// Per-resource circuit breaker, safe for concurrent callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                opened_at: None,
                window_started: Instant::now(),
                probes: 0,
            }),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the open-cooldown transition if due.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Current counts snapshot.
    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().counts
    }

    /// Run an operation through the breaker.
    ///
    /// `is_failure` decides which errors count against the breaker; errors
    /// that do not (e.g. not-found, version conflict) are recorded as
    /// successful round-trips of the dependency.
    pub async fn call<T, F, Fut, C>(&self, is_failure: C, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
        C: Fn(&AppError) -> bool,
    {
        let (generation, probe) = self.try_acquire()?;
        let mut guard = ProbeGuard {
            breaker: self,
            generation,
            armed: probe,
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record(generation, true, probe),
            Err(err) if is_failure(err) => self.record(generation, false, probe),
            Err(_) => self.record(generation, true, probe),
        }

        result
    }

    fn try_acquire(&self) -> AppResult<(u64, bool)> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                if inner.window_started.elapsed() >= self.config.interval {
                    inner.counts = Counts::default();
                    inner.window_started = Instant::now();
                    inner.generation += 1;
                }
                Ok((inner.generation, false))
            }
            CircuitState::Open => Err(AppError::service_unavailable(&self.name)),
            CircuitState::HalfOpen => {
                if inner.probes >= self.config.max_probe_requests {
                    return Err(AppError::service_unavailable(&self.name));
                }
                inner.probes += 1;
                Ok((inner.generation, true))
            }
        }
    }

    fn record(&self, generation: u64, success: bool, probe: bool) {
        let mut inner = self.inner.lock().unwrap();
        // A result from a previous generation no longer means anything
        if generation != inner.generation {
            return;
        }

        if probe {
            inner.probes = inner.probes.saturating_sub(1);
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.counts.requests += 1;
                inner.counts.consecutive_successes += 1;
                inner.counts.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                inner.counts.requests += 1;
                inner.counts.total_failures += 1;
                inner.counts.consecutive_failures += 1;
                inner.counts.consecutive_successes = 0;
                if self.ready_to_trip(&inner.counts) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.counts.consecutive_successes += 1;
                if inner.counts.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, false) => {
                self.transition(&mut inner, CircuitState::Open);
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if generation == inner.generation {
            inner.probes = inner.probes.saturating_sub(1);
        }
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.timeout)
                .unwrap_or(false);
            if cooled_down {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.consecutive_failures >= self.config.failure_threshold {
            return true;
        }
        counts.requests >= self.config.min_requests
            && f64::from(counts.total_failures) / f64::from(counts.requests)
                >= self.config.failure_ratio
    }

    fn transition(&self, inner: &mut Inner, state: CircuitState) {
        tracing::warn!(
            breaker = %self.name,
            from = %inner.state,
            to = %state,
            "Circuit breaker state change"
        );
        inner.state = state;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.probes = 0;
        inner.window_started = Instant::now();
        inner.opened_at = match state {
            CircuitState::Open => Some(Instant::now()),
            _ => None,
        };
    }
}

/// Releases a half-open probe slot if the call is cancelled mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Named circuit breakers, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the breaker for a named resource.
    pub fn get(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().unwrap();
        // Double-check after acquiring the write lock
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(name, self.config.clone()))
            })
            .clone()
    }

    /// Names and states of all registered breakers.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}
