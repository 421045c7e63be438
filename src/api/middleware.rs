//! API Middleware
//!
//! Request context propagation, request logging, per-client rate limiting
//! and the idempotency capture/replay stage.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::domain::RequestContext;
use crate::error::AppError;
use crate::idempotency::{compute_request_hash, scoped_key, IdempotencyRecord};

use super::AppState;

// =========================================================================
// Request context
// =========================================================================

/// Build the request context from inbound headers and attach it to the
/// request; the request id is echoed back on the response.
pub async fn request_context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let headers = request.headers();

    let request_id = header_value(headers, "x-request-id")
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut context = RequestContext::new().with_request_id(request_id.clone());
    if let Some(trace_id) = header_value(headers, "x-amzn-trace-id") {
        context = context.with_trace_id(trace_id);
    }
    if let Some(correlation_id) = header_value(headers, "x-correlation-id") {
        context = context.with_correlation_id(correlation_id);
    }
    if let Some(user_id) = header_value(headers, "x-user-id") {
        context = context.with_user_id(user_id);
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

// =========================================================================
// Request logging
// =========================================================================

/// Log one line per request with method, path, status and latency.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.request_id.clone());

    let start = Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = ?request_id,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        request_id = ?request_id,
        "Request completed"
    );

    response
}

// =========================================================================
// Rate limiting
// =========================================================================

/// Token-bucket rate limiter keyed per client.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Mutex<TokenBucket>>>,
    rps: f64,
    burst: f64,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            rps: f64::from(rps),
            burst: f64::from(burst),
        }
    }

    /// Take a token for the client key, refilling by elapsed time.
    pub fn allow(&self, key: &str) -> bool {
        {
            let buckets = self.buckets.read().unwrap();
            if let Some(bucket) = buckets.get(key) {
                return self.take(&mut bucket.lock().unwrap());
            }
        }

        let mut buckets = self.buckets.write().unwrap();
        // Double-check after acquiring the write lock
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(TokenBucket {
                tokens: self.burst,
                last_refill: Instant::now(),
            })
        });
        let result = self.take(&mut bucket.lock().unwrap());
        result
    }

    fn take(&self, bucket: &mut TokenBucket) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have been idle long enough to be full again.
    pub fn remove_idle(&self) -> usize {
        let mut buckets = self.buckets.write().unwrap();
        let before = buckets.len();
        let burst = self.burst;
        let rps = self.rps;
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap();
            let refilled =
                bucket.tokens + bucket.last_refill.elapsed().as_secs_f64() * rps;
            refilled < burst
        });
        before - buckets.len()
    }
}

/// Reject clients that exhausted their token bucket with 429.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(request.headers());

    if !state.rate_limiter.allow(&key) {
        return AppError::RateLimited.into_response();
    }

    next.run(request).await
}

fn client_key(headers: &HeaderMap) -> String {
    if let Some(user_id) = header_value(headers, "x-user-id") {
        return format!("user:{user_id}");
    }
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(ip) = forwarded.split(',').next() {
            return format!("ip:{}", ip.trim());
        }
    }
    "anonymous".to_string()
}

// =========================================================================
// Idempotency
// =========================================================================

/// Replay cached responses for repeated `Idempotency-Key` mutations.
///
/// Applies to POST and PATCH only. On a miss the downstream 2xx response is
/// snapshotted under the user-scoped key; a replayed key carrying a different
/// request body fails with `IDEMPOTENCY_CONFLICT` instead of replaying a
/// mismatched response.
pub async fn idempotency_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.idempotency_enabled
        || (request.method() != Method::POST && request.method() != Method::PATCH)
    {
        return next.run(request).await;
    }

    let Some(idempotency_key) = header_value(request.headers(), "idempotency-key") else {
        return next.run(request).await;
    };

    let user_id = header_value(request.headers(), "x-user-id");
    let key = scoped_key(user_id.as_deref(), &idempotency_key);

    // Buffer the request body so it can be fingerprinted and re-read
    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, state.max_request_size).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::validation("Request body too large", None).into_response();
        }
    };
    let request_hash = compute_request_hash(&body_bytes);

    match state.idempotency_store.get(&key).await {
        Ok(Some(record)) => {
            if record.request_hash != request_hash {
                return AppError::IdempotencyConflict.into_response();
            }
            return replay_response(&record);
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(error = %err, "Idempotency lookup failed, proceeding uncached");
        }
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    // Only successful responses are worth replaying; failures may succeed
    // on a genuine retry
    if !response.status().is_success() {
        return response;
    }

    let (resp_parts, resp_body) = response.into_parts();
    let resp_bytes = match to_bytes(resp_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return AppError::internal(anyhow::anyhow!("failed to buffer response: {err}"))
                .into_response();
        }
    };

    let record = IdempotencyRecord {
        status_code: resp_parts.status.as_u16(),
        headers: resp_parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        body: resp_bytes.to_vec(),
        request_hash,
        created_at: Utc::now(),
    };

    if let Err(err) = state
        .idempotency_store
        .set(&key, record, state.idempotency_ttl)
        .await
    {
        tracing::warn!(error = %err, "Failed to store idempotency record");
    }

    Response::from_parts(resp_parts, Body::from(resp_bytes))
}

fn replay_response(record: &IdempotencyRecord) -> Response {
    let mut builder = Response::builder().status(record.status_code);
    for (name, value) in &record.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = builder.header("x-idempotent-replayed", "true");

    builder
        .body(Body::from(record.body.clone()))
        .unwrap_or_else(|err| {
            AppError::internal(anyhow::anyhow!("failed to replay response: {err}"))
                .into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_within_burst() {
        let limiter = RateLimiter::new(10, 3);
        assert!(limiter.allow("user:u1"));
        assert!(limiter.allow("user:u1"));
        assert!(limiter.allow("user:u1"));
        assert!(!limiter.allow("user:u1"));

        // Separate clients have separate buckets
        assert!(limiter.allow("user:u2"));
    }

    #[test]
    fn test_rate_limiter_refills_over_time() {
        let limiter = RateLimiter::new(1000, 1);
        assert!(limiter.allow("u1"));
        assert!(!limiter.allow("u1"));

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.allow("u1"));
    }

    #[test]
    fn test_remove_idle_drops_full_buckets() {
        let limiter = RateLimiter::new(1000, 2);
        assert!(limiter.allow("u1"));

        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(limiter.remove_idle(), 1);
    }

    #[test]
    fn test_client_key_prefers_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers), "ip:10.0.0.1");

        headers.insert("x-user-id", "u1".parse().unwrap());
        assert_eq!(client_key(&headers), "user:u1");

        assert_eq!(client_key(&HeaderMap::new()), "anonymous");
    }
}
