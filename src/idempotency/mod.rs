//! Idempotency cache
//!
//! Stores response snapshots keyed by client-supplied idempotency keys so
//! retried mutations replay the original outcome instead of re-executing.

mod store;

pub use store::InMemoryIdempotencyStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// A cached response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Fingerprint of the request body the snapshot was taken for
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Storage contract for idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up an unexpired record.
    async fn get(&self, key: &str) -> AppResult<Option<IdempotencyRecord>>;

    /// Store a record under the key with the given time to live.
    async fn set(&self, key: &str, record: IdempotencyRecord, ttl: Duration) -> AppResult<()>;
}

/// Scope an idempotency key to the requesting user.
pub fn scoped_key(user_id: Option<&str>, idempotency_key: &str) -> String {
    format!("{}:{}", user_id.unwrap_or("anonymous"), idempotency_key)
}

/// SHA-256 fingerprint of a request body, for replay-mismatch detection.
pub fn compute_request_hash(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
