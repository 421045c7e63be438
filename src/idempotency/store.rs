//! In-memory idempotency store
//!
//! Map behind a reader/writer lock. Expired records are invisible to readers
//! immediately and physically removed by the maintenance sweep.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;

use super::{IdempotencyRecord, IdempotencyStore};

#[derive(Debug)]
struct StoredRecord {
    record: IdempotencyRecord,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of the idempotency store.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired records, returning how many were dropped.
    pub fn remove_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, stored| stored.expires_at > now);
        before - records.len()
    }

    /// Number of stored records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> AppResult<Option<IdempotencyRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(key)
            .filter(|stored| stored.expires_at > Utc::now())
            .map(|stored| stored.record.clone()))
    }

    async fn set(&self, key: &str, record: IdempotencyRecord, ttl: Duration) -> AppResult<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut records = self.records.write().unwrap();
        records.insert(key.to_string(), StoredRecord { record, expires_at });
        Ok(())
    }
}
