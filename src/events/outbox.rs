//! Outbox publisher
//!
//! Writes events to an outbox table drained asynchronously by the bus relay.
//! The physical relay is outside this service; from here the outbox row is
//! the publish.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

use super::{Event, EventPublisher, PUBLISH_BATCH_SIZE};

/// Postgres outbox implementation of the event publisher.
#[derive(Debug, Clone)]
pub struct PgOutboxPublisher {
    pool: PgPool,
    bus_name: String,
}

impl PgOutboxPublisher {
    /// Create a new outbox publisher.
    pub fn new(pool: PgPool, bus_name: impl Into<String>) -> Self {
        Self {
            pool,
            bus_name: bus_name.into(),
        }
    }

    async fn insert_chunk(&self, chunk: &[Event]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for event in chunk {
            let payload = serde_json::to_value(event)?;
            sqlx::query(
                r#"
                INSERT INTO event_outbox (id, bus, source, event_type, payload, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(event.id)
            .bind(&self.bus_name)
            .bind(&event.source)
            .bind(&event.event_type)
            .bind(&payload)
            .bind(event.time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for PgOutboxPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        let event_type = event.event_type.clone();
        let event_id = event.id;

        self.insert_chunk(std::slice::from_ref(&event))
            .await
            .map_err(AppError::event_publish)?;

        tracing::debug!(event_type = %event_type, event_id = %event_id, "Event published");
        Ok(())
    }

    async fn publish_batch(&self, events: Vec<Event>) -> AppResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        for chunk in events.chunks(PUBLISH_BATCH_SIZE) {
            if let Err(e) = self.insert_chunk(chunk).await {
                // Partial success is accepted: log the chunk failure and move on
                tracing::warn!(
                    error = %e,
                    failed_count = chunk.len(),
                    "Some events failed to publish"
                );
            }
        }

        Ok(())
    }
}
