//! Domain events
//!
//! Typed cart events wrapped in a transport-neutral envelope, plus the
//! publisher port. Publishing is best-effort: a successful cart write is
//! never reversed by a failing bus.

mod cart_events;
mod memory;
mod outbox;

pub use cart_events::CartEventPublisher;
pub use memory::{NoopPublisher, RecordingPublisher};
pub use outbox::PgOutboxPublisher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CartItem, RequestContext};
use crate::error::AppResult;

// Event types
pub const EVENT_TYPE_CART_CREATED: &str = "cart.created";
pub const EVENT_TYPE_ITEM_ADDED: &str = "cart.item_added";
pub const EVENT_TYPE_ITEM_REMOVED: &str = "cart.item_removed";
pub const EVENT_TYPE_ITEM_UPDATED: &str = "cart.item_updated";
pub const EVENT_TYPE_CART_CLEARED: &str = "cart.cleared";
pub const EVENT_TYPE_CART_ABANDONED: &str = "cart.abandoned";

/// Envelope published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
    pub data_version: String,
}

/// Request-scoped metadata attached to every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<&RequestContext> for EventMetadata {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            correlation_id: ctx.correlation_id.clone().or_else(|| ctx.request_id.clone()),
            user_id: ctx.user_id.clone(),
        }
    }
}

/// Publisher port.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: Event) -> AppResult<()>;

    /// Publish a batch of events, tolerating partial failure.
    ///
    /// Input is chunked into groups of at most ten; failed chunks are logged
    /// and skipped without failing the whole call.
    async fn publish_batch(&self, events: Vec<Event>) -> AppResult<()>;
}

/// Maximum events per publish chunk.
pub const PUBLISH_BATCH_SIZE: usize = 10;

// Event payloads

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartCreatedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub item: CartItemDto,
    pub cart_total: i64,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub item_id: Uuid,
    pub product_id: String,
    pub cart_total: i64,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemUpdatedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub item: CartItemDto,
    pub prev_quantity: i32,
    pub cart_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartClearedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub items_removed: usize,
    pub previous_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartAbandonedData {
    pub cart_id: Uuid,
    pub user_id: String,
    pub item_count: usize,
    pub cart_total: i64,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Item line as carried in event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemDto {
    pub item_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
    pub added_at: DateTime<Utc>,
}

impl From<&CartItem> for CartItemDto {
    fn from(item: &CartItem) -> Self {
        Self {
            item_id: item.item_id,
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal(),
            added_at: item.added_at,
        }
    }
}
