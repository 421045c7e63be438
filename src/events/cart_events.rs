//! Cart event publisher
//!
//! Builds the typed cart events and hands them to the underlying publisher.
//! Failures are logged and swallowed here so callers never unwind a
//! successful write because the bus was flaky.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Cart, CartItem, RequestContext};

use super::{
    CartAbandonedData, CartClearedData, CartCreatedData, CartItemDto, Event, EventMetadata,
    EventPublisher, ItemAddedData, ItemRemovedData, ItemUpdatedData, EVENT_TYPE_CART_ABANDONED,
    EVENT_TYPE_CART_CLEARED, EVENT_TYPE_CART_CREATED, EVENT_TYPE_ITEM_ADDED,
    EVENT_TYPE_ITEM_REMOVED, EVENT_TYPE_ITEM_UPDATED,
};

/// Publishes the cart event vocabulary over an [`EventPublisher`].
#[derive(Clone)]
pub struct CartEventPublisher {
    publisher: Arc<dyn EventPublisher>,
    source: String,
}

impl CartEventPublisher {
    pub fn new(publisher: Arc<dyn EventPublisher>, source: impl Into<String>) -> Self {
        Self {
            publisher,
            source: source.into(),
        }
    }

    pub async fn cart_created(&self, ctx: &RequestContext, cart: &Cart) {
        let data = CartCreatedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            created_at: cart.created_at,
            expires_at: cart.expires_at,
        };
        self.emit(ctx, EVENT_TYPE_CART_CREATED, &data).await;
    }

    pub async fn item_added(&self, ctx: &RequestContext, cart: &Cart, item: &CartItem) {
        let data = ItemAddedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            item: CartItemDto::from(item),
            cart_total: cart.total_price(),
            item_count: cart.item_count(),
        };
        self.emit(ctx, EVENT_TYPE_ITEM_ADDED, &data).await;
    }

    pub async fn item_removed(
        &self,
        ctx: &RequestContext,
        cart: &Cart,
        item_id: Uuid,
        product_id: &str,
    ) {
        let data = ItemRemovedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            item_id,
            product_id: product_id.to_string(),
            cart_total: cart.total_price(),
            item_count: cart.item_count(),
        };
        self.emit(ctx, EVENT_TYPE_ITEM_REMOVED, &data).await;
    }

    pub async fn item_updated(
        &self,
        ctx: &RequestContext,
        cart: &Cart,
        item: &CartItem,
        prev_quantity: i32,
    ) {
        let data = ItemUpdatedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            item: CartItemDto::from(item),
            prev_quantity,
            cart_total: cart.total_price(),
        };
        self.emit(ctx, EVENT_TYPE_ITEM_UPDATED, &data).await;
    }

    pub async fn cart_cleared(
        &self,
        ctx: &RequestContext,
        cart: &Cart,
        items_removed: usize,
        previous_total: i64,
    ) {
        let data = CartClearedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            items_removed,
            previous_total,
        };
        self.emit(ctx, EVENT_TYPE_CART_CLEARED, &data).await;
    }

    pub async fn cart_abandoned(&self, ctx: &RequestContext, cart: &Cart) {
        let data = CartAbandonedData {
            cart_id: cart.id,
            user_id: cart.user_id.clone(),
            item_count: cart.item_count(),
            cart_total: cart.total_price(),
            last_updated: cart.updated_at,
            expires_at: cart.expires_at,
        };
        self.emit(ctx, EVENT_TYPE_CART_ABANDONED, &data).await;
    }

    async fn emit<T: serde::Serialize>(&self, ctx: &RequestContext, event_type: &str, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "Failed to encode event payload");
                return;
            }
        };

        let event = Event {
            id: Uuid::new_v4(),
            source: self.source.clone(),
            event_type: event_type.to_string(),
            time: Utc::now(),
            data,
            metadata: EventMetadata::from(ctx),
            data_version: "1.0".to_string(),
        };

        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(event_type, error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingPublisher;

    #[tokio::test]
    async fn test_item_added_payload() {
        let recorder = Arc::new(RecordingPublisher::new());
        let publisher = CartEventPublisher::new(recorder.clone(), "cart-service");

        let mut cart = Cart::new("u1");
        cart.add_item(CartItem::new("p1", 2, 500)).unwrap();
        let item = cart.find_item_by_product("p1").unwrap().clone();

        let ctx = RequestContext::new()
            .with_request_id("req-1")
            .with_user_id("u1");
        publisher.item_added(&ctx, &cart, &item).await;

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "cart.item_added");
        assert_eq!(events[0].source, "cart-service");
        assert_eq!(events[0].data["cart_total"], 1000);
        assert_eq!(events[0].data["item"]["subtotal"], 1000);
        assert_eq!(events[0].metadata.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_cart_lifecycle_event_types() {
        let recorder = Arc::new(RecordingPublisher::new());
        let publisher = CartEventPublisher::new(recorder.clone(), "cart-service");
        let ctx = RequestContext::new();

        let mut cart = Cart::new("u1");
        publisher.cart_created(&ctx, &cart).await;

        cart.add_item(CartItem::new("p1", 1, 100)).unwrap();
        let item = cart.items[0].clone();
        publisher.item_updated(&ctx, &cart, &item, 1).await;
        publisher
            .item_removed(&ctx, &cart, item.item_id, &item.product_id)
            .await;
        publisher.cart_cleared(&ctx, &cart, 1, 100).await;
        publisher.cart_abandoned(&ctx, &cart).await;

        assert_eq!(
            recorder.event_types(),
            vec![
                "cart.created",
                "cart.item_updated",
                "cart.item_removed",
                "cart.cleared",
                "cart.abandoned",
            ]
        );
    }
}
