//! Cart service
//!
//! Orchestrates the domain model, persistence and event publishing, and
//! enforces the concurrency protocol: quantity updates are version-checked,
//! adds and removes are last-writer-wins (the merge-by-product rule already
//! absorbs concurrent adds for the same product).

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Cart, CartItem, RequestContext};
use crate::error::{AppError, AppResult};
use crate::events::CartEventPublisher;
use crate::persistence::CartRepository;

/// Request to add an item to a cart.
#[derive(Debug, Clone)]
pub struct AddItemCommand {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: i64,
}

/// Request to update an item quantity.
#[derive(Debug, Clone)]
pub struct UpdateItemCommand {
    pub item_id: Uuid,
    pub quantity: i32,
    /// Caller-observed version; 0 skips the pre-check
    pub expected_version: i64,
}

/// Cart business operations.
pub struct CartService {
    repo: Arc<dyn CartRepository>,
    events: CartEventPublisher,
    publish_events: bool,
}

impl CartService {
    pub fn new(
        repo: Arc<dyn CartRepository>,
        events: CartEventPublisher,
        publish_events: bool,
    ) -> Self {
        Self {
            repo,
            events,
            publish_events,
        }
    }

    /// Retrieve a cart, treating an expired cart as gone.
    pub async fn get_cart(&self, user_id: &str) -> AppResult<Cart> {
        let cart = self.repo.get_cart(user_id).await?;
        if cart.is_expired() {
            return Err(AppError::cart_expired(user_id));
        }
        Ok(cart)
    }

    /// Retrieve a cart, or create a fresh one when absent or expired.
    ///
    /// Returns the cart and whether it was created by this call.
    pub async fn get_or_create_cart(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AppResult<(Cart, bool)> {
        match self.repo.get_cart(user_id).await {
            Ok(cart) if !cart.is_expired() => Ok((cart, false)),
            Ok(_) | Err(AppError::CartNotFound { .. }) => {
                let cart = Cart::new(user_id);
                self.repo.save_cart(&cart).await?;

                if self.publish_events {
                    self.events.cart_created(ctx, &cart).await;
                }

                Ok((cart, true))
            }
            Err(err) => Err(err),
        }
    }

    /// Add an item to the user's cart.
    ///
    /// Intentionally last-writer-wins rather than version-checked: repeated
    /// additions across concurrent clients are commutative up to the
    /// quantity caps.
    pub async fn add_item(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        command: AddItemCommand,
    ) -> AppResult<Cart> {
        let (mut cart, _) = self.get_or_create_cart(ctx, user_id).await?;

        let item = CartItem::new(
            command.product_id.clone(),
            command.quantity,
            command.unit_price,
        );
        cart.add_item(item)?;

        cart.increment_version();
        self.repo.save_cart(&cart).await?;

        if self.publish_events {
            if let Some(item) = cart.find_item_by_product(&command.product_id) {
                self.events.item_added(ctx, &cart, item).await;
            }
        }

        Ok(cart)
    }

    /// Update an item quantity under optimistic concurrency.
    ///
    /// A supplied `expected_version` is checked against the loaded cart, and
    /// the save itself is version-conditional. Conflicts surface unchanged;
    /// the caller decides whether to refetch and retry.
    pub async fn update_item_quantity(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        command: UpdateItemCommand,
    ) -> AppResult<Cart> {
        let mut cart = self.get_cart(user_id).await?;

        if command.expected_version > 0 && cart.version != command.expected_version {
            return Err(AppError::conflict(command.expected_version, cart.version));
        }

        let prev_quantity = cart.find_item(command.item_id).map(|item| item.quantity);
        cart.update_item_quantity(command.item_id, command.quantity)?;

        let expected = cart.version;
        cart.increment_version();
        self.repo.save_cart_with_version(&cart, expected).await?;

        if self.publish_events {
            if let (Some(item), Some(prev_quantity)) =
                (cart.find_item(command.item_id), prev_quantity)
            {
                self.events.item_updated(ctx, &cart, item, prev_quantity).await;
            }
        }

        Ok(cart)
    }

    /// Remove an item from the cart.
    pub async fn remove_item(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        item_id: Uuid,
    ) -> AppResult<Cart> {
        let mut cart = self.get_cart(user_id).await?;

        let product_id = cart
            .find_item(item_id)
            .map(|item| item.product_id.clone())
            .unwrap_or_default();
        cart.remove_item(item_id)?;

        cart.increment_version();
        self.repo.save_cart(&cart).await?;

        if self.publish_events {
            self.events
                .item_removed(ctx, &cart, item_id, &product_id)
                .await;
        }

        Ok(cart)
    }

    /// Remove all items from the cart. A missing cart is a silent no-op.
    pub async fn clear_cart(&self, ctx: &RequestContext, user_id: &str) -> AppResult<()> {
        let mut cart = match self.get_cart(user_id).await {
            Ok(cart) => cart,
            Err(AppError::CartNotFound { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };

        let items_removed = cart.item_count();
        let previous_total = cart.total_price();

        cart.clear();
        cart.increment_version();
        self.repo.save_cart(&cart).await?;

        if self.publish_events {
            self.events
                .cart_cleared(ctx, &cart, items_removed, previous_total)
                .await;
        }

        Ok(())
    }

    /// Delete the cart row entirely. A missing cart counts as success.
    pub async fn delete_cart(&self, user_id: &str) -> AppResult<()> {
        match self.repo.delete_cart(user_id).await {
            Ok(()) | Err(AppError::CartNotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Merge a guest cart into the user's cart.
    ///
    /// The guest cart is deleted best-effort afterwards; a failed deletion
    /// is ignored. The merged save is not version-checked.
    pub async fn merge_guest_cart(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        guest_id: &str,
    ) -> AppResult<Cart> {
        let (mut user_cart, _) = self.get_or_create_cart(ctx, user_id).await?;

        let guest_cart = match self.repo.get_cart(guest_id).await {
            Ok(cart) => cart,
            Err(AppError::CartNotFound { .. }) => return Ok(user_cart),
            Err(err) => return Err(err),
        };

        user_cart.merge(guest_cart);
        user_cart.increment_version();
        self.repo.save_cart(&user_cart).await?;

        if let Err(err) = self.repo.delete_cart(guest_id).await {
            tracing::debug!(guest_id, error = %err, "Ignoring guest cart deletion failure");
        }

        Ok(user_cart)
    }

    /// Extend the cart's expiration window.
    pub async fn touch_cart(&self, user_id: &str) -> AppResult<()> {
        let mut cart = self.get_cart(user_id).await?;
        cart.extend_expiration();
        self.repo.save_cart(&cart).await
    }

    /// Probe the persistence backend.
    pub async fn health_check(&self) -> AppResult<()> {
        self.repo.health_check().await
    }
}
