//! Cart Aggregate
//!
//! The cart is the aggregate root: one per user, exclusively owning its
//! items. All mutations go through the methods below so the business limits
//! hold after every successful operation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

// Cart limits - business rules
pub const MAX_ITEMS_PER_CART: usize = 100;
pub const MAX_QUANTITY_PER_ITEM: i32 = 99;
pub const MIN_QUANTITY_PER_ITEM: i32 = 1;
pub const CART_EXPIRATION_DAYS: i64 = 7;

/// A shopping cart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: String,
    pub items: Vec<CartItem>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// An item line in the cart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    /// Price in minor units (cents)
    pub unit_price: i64,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// Create a new cart item with a fresh line id
    pub fn new(product_id: impl Into<String>, quantity: i32, unit_price: i64) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            product_id: product_id.into(),
            quantity,
            unit_price,
            added_at: Utc::now(),
        }
    }

    /// Line subtotal in minor units
    pub fn subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

impl Cart {
    /// Create a new cart for a user at version 1
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            items: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::days(CART_EXPIRATION_DAYS),
        }
    }

    /// Check if the cart has passed its expiration time
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Number of distinct item lines
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Total quantity across all lines
    pub fn total_quantity(&self) -> i32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Total price in minor units
    pub fn total_price(&self) -> i64 {
        self.items.iter().map(CartItem::subtotal).sum()
    }

    /// Find an item line by its id
    pub fn find_item(&self, item_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    /// Find an item line by product id
    pub fn find_item_by_product(&self, product_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Add an item, or fold it into an existing line for the same product
    ///
    /// Duplicate products collapse into one line with the summed quantity;
    /// the latest unit price wins.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), AppError> {
        validate_quantity(item.quantity)?;

        if let Some(idx) = self
            .items
            .iter()
            .position(|existing| existing.product_id == item.product_id)
        {
            let new_quantity = self.items[idx].quantity + item.quantity;
            if new_quantity > MAX_QUANTITY_PER_ITEM {
                return Err(AppError::QuantityLimitExceeded {
                    quantity: new_quantity,
                    max_allowed: MAX_QUANTITY_PER_ITEM,
                });
            }
            self.items[idx].quantity = new_quantity;
            self.items[idx].unit_price = item.unit_price;
            self.updated_at = Utc::now();
            return Ok(());
        }

        if self.items.len() >= MAX_ITEMS_PER_CART {
            return Err(AppError::CartLimitExceeded {
                current_count: self.items.len(),
                max_allowed: MAX_ITEMS_PER_CART,
            });
        }

        self.items.push(item);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove an item line by id; remaining order is not preserved
    pub fn remove_item(&mut self, item_id: Uuid) -> Result<(), AppError> {
        let idx = self
            .items
            .iter()
            .position(|item| item.item_id == item_id)
            .ok_or_else(|| AppError::item_not_found(&self.user_id, item_id.to_string()))?;

        self.items.swap_remove(idx);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Set the quantity of an existing item line
    pub fn update_item_quantity(&mut self, item_id: Uuid, quantity: i32) -> Result<(), AppError> {
        validate_quantity(quantity)?;

        let item = self
            .items
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or_else(|| AppError::item_not_found(&self.user_id, item_id.to_string()))?;

        item.quantity = quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove all items; never fails
    pub fn clear(&mut self) {
        self.items.clear();
        self.updated_at = Utc::now();
    }

    /// Bump the version for optimistic locking
    pub fn increment_version(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Push the expiration window out from now
    pub fn extend_expiration(&mut self) {
        let now = Utc::now();
        self.expires_at = now + Duration::days(CART_EXPIRATION_DAYS);
        self.updated_at = now;
    }

    /// Merge a guest cart into this cart
    ///
    /// For duplicate products the higher quantity wins (not the sum). New
    /// guest items are appended only while the cart is below its line limit;
    /// overflow is dropped.
    pub fn merge(&mut self, guest_cart: Cart) {
        for guest_item in guest_cart.items {
            if let Some(idx) = self
                .items
                .iter()
                .position(|item| item.product_id == guest_item.product_id)
            {
                if guest_item.quantity > self.items[idx].quantity {
                    self.items[idx].quantity = guest_item.quantity;
                }
            } else if self.items.len() < MAX_ITEMS_PER_CART {
                self.items.push(guest_item);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Condensed view for logging
    pub fn summary(&self) -> CartSummary {
        CartSummary {
            id: self.id,
            user_id: self.user_id.clone(),
            item_count: self.item_count(),
            total_quantity: self.total_quantity(),
            total_price: self.total_price(),
            version: self.version,
        }
    }
}

/// Condensed cart projection
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub id: Uuid,
    pub user_id: String,
    pub item_count: usize,
    pub total_quantity: i32,
    pub total_price: i64,
    pub version: i64,
}

/// Validate that a quantity is within the allowed bounds
pub fn validate_quantity(quantity: i32) -> Result<(), AppError> {
    if quantity < MIN_QUANTITY_PER_ITEM {
        return Err(AppError::InvalidQuantity { quantity });
    }
    if quantity > MAX_QUANTITY_PER_ITEM {
        return Err(AppError::QuantityLimitExceeded {
            quantity,
            max_allowed: MAX_QUANTITY_PER_ITEM,
        });
    }
    Ok(())
}
