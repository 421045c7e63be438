//! In-memory cart repository
//!
//! Backs tests and local runs. Carts are cloned on both read and write so
//! callers can never alias store state.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::Cart;
use crate::error::{AppError, AppResult};

use super::CartRepository;

/// In-memory implementation of the cart repository.
#[derive(Debug, Default)]
pub struct InMemoryCartRepository {
    carts: RwLock<HashMap<String, Cart>>,
}

impl InMemoryCartRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all carts (test helper).
    pub fn clear(&self) {
        self.carts.write().unwrap().clear();
    }

    /// Number of stored carts (test helper).
    pub fn count(&self) -> usize {
        self.carts.read().unwrap().len()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn get_cart(&self, user_id: &str) -> AppResult<Cart> {
        let carts = self.carts.read().unwrap();
        carts
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::cart_not_found(user_id))
    }

    async fn save_cart(&self, cart: &Cart) -> AppResult<()> {
        let mut carts = self.carts.write().unwrap();
        carts.insert(cart.user_id.clone(), cart.clone());
        Ok(())
    }

    async fn save_cart_with_version(&self, cart: &Cart, expected_version: i64) -> AppResult<()> {
        let mut carts = self.carts.write().unwrap();

        if let Some(existing) = carts.get(&cart.user_id) {
            if existing.version != expected_version {
                return Err(AppError::conflict(expected_version, existing.version));
            }
        }

        carts.insert(cart.user_id.clone(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, user_id: &str) -> AppResult<()> {
        let mut carts = self.carts.write().unwrap();
        carts
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| AppError::cart_not_found(user_id))
    }

    async fn list_expired_carts(&self, limit: i64) -> AppResult<Vec<Cart>> {
        let now = Utc::now();
        let carts = self.carts.read().unwrap();
        Ok(carts
            .values()
            .filter(|cart| cart.expires_at < now)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
