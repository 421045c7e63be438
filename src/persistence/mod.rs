//! Cart persistence port
//!
//! The repository contract the service depends on. Implementations must
//! provide single-row strongly consistent conditional writes; nothing outside
//! an adapter may depend on how rows are physically encoded.

mod memory;
mod postgres;

pub use memory::InMemoryCartRepository;
pub use postgres::PgCartRepository;

use async_trait::async_trait;

use crate::domain::Cart;
use crate::error::AppResult;

/// Repository contract for cart persistence.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Load a cart by user id. Fails with `CART_NOT_FOUND` when absent.
    async fn get_cart(&self, user_id: &str) -> AppResult<Cart>;

    /// Unconditional upsert of the cart row.
    async fn save_cart(&self, cart: &Cart) -> AppResult<()>;

    /// Version-conditional save.
    ///
    /// Succeeds iff no row exists for the user or the stored version equals
    /// `expected_version`; otherwise fails `CONFLICT` carrying the currently
    /// stored version.
    async fn save_cart_with_version(&self, cart: &Cart, expected_version: i64) -> AppResult<()>;

    /// Delete the cart row. Fails with `CART_NOT_FOUND` when absent.
    async fn delete_cart(&self, user_id: &str) -> AppResult<()>;

    /// Carts whose time-to-live has passed, for store-driven expiry reaping.
    async fn list_expired_carts(&self, limit: i64) -> AppResult<Vec<Cart>>;

    /// Liveness probe against the backend.
    async fn health_check(&self) -> AppResult<()>;
}
