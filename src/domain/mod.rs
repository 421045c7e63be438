//! Domain model
//!
//! Pure cart domain types and rules, independent of transport and storage.

mod cart;
mod context;

pub use cart::{
    validate_quantity, Cart, CartItem, CartSummary, CART_EXPIRATION_DAYS, MAX_ITEMS_PER_CART,
    MAX_QUANTITY_PER_ITEM, MIN_QUANTITY_PER_ITEM,
};
pub use context::RequestContext;
