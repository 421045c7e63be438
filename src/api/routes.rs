//! API Routes
//!
//! HTTP endpoint definitions for the cart API.

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{validate_quantity, Cart, RequestContext};
use crate::error::AppError;
use crate::service::{AddItemCommand, UpdateItemCommand};

use super::AppState;

const MAX_ID_LENGTH: usize = 64;
const MAX_UNIT_PRICE: i64 = 999_999_999;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: i64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
    /// Caller-observed cart version; 0 or absent skips the check
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MergeCartRequest {
    pub guest_id: String,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub id: Uuid,
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub item_count: usize,
    pub total_quantity: i32,
    pub total_price: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub item_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
    pub added_at: DateTime<Utc>,
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id,
            user_id: cart.user_id.clone(),
            items: cart
                .items
                .iter()
                .map(|item| CartItemResponse {
                    item_id: item.item_id,
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal: item.subtotal(),
                    added_at: item.added_at,
                })
                .collect(),
            item_count: cart.item_count(),
            total_quantity: cart.total_quantity(),
            total_price: cart.total_price(),
            version: cart.version,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
            expires_at: cart.expires_at,
        }
    }
}

// =========================================================================
// Validation
// =========================================================================

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_user_id(user_id: &str) -> Result<(), AppError> {
    if user_id.is_empty() {
        return Err(AppError::validation("user_id is required", None));
    }
    if user_id.len() > MAX_ID_LENGTH {
        return Err(AppError::validation(
            "user_id too long",
            Some(json!({ "max_length": MAX_ID_LENGTH })),
        ));
    }
    if Uuid::parse_str(user_id).is_err() && !is_identifier(user_id) {
        return Err(AppError::validation("Invalid user_id format", None));
    }
    Ok(())
}

fn parse_item_id(item_id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(item_id)
        .map_err(|_| AppError::validation("Invalid item_id format", Some(json!({
            "item_id": item_id,
        }))))
}

impl AddItemRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.product_id.is_empty() || self.product_id.len() > MAX_ID_LENGTH {
            return Err(AppError::validation(
                "Invalid product_id",
                Some(json!({ "max_length": MAX_ID_LENGTH })),
            ));
        }
        if !is_identifier(&self.product_id) {
            return Err(AppError::validation(
                "Invalid product_id format",
                Some(json!({
                    "product_id": "must be alphanumeric with underscores and hyphens only",
                })),
            ));
        }
        validate_quantity(self.quantity)?;
        if self.unit_price < 0 || self.unit_price > MAX_UNIT_PRICE {
            return Err(AppError::validation(
                "Invalid unit_price",
                Some(json!({ "min": 0, "max": MAX_UNIT_PRICE })),
            ));
        }
        Ok(())
    }
}

impl UpdateQuantityRequest {
    fn validate(&self) -> Result<(), AppError> {
        validate_quantity(self.quantity)?;
        if self.version < 0 {
            return Err(AppError::validation(
                "version must not be negative",
                Some(json!({ "version": self.version })),
            ));
        }
        Ok(())
    }
}

impl MergeCartRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.guest_id.is_empty() || self.guest_id.len() > MAX_ID_LENGTH {
            return Err(AppError::validation("Invalid guest_id", None));
        }
        if Uuid::parse_str(&self.guest_id).is_err() && !is_identifier(&self.guest_id) {
            return Err(AppError::validation("Invalid guest_id format", None));
        }
        Ok(())
    }
}

/// Decode a JSON body, rejecting unknown fields.
fn decode_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::validation("Invalid request body", Some(json!({ "error": e.to_string() })))
    })
}

// =========================================================================
// Router
// =========================================================================

/// Create the cart API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/cart/:user_id", get(get_cart).delete(clear_cart))
        .route("/v1/cart/:user_id/items", post(add_item))
        .route(
            "/v1/cart/:user_id/items/:item_id",
            axum::routing::patch(update_item).delete(remove_item),
        )
        .route("/v1/cart/:user_id/merge", post(merge_cart))
}

// =========================================================================
// GET /v1/cart/:user_id
// =========================================================================

/// Fetch a cart
async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CartResponse>, AppError> {
    validate_user_id(&user_id)?;

    let cart = state.service.get_cart(&user_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

// =========================================================================
// POST /v1/cart/:user_id/items
// =========================================================================

/// Add an item to the cart, creating the cart on first use
async fn add_item(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<CartResponse>), AppError> {
    validate_user_id(&user_id)?;

    let request: AddItemRequest = decode_json(&body)?;
    request.validate()?;

    let cart = state
        .service
        .add_item(
            &ctx,
            &user_id,
            AddItemCommand {
                product_id: request.product_id,
                quantity: request.quantity,
                unit_price: request.unit_price,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CartResponse::from(&cart))))
}

// =========================================================================
// PATCH /v1/cart/:user_id/items/:item_id
// =========================================================================

/// Update an item quantity, optionally version-checked
async fn update_item(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Json<CartResponse>, AppError> {
    validate_user_id(&user_id)?;
    let item_id = parse_item_id(&item_id)?;

    let request: UpdateQuantityRequest = decode_json(&body)?;
    request.validate()?;

    let cart = state
        .service
        .update_item_quantity(
            &ctx,
            &user_id,
            UpdateItemCommand {
                item_id,
                quantity: request.quantity,
                expected_version: request.version,
            },
        )
        .await?;

    Ok(Json(CartResponse::from(&cart)))
}

// =========================================================================
// DELETE /v1/cart/:user_id/items/:item_id
// =========================================================================

/// Remove an item from the cart
async fn remove_item(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<CartResponse>, AppError> {
    validate_user_id(&user_id)?;
    let item_id = parse_item_id(&item_id)?;

    let cart = state.service.remove_item(&ctx, &user_id, item_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

// =========================================================================
// DELETE /v1/cart/:user_id
// =========================================================================

/// Empty the cart
async fn clear_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<StatusCode, AppError> {
    validate_user_id(&user_id)?;

    state.service.clear_cart(&ctx, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// POST /v1/cart/:user_id/merge
// =========================================================================

/// Merge a guest cart into the user's cart
async fn merge_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Json<CartResponse>, AppError> {
    validate_user_id(&user_id)?;

    let request: MergeCartRequest = decode_json(&body)?;
    request.validate()?;

    let cart = state
        .service
        .merge_guest_cart(&ctx, &user_id, &request.guest_id)
        .await?;

    Ok(Json(CartResponse::from(&cart)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("user-123").is_ok());
        assert!(validate_user_id("d9428888-122b-11e1-b85c-61cd3cbb3210").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id(&"x".repeat(65)).is_err());
        assert!(validate_user_id("bad id!").is_err());
    }

    #[test]
    fn test_add_item_request_validation() {
        let ok = AddItemRequest {
            product_id: "p1".into(),
            quantity: 2,
            unit_price: 500,
        };
        assert!(ok.validate().is_ok());

        let bad_product = AddItemRequest {
            product_id: "not valid!".into(),
            quantity: 2,
            unit_price: 500,
        };
        assert!(matches!(
            bad_product.validate(),
            Err(AppError::Validation { .. })
        ));

        let zero_quantity = AddItemRequest {
            product_id: "p1".into(),
            quantity: 0,
            unit_price: 500,
        };
        assert!(matches!(
            zero_quantity.validate(),
            Err(AppError::InvalidQuantity { .. })
        ));

        let over_quantity = AddItemRequest {
            product_id: "p1".into(),
            quantity: 100,
            unit_price: 500,
        };
        assert!(matches!(
            over_quantity.validate(),
            Err(AppError::QuantityLimitExceeded { .. })
        ));

        let bad_price = AddItemRequest {
            product_id: "p1".into(),
            quantity: 1,
            unit_price: 1_000_000_000,
        };
        assert!(matches!(
            bad_price.validate(),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn test_decode_json_rejects_unknown_fields() {
        let body = Bytes::from(r#"{"product_id":"p1","quantity":1,"surprise":true}"#);
        let result: Result<AddItemRequest, _> = decode_json(&body);
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_update_request_defaults_version() {
        let body = Bytes::from(r#"{"quantity":4}"#);
        let request: UpdateQuantityRequest = decode_json(&body).unwrap();
        assert_eq!(request.version, 0);
        assert!(request.validate().is_ok());
    }
}
