//! Single-table Postgres adapter
//!
//! Each cart occupies exactly one row keyed by `(pk, sk)` with the full
//! record encoded as a JSONB attribute document. The user id appears in both
//! keys on purpose: the sort key stays free to discriminate future
//! per-item rows (`ITEM#...`) without a schema change. `version` and `ttl`
//! are mirrored into guard columns so the conditional write and the expiry
//! reaper never have to look inside the document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Cart, CartItem};
use crate::error::{AppError, AppResult};

use super::CartRepository;

// Key prefixes for single-table design
const USER_KEY_PREFIX: &str = "USER#";
const CART_KEY_PREFIX: &str = "CART#";

/// Postgres implementation of the cart repository.
#[derive(Debug, Clone)]
pub struct PgCartRepository {
    pool: PgPool,
    table: String,
}

/// Attribute document stored in the row.
#[derive(Debug, Serialize, Deserialize)]
struct CartRecord {
    #[serde(rename = "type")]
    record_type: String,
    id: Uuid,
    user_id: String,
    items: Vec<CartItemRecord>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ttl: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CartItemRecord {
    item_id: Uuid,
    product_id: String,
    quantity: i32,
    unit_price: i64,
    added_at: DateTime<Utc>,
}

impl PgCartRepository {
    /// Create a new repository over the shared pool.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn keys(user_id: &str) -> (String, String) {
        (
            format!("{USER_KEY_PREFIX}{user_id}"),
            format!("{CART_KEY_PREFIX}{user_id}"),
        )
    }

    fn encode(cart: &Cart) -> AppResult<serde_json::Value> {
        let record = CartRecord {
            record_type: "CART".to_string(),
            id: cart.id,
            user_id: cart.user_id.clone(),
            items: cart
                .items
                .iter()
                .map(|item| CartItemRecord {
                    item_id: item.item_id,
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    added_at: item.added_at,
                })
                .collect(),
            version: cart.version,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
            expires_at: cart.expires_at,
            ttl: cart.expires_at.timestamp(),
        };
        serde_json::to_value(&record).map_err(|e| AppError::persistence("encode_cart", e))
    }

    fn decode(value: serde_json::Value) -> AppResult<Cart> {
        let record: CartRecord =
            serde_json::from_value(value).map_err(|e| AppError::persistence("decode_cart", e))?;
        Ok(Cart {
            id: record.id,
            user_id: record.user_id,
            items: record
                .items
                .into_iter()
                .map(|item| CartItem {
                    item_id: item.item_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    added_at: item.added_at,
                })
                .collect(),
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        })
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn get_cart(&self, user_id: &str) -> AppResult<Cart> {
        let (pk, sk) = Self::keys(user_id);

        let row: Option<(serde_json::Value,)> = sqlx::query_as(&format!(
            "SELECT attributes FROM {} WHERE pk = $1 AND sk = $2",
            self.table
        ))
        .bind(&pk)
        .bind(&sk)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::persistence("get_cart", e))?;

        match row {
            Some((attributes,)) => Self::decode(attributes),
            None => Err(AppError::cart_not_found(user_id)),
        }
    }

    async fn save_cart(&self, cart: &Cart) -> AppResult<()> {
        let (pk, sk) = Self::keys(&cart.user_id);
        let attributes = Self::encode(cart)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {t} (pk, sk, attributes, version, ttl)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (pk, sk) DO UPDATE SET
                attributes = EXCLUDED.attributes,
                version = EXCLUDED.version,
                ttl = EXCLUDED.ttl
            "#,
            t = self.table
        ))
        .bind(&pk)
        .bind(&sk)
        .bind(&attributes)
        .bind(cart.version)
        .bind(cart.expires_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::persistence("save_cart", e))?;

        Ok(())
    }

    async fn save_cart_with_version(&self, cart: &Cart, expected_version: i64) -> AppResult<()> {
        let (pk, sk) = Self::keys(&cart.user_id);
        let attributes = Self::encode(cart)?;

        // The guarded upsert is the conditional put: the insert arm fires when
        // no row exists, the update arm only when the stored version matches.
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {t} (pk, sk, attributes, version, ttl)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (pk, sk) DO UPDATE SET
                attributes = EXCLUDED.attributes,
                version = EXCLUDED.version,
                ttl = EXCLUDED.ttl
            WHERE {t}.version = $6
            "#,
            t = self.table
        ))
        .bind(&pk)
        .bind(&sk)
        .bind(&attributes)
        .bind(cart.version)
        .bind(cart.expires_at.timestamp())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::persistence("save_cart_with_version", e))?;

        if result.rows_affected() == 0 {
            // Condition failed: fetch the stored version for the conflict
            // report. If the follow-up read also fails, report 0 as sentinel.
            let current_version = match self.get_cart(&cart.user_id).await {
                Ok(current) => current.version,
                Err(_) => 0,
            };
            return Err(AppError::conflict(expected_version, current_version));
        }

        Ok(())
    }

    async fn delete_cart(&self, user_id: &str) -> AppResult<()> {
        let (pk, sk) = Self::keys(user_id);

        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE pk = $1 AND sk = $2",
            self.table
        ))
        .bind(&pk)
        .bind(&sk)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::persistence("delete_cart", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::cart_not_found(user_id));
        }

        Ok(())
    }

    async fn list_expired_carts(&self, limit: i64) -> AppResult<Vec<Cart>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&format!(
            "SELECT attributes FROM {} WHERE ttl < $1 ORDER BY ttl LIMIT $2",
            self.table
        ))
        .bind(Utc::now().timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::persistence("list_expired_carts", e))?;

        rows.into_iter()
            .map(|(attributes,)| Self::decode(attributes))
            .collect()
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::persistence("health_check", e))?;
        Ok(())
    }
}
