//! Database module
//!
//! Schema bootstrap and connectivity checks for the single-table store and
//! the event outbox.

use sqlx::PgPool;

/// Simple connectivity check.
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Create the cart table and event outbox if they do not exist.
///
/// The cart table is a pure key-value row store: composite primary key, a
/// JSONB attribute document, and the `version`/`ttl` guard columns. No other
/// code depends on this shape.
pub async fn init_schema(pool: &PgPool, carts_table: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {carts_table} (
            pk          TEXT NOT NULL,
            sk          TEXT NOT NULL,
            attributes  JSONB NOT NULL,
            version     BIGINT NOT NULL,
            ttl         BIGINT NOT NULL,
            PRIMARY KEY (pk, sk)
        )
        "#
    ))
    .execute(pool)
    .await?;

    // The reaper scans by ttl
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{carts_table}_ttl ON {carts_table} (ttl)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_outbox (
            id          UUID PRIMARY KEY,
            bus         TEXT NOT NULL,
            source      TEXT NOT NULL,
            event_type  TEXT NOT NULL,
            payload     JSONB NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check that the required tables exist.
pub async fn check_schema(pool: &PgPool, carts_table: &str) -> Result<bool, sqlx::Error> {
    for table in [carts_table, "event_outbox"] {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
