//! [`OrderStore`] backed by `PostgreSQL`.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_intake_core::{
    IdempotencyKey, LineItem, Order, OrderId, OrderStatus, OrderStore, StoreError, UserId,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

const ORDER_COLUMNS: &str =
    "id, idempotency_key, user_id, items, status, created_at, updated_at";

/// `PostgreSQL`-backed order store.
///
/// - `create` is a plain `INSERT`; the unique index on `idempotency_key`
///   turns a second insert for the same key into [`StoreError::Duplicate`]
/// - `update_status` is a conditional `UPDATE ... WHERE status = $expected`
/// - `list_by_user` orders by `created_at`, then by insertion sequence
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Connect with a database URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    /// Connect with explicit connection options.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect_with(
        options: PgConnectOptions,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let Json(items): Json<Vec<LineItem>> = row.try_get("items").map_err(map_sqlx_error)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx_error)?),
        idempotency_key: IdempotencyKey::new(
            row.try_get::<String, _>("idempotency_key").map_err(map_sqlx_error)?,
        ),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(map_sqlx_error)?),
        items,
        status: status
            .parse()
            .map_err(|e: order_intake_core::order::UnknownStatus| StoreError::Corrupt(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
    })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO orders (id, idempotency_key, user_id, items, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.idempotency_key.as_str())
        .bind(order.user_id.as_str())
        .bind(Json(&order.items))
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match result.map_err(map_sqlx_error) {
            Ok(_) => {
                tracing::debug!(order_id = %order.id, status = %order.status, "Order inserted");
                Ok(())
            }
            Err(StoreError::Duplicate(_)) => {
                Err(StoreError::Duplicate(order.idempotency_key.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let updated = sqlx::query(&format!(
            "UPDATE orders SET status = $3, updated_at = $4 \
             WHERE id = $1 AND status = $2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = updated {
            return order_from_row(&row);
        }

        // Lost the compare-and-swap, or the order does not exist.
        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match actual {
            None => Err(StoreError::NotFound),
            Some(actual) => Err(StoreError::StatusMismatch {
                expected,
                actual: actual.parse().map_err(
                    |e: order_intake_core::order::UnknownStatus| StoreError::Corrupt(e.to_string()),
                )?,
            }),
        }
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
