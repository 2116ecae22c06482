//! Persistent log of orders that exhausted their retries.
//!
//! Every [`FailureReport`] the orchestrator emits lands here so operators can
//! investigate it and mark it resolved once handled.

use crate::error::map_sqlx_error;
use chrono::{DateTime, Utc};
use order_intake_core::{FailureReport, IdempotencyKey, OrderId, StoreError, UserId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// An entry of the failure log.
#[derive(Debug, Clone)]
pub struct FailureEntry {
    /// Log entry id
    pub id: i64,
    /// The report as emitted
    pub report: FailureReport,
    /// When an operator resolved the failure
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL` table of failed orders.
///
/// ```no_run
/// use order_intake_postgres::FailureLog;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let log = FailureLog::new(pool);
/// for entry in log.list_unresolved(100).await? {
///     println!("{} failed after {} attempts", entry.report.order_id, entry.report.attempts);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FailureLog {
    pool: PgPool,
}

impl FailureLog {
    /// Create a failure log over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a report. Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns the mapped database error if the insert fails.
    pub async fn record(&self, report: &FailureReport) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO order_failures (
                order_id, idempotency_key, user_id, attempts, last_error, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(report.order_id.as_uuid())
        .bind(report.idempotency_key.as_str())
        .bind(report.user_id.as_str())
        .bind(i32::try_from(report.attempts).unwrap_or(i32::MAX))
        .bind(&report.last_error)
        .bind(report.at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::warn!(
            failure_id = id,
            order_id = %report.order_id,
            attempts = report.attempts,
            "Order failure logged"
        );
        metrics::counter!("order_failures_logged_total").increment(1);
        Ok(id)
    }

    /// Oldest unresolved failures first.
    ///
    /// # Errors
    ///
    /// Returns the mapped database error if the query fails.
    pub async fn list_unresolved(&self, limit: i64) -> Result<Vec<FailureEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, idempotency_key, user_id, attempts, last_error,
                   failed_at, resolved_at, resolution_notes
            FROM order_failures
            WHERE resolved_at IS NULL
            ORDER BY failed_at ASC, id ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let attempts: i32 = row.try_get("attempts").map_err(map_sqlx_error)?;
                Ok(FailureEntry {
                    id: row.try_get("id").map_err(map_sqlx_error)?,
                    report: FailureReport {
                        order_id: OrderId::from_uuid(
                            row.try_get::<Uuid, _>("order_id").map_err(map_sqlx_error)?,
                        ),
                        idempotency_key: IdempotencyKey::new(
                            row.try_get::<String, _>("idempotency_key").map_err(map_sqlx_error)?,
                        ),
                        user_id: UserId::new(
                            row.try_get::<String, _>("user_id").map_err(map_sqlx_error)?,
                        ),
                        attempts: u32::try_from(attempts).unwrap_or(0),
                        last_error: row.try_get("last_error").map_err(map_sqlx_error)?,
                        at: row.try_get("failed_at").map_err(map_sqlx_error)?,
                    },
                    resolved_at: row.try_get("resolved_at").map_err(map_sqlx_error)?,
                    resolution_notes: row.try_get("resolution_notes").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no unresolved entry has this id.
    pub async fn resolve(&self, id: i64, notes: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE order_failures SET resolved_at = now(), resolution_notes = $2 \
             WHERE id = $1 AND resolved_at IS NULL",
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::info!(failure_id = id, "Order failure resolved");
        Ok(())
    }
}
