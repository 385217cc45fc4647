//! Order read/sync service
//!
//! Orders belong to the marketplace; this pipeline reads them for snapshots
//! and eligibility, and writes only the terminal cancellation fields once a
//! storno request resolves.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Order, OrderStatus};

/// Order service over the shared pool
pub struct OrderService {
    db_pool: PgPool,
}

impl OrderService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Get a single order by ID
    pub async fn get_order(&self, id: Uuid) -> Result<Option<Order>, ApiError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(order)
    }

    /// Write the terminal cancellation status after an approved storno.
    ///
    /// Idempotent: the guard on the current status makes a repeated write a
    /// no-op rather than an error.
    pub async fn mark_cancelled_by_admin(&self, order_id: Uuid) -> Result<(), ApiError> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, storno_completed_at = $3, last_updated_at = $3
            WHERE id = $1 AND status <> $2
            "#,
        )
        .bind(order_id)
        .bind(OrderStatus::CancelledByAdmin)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(order_id = %order_id, "Order already in terminal cancellation state");
        } else {
            tracing::info!(order_id = %order_id, "Order marked cancelled_by_admin");
        }

        Ok(())
    }
}
