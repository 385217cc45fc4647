//! Provider score updater
//!
//! Recomputes the composite reliability score after an approved cancellation
//! and enforces the automatic suspension floor. The storno rate counter is
//! shared across every approval for the provider, so the update is a single
//! atomic read-modify-write in SQL, never a blind overwrite of a value read
//! earlier in the request.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::provider::ProviderScore;

// ============================================================================
// Scoring weights and thresholds
// ============================================================================

/// Weight of the storno-rate sub-score in the overall score
pub const WEIGHT_STORNO_RATE: f64 = 0.40;

/// Weight of the delivery-delay sub-metric
pub const WEIGHT_DELIVERY_DELAYS: f64 = 0.30;

/// Weight of the customer-satisfaction sub-metric
pub const WEIGHT_CUSTOMER_SATISFACTION: f64 = 0.20;

/// Weight of the response-time sub-metric
pub const WEIGHT_RESPONSE_TIME: f64 = 0.10;

/// Providers at or below this overall score are suspended automatically.
pub const AUTO_BLOCK_THRESHOLD: f64 = 10.0;

// ============================================================================
// Pure scoring functions (mirrored by the SQL update below)
// ============================================================================

/// Share of a provider's orders that ended in an approved cancellation, as a
/// percentage. Zero when the provider has no orders yet.
pub fn storno_rate(approved_stornos: i64, total_orders: i64) -> f64 {
    if total_orders > 0 {
        approved_stornos as f64 / total_orders as f64 * 100.0
    } else {
        0.0
    }
}

/// Sub-score derived from the storno rate: a higher cancellation rate lowers
/// the score, floored at zero.
pub fn storno_rate_score(rate: f64) -> f64 {
    (100.0 - rate).max(0.0)
}

/// Weighted composite over the four sub-metrics, in [0, 100].
pub fn composite_score(
    rate_score: f64,
    delivery_delays: f64,
    customer_satisfaction: f64,
    response_time: f64,
) -> f64 {
    rate_score * WEIGHT_STORNO_RATE
        + delivery_delays * WEIGHT_DELIVERY_DELAYS
        + customer_satisfaction * WEIGHT_CUSTOMER_SATISFACTION
        + response_time * WEIGHT_RESPONSE_TIME
}

// ============================================================================
// Service
// ============================================================================

/// Provider score service over the shared pool
pub struct ProviderScoreService {
    db_pool: PgPool,
}

impl ProviderScoreService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Get the current score for a provider
    pub async fn get_score(&self, provider_id: Uuid) -> Result<Option<ProviderScore>, ApiError> {
        let score = sqlx::query_as::<_, ProviderScore>(
            "SELECT * FROM provider_scores WHERE provider_id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(score)
    }

    /// Record one approved cancellation against the provider and recompute
    /// the composite score.
    ///
    /// The request's `score_applied` flag is flipped in the same transaction
    /// as the counter increment, so re-running this for the same request
    /// (operator retry, reconciliation) is a no-op. Returns `None` when the
    /// update was already applied.
    pub async fn record_approved_storno(
        &self,
        provider_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<ProviderScore>, ApiError> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await?;

        // Claim the per-request guard first; zero rows means another run
        // already counted this approval.
        let claimed = sqlx::query(
            r#"
            UPDATE storno_requests
            SET score_applied = true, last_updated_at = $2
            WHERE id = $1 AND score_applied = false
            "#,
        )
        .bind(request_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(
                request_id = %request_id,
                "Score update already applied for request"
            );
            return Ok(None);
        }

        // Atomic increment and recompute: the derived columns are computed
        // from the post-increment counter inside the statement, so two
        // concurrent approvals for the same provider cannot lose an update.
        let score = sqlx::query_as::<_, ProviderScore>(
            r#"
            UPDATE provider_scores
            SET approved_stornos = approved_stornos + 1,
                storno_rate = CASE WHEN total_orders > 0
                    THEN (approved_stornos + 1)::double precision / total_orders * 100
                    ELSE 0 END,
                overall_score =
                    GREATEST(0, 100 - CASE WHEN total_orders > 0
                        THEN (approved_stornos + 1)::double precision / total_orders * 100
                        ELSE 0 END) * $2
                    + delivery_delays * $3
                    + customer_satisfaction * $4
                    + response_time * $5,
                last_updated = $6
            WHERE provider_id = $1
            RETURNING *
            "#,
        )
        .bind(provider_id)
        .bind(WEIGHT_STORNO_RATE)
        .bind(WEIGHT_DELIVERY_DELAYS)
        .bind(WEIGHT_CUSTOMER_SATISFACTION)
        .bind(WEIGHT_RESPONSE_TIME)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut score) = score else {
            tx.rollback().await?;
            return Err(ApiError::NotFound(format!(
                "No score record for provider {}",
                provider_id
            )));
        };

        if score.overall_score <= AUTO_BLOCK_THRESHOLD && !score.blocked {
            let reason = format!(
                "Automatic suspension: overall score {:.1} fell to or below {}",
                score.overall_score, AUTO_BLOCK_THRESHOLD
            );

            sqlx::query(
                r#"
                UPDATE provider_scores
                SET blocked = true, blocked_reason = $2, blocked_at = $3
                WHERE provider_id = $1 AND blocked = false
                "#,
            )
            .bind(provider_id)
            .bind(&reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            score.blocked = true;
            score.blocked_reason = Some(reason);
            score.blocked_at = Some(now);

            tracing::warn!(
                provider_id = %provider_id,
                overall_score = score.overall_score,
                "Provider auto-blocked after approved cancellation"
            );
        }

        tx.commit().await?;

        tracing::info!(
            provider_id = %provider_id,
            approved_stornos = score.approved_stornos,
            storno_rate = score.storno_rate,
            overall_score = score.overall_score,
            "Provider score updated"
        );

        Ok(Some(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let sum = WEIGHT_STORNO_RATE
            + WEIGHT_DELIVERY_DELAYS
            + WEIGHT_CUSTOMER_SATISFACTION
            + WEIGHT_RESPONSE_TIME;
        assert!((sum - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_storno_rate() {
        assert_eq!(storno_rate(3, 10), 30.0);
        assert_eq!(storno_rate(0, 10), 0.0);
        assert_eq!(storno_rate(0, 0), 0.0);
        assert_eq!(storno_rate(5, 0), 0.0);
    }

    #[test]
    fn test_storno_rate_score_floors_at_zero() {
        assert_eq!(storno_rate_score(30.0), 70.0);
        assert_eq!(storno_rate_score(100.0), 0.0);
        assert_eq!(storno_rate_score(150.0), 0.0);
    }

    #[test]
    fn test_composite_score_worked_example() {
        // 10 orders, third approved storno: rate 30, rate score 70
        let rate = storno_rate(3, 10);
        assert_eq!(rate, 30.0);
        let rate_score = storno_rate_score(rate);
        assert_eq!(rate_score, 70.0);

        let overall = composite_score(rate_score, 90.0, 80.0, 70.0);
        assert!((overall - 78.0).abs() < 1e-9);
        assert!(overall > AUTO_BLOCK_THRESHOLD);
    }

    #[test]
    fn test_composite_score_auto_block_example() {
        let rate_score = storno_rate_score(95.0);
        assert_eq!(rate_score, 5.0);

        let overall = composite_score(rate_score, 0.0, 0.0, 0.0);
        assert!((overall - 2.0).abs() < 1e-9);
        assert!(overall <= AUTO_BLOCK_THRESHOLD);
    }
}
