//! Storno service layer - submission, review queue, and decision execution
//!
//! The decision path owns the only irreversible step in the pipeline (the
//! gateway refund), so its write ordering is fixed: refund first, then the
//! request's own status via a conditional update, then the idempotent order
//! and score writes. A conditional update on the current status is the
//! mutual-exclusion mechanism between concurrent decisions; the gateway
//! idempotency key (the request id) closes the window between the
//! precondition read and that write.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::eligibility;
use crate::error::ApiError;
use crate::gateway::{PaymentGateway, RefundMetadata, RefundRequest};
use crate::orders::OrderService;
use crate::outbox::{OutboxService, StornoEvent};
use crate::provider::ProviderScoreService;
use crate::storno::{
    approval_rate, CreateStornoRequest, DecisionAction, DecisionRequest, DecisionResponse,
    ListStornoQuery, ListStornoResponse, ReconciliationReport, RefundSummary, StornoRequest,
    StornoStats, StornoStatus,
};

/// Raw per-status counts from the database
#[derive(Debug, sqlx::FromRow)]
struct StatusCounts {
    pending: Option<i64>,
    under_review: Option<i64>,
    approved: Option<i64>,
    rejected: Option<i64>,
}

/// Storno service for the request lifecycle
pub struct StornoService {
    db_pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    providers: Arc<ProviderScoreService>,
    outbox: OutboxService,
}

impl StornoService {
    pub fn new(
        db_pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        providers: Arc<ProviderScoreService>,
        outbox: OutboxService,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            orders,
            providers,
            outbox,
        }
    }

    // ===== Submission =====

    /// Submit a cancellation request for an order.
    ///
    /// Eligibility is recomputed server-side from the stored order; a
    /// client-claimed entitlement is never trusted. The order snapshot is
    /// captured at this instant so the later refund computation is insulated
    /// from concurrent order edits.
    pub async fn submit(
        &self,
        actor_id: Uuid,
        is_admin: bool,
        request: CreateStornoRequest,
    ) -> Result<StornoRequest, ApiError> {
        request.validate()?;
        if request.reason.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "reason must not be empty".to_string(),
            ));
        }

        let order = self
            .orders
            .get_order(request.order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", request.order_id)))?;

        if !is_admin && order.customer_id != actor_id {
            return Err(ApiError::Forbidden(
                "Only the ordering customer may request cancellation".to_string(),
            ));
        }

        let now = Utc::now();
        let result = eligibility::evaluate(&order, now);

        let Some(storno_type) = result.storno_type.filter(|_| result.can_cancel) else {
            return Err(ApiError::ValidationError(format!(
                "Order in status '{}' is not eligible for cancellation",
                order.status.as_str()
            )));
        };

        // Best-effort uniqueness check; the partial unique index on open
        // requests backstops the race.
        let open_count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM storno_requests
            WHERE order_id = $1 AND status IN ('pending', 'under_review')
            "#,
        )
        .bind(request.order_id)
        .fetch_one(&self.db_pool)
        .await?;

        if open_count.0 > 0 {
            return Err(ApiError::Conflict(format!(
                "An open cancellation request already exists for order {}",
                request.order_id
            )));
        }

        let storno = sqlx::query_as::<_, StornoRequest>(
            r#"
            INSERT INTO storno_requests (
                id, order_id, customer_id, provider_id,
                order_amount, payment_reference,
                delivery_window_start, delivery_window_end,
                reason, storno_type, status, score_applied,
                requested_at, last_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, $12, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(order.customer_id)
        .bind(order.provider_id)
        .bind(order.total_amount)
        .bind(&order.payment_reference)
        .bind(order.delivery_window_start)
        .bind(order.delivery_window_end)
        .bind(request.reason.trim())
        .bind(storno_type)
        .bind(StornoStatus::Pending)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| {
            // The partial unique index fires when two submissions race.
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return ApiError::Conflict(format!(
                        "An open cancellation request already exists for order {}",
                        request.order_id
                    ));
                }
            }
            ApiError::from(e)
        })?;

        tracing::info!(
            request_id = %storno.id,
            order_id = %storno.order_id,
            storno_type = ?storno.storno_type,
            "Storno request submitted"
        );

        Ok(storno)
    }

    // ===== Review queue =====

    /// Get a single request by ID
    pub async fn get_request(&self, id: Uuid) -> Result<StornoRequest, ApiError> {
        sqlx::query_as::<_, StornoRequest>("SELECT * FROM storno_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Storno request {} not found", id)))
    }

    /// List requests for the admin review queue, newest first, with the
    /// aggregate statistics.
    pub async fn list_requests(
        &self,
        query: ListStornoQuery,
    ) -> Result<ListStornoResponse, ApiError> {
        let status = query.status.unwrap_or(StornoStatus::Pending);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);

        let items = sqlx::query_as::<_, StornoRequest>(
            r#"
            SELECT * FROM storno_requests
            WHERE status = $1
            ORDER BY requested_at DESC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;

        let stats = self.stats().await?;

        Ok(ListStornoResponse { items, stats })
    }

    /// Aggregate counts per status and the approval rate over resolved
    /// requests.
    pub async fn stats(&self) -> Result<StornoStats, ApiError> {
        let counts = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'under_review') as under_review,
                COUNT(*) FILTER (WHERE status = 'approved') as approved,
                COUNT(*) FILTER (WHERE status = 'rejected') as rejected
            FROM storno_requests
            "#,
        )
        .fetch_one(&self.db_pool)
        .await?;

        let pending = counts.pending.unwrap_or(0);
        let under_review = counts.under_review.unwrap_or(0);
        let approved = counts.approved.unwrap_or(0);
        let rejected = counts.rejected.unwrap_or(0);

        Ok(StornoStats {
            pending,
            under_review,
            approved,
            rejected,
            total: pending + under_review + approved + rejected,
            approval_rate: approval_rate(approved, rejected),
        })
    }

    // ===== Review & decision =====

    /// Move a pending request into review. Conditional on the current
    /// status, so a resolved request cannot be reopened.
    pub async fn open_for_review(
        &self,
        id: Uuid,
        admin_id: Uuid,
    ) -> Result<StornoRequest, ApiError> {
        let now = Utc::now();

        let updated = sqlx::query_as::<_, StornoRequest>(
            r#"
            UPDATE storno_requests
            SET status = $2, reviewed_by = $3, last_updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(StornoStatus::UnderReview)
        .bind(admin_id)
        .bind(now)
        .fetch_optional(&self.db_pool)
        .await?;

        match updated {
            Some(request) => Ok(request),
            None => {
                let current = self.get_request(id).await?;
                Err(ApiError::Conflict(format!(
                    "Storno request {} is '{}', not 'pending'",
                    id,
                    current.status.as_str()
                )))
            }
        }
    }

    /// Execute an admin decision on an open request.
    pub async fn decide(
        &self,
        id: Uuid,
        admin_id: Uuid,
        decision: DecisionRequest,
    ) -> Result<DecisionResponse, ApiError> {
        let request = self.get_request(id).await?;

        if !request.status.is_open() {
            return Err(ApiError::Conflict(format!(
                "Storno request {} was already processed (status '{}')",
                id,
                request.status.as_str()
            )));
        }

        let reviewer = decision.admin_id.unwrap_or(admin_id);

        match decision.action {
            DecisionAction::Approve => self.approve(request, reviewer, decision).await,
            DecisionAction::Reject => self.reject(request, reviewer, decision).await,
        }
    }

    async fn approve(
        &self,
        request: StornoRequest,
        reviewer: Uuid,
        decision: DecisionRequest,
    ) -> Result<DecisionResponse, ApiError> {
        let payment_reference = request.payment_reference.clone().ok_or_else(|| {
            ApiError::ValidationError(format!(
                "Order snapshot for request {} has no payment reference to refund against",
                request.id
            ))
        })?;

        let refund_amount = match decision.refund_amount {
            Some(amount) if amount <= 0 => {
                return Err(ApiError::ValidationError(
                    "refund_amount must be positive".to_string(),
                ));
            }
            Some(amount) if amount > request.order_amount => {
                return Err(ApiError::ValidationError(format!(
                    "refund_amount {} exceeds the order amount {}",
                    amount, request.order_amount
                )));
            }
            Some(amount) => amount,
            None => request.order_amount,
        };

        // Irreversible step first. On failure or timeout the request keeps
        // its pre-approval state and the error is surfaced for manual retry;
        // the idempotency key makes that retry safe.
        let outcome = self
            .gateway
            .refund(RefundRequest {
                transaction_reference: payment_reference,
                amount: refund_amount,
                idempotency_key: request.id.to_string(),
                metadata: RefundMetadata {
                    request_id: request.id,
                    order_id: request.order_id,
                },
            })
            .await?;

        let now = Utc::now();

        // Conditional transition: a concurrent decision that resolved the
        // request in the meantime leaves zero rows here.
        let updated = sqlx::query_as::<_, StornoRequest>(
            r#"
            UPDATE storno_requests
            SET status = $2,
                refund_amount = $3,
                refund_reference = $4,
                refund_reason = $5,
                reviewed_by = $6,
                reviewed_at = $7,
                admin_notes = $8,
                completed_at = $7,
                last_updated_at = $7
            WHERE id = $1 AND status IN ('pending', 'under_review')
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(StornoStatus::Approved)
        .bind(refund_amount)
        .bind(&outcome.refund_id)
        .bind(&decision.refund_reason)
        .bind(reviewer)
        .bind(now)
        .bind(&decision.admin_notes)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(updated) = updated else {
            return Err(ApiError::Conflict(format!(
                "Storno request {} was resolved concurrently",
                request.id
            )));
        };

        // The refund cannot be undone, so failures past this point are
        // logged and left to the reconciliation pass instead of rolled back.
        if let Err(e) = self.orders.mark_cancelled_by_admin(updated.order_id).await {
            tracing::error!(
                error = %e,
                order_id = %updated.order_id,
                "Order status sync failed after refund; reconciliation required"
            );
        }

        if let Err(e) = self
            .providers
            .record_approved_storno(updated.provider_id, updated.id)
            .await
        {
            tracing::error!(
                error = %e,
                provider_id = %updated.provider_id,
                request_id = %updated.id,
                "Provider score update failed after refund; reconciliation required"
            );
        }

        self.outbox
            .publish(StornoEvent::CancellationApproved {
                request_id: updated.id,
                order_id: updated.order_id,
                customer_id: updated.customer_id,
                provider_id: updated.provider_id,
                refund_amount,
                refund_reference: outcome.refund_id.clone(),
            })
            .await;

        tracing::info!(
            request_id = %updated.id,
            refund_amount,
            refund_reference = %outcome.refund_id,
            "Storno request approved and refunded"
        );

        Ok(DecisionResponse {
            request: updated,
            refund: Some(RefundSummary {
                refund_amount,
                refund_reference: outcome.refund_id,
            }),
        })
    }

    async fn reject(
        &self,
        request: StornoRequest,
        reviewer: Uuid,
        decision: DecisionRequest,
    ) -> Result<DecisionResponse, ApiError> {
        let rejection_reason = decision
            .rejection_reason
            .or_else(|| decision.admin_notes.clone())
            .unwrap_or_else(|| "Rejected by admin".to_string());

        let now = Utc::now();

        // Rejection touches nothing but the request row: no refund, no order
        // status change, no score update.
        let updated = sqlx::query_as::<_, StornoRequest>(
            r#"
            UPDATE storno_requests
            SET status = $2,
                rejection_reason = $3,
                reviewed_by = $4,
                reviewed_at = $5,
                admin_notes = $6,
                completed_at = $5,
                last_updated_at = $5
            WHERE id = $1 AND status IN ('pending', 'under_review')
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(StornoStatus::Rejected)
        .bind(&rejection_reason)
        .bind(reviewer)
        .bind(now)
        .bind(&decision.admin_notes)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(updated) = updated else {
            return Err(ApiError::Conflict(format!(
                "Storno request {} was resolved concurrently",
                request.id
            )));
        };

        self.outbox
            .publish(StornoEvent::CancellationRejected {
                request_id: updated.id,
                order_id: updated.order_id,
                customer_id: updated.customer_id,
                rejection_reason,
            })
            .await;

        tracing::info!(request_id = %updated.id, "Storno request rejected");

        Ok(DecisionResponse {
            request: updated,
            refund: None,
        })
    }

    // ===== Reconciliation =====

    /// Repair the gap left by a crash between refund success and the
    /// follow-up writes.
    ///
    /// Two passes, both idempotent: requests holding a refund reference but
    /// still open are completed as approved (the refund exists, so the
    /// decision stands), and approved requests whose score update never
    /// landed are re-run.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, ApiError> {
        let mut report = ReconciliationReport::default();
        let now = Utc::now();

        let stuck = sqlx::query_as::<_, StornoRequest>(
            r#"
            SELECT * FROM storno_requests
            WHERE refund_reference IS NOT NULL
              AND status IN ('pending', 'under_review')
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        for request in stuck {
            let recovered = sqlx::query_as::<_, StornoRequest>(
                r#"
                UPDATE storno_requests
                SET status = $2, completed_at = $3, last_updated_at = $3
                WHERE id = $1 AND status IN ('pending', 'under_review')
                RETURNING *
                "#,
            )
            .bind(request.id)
            .bind(StornoStatus::Approved)
            .bind(now)
            .fetch_optional(&self.db_pool)
            .await?;

            if let Some(recovered) = recovered {
                tracing::warn!(
                    request_id = %recovered.id,
                    refund_reference = ?recovered.refund_reference,
                    "Recovered storno request with refund but open status"
                );
                report.recovered_approvals.push(recovered.id);
            }
        }

        let unapplied = sqlx::query_as::<_, StornoRequest>(
            r#"
            SELECT * FROM storno_requests
            WHERE status = 'approved' AND score_applied = false
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        for request in unapplied {
            if let Err(e) = self.orders.mark_cancelled_by_admin(request.order_id).await {
                tracing::error!(
                    error = %e,
                    order_id = %request.order_id,
                    "Order status sync failed during reconciliation"
                );
                continue;
            }

            match self
                .providers
                .record_approved_storno(request.provider_id, request.id)
                .await
            {
                Ok(Some(_)) => report.reapplied_scores.push(request.id),
                Ok(None) => {} // already counted
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        request_id = %request.id,
                        "Score update failed during reconciliation"
                    );
                }
            }
        }

        tracing::info!(
            recovered = report.recovered_approvals.len(),
            reapplied = report.reapplied_scores.len(),
            "Reconciliation pass completed"
        );

        Ok(report)
    }
}
