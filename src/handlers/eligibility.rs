//! Customer-facing eligibility handler

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::eligibility::{self, EligibilityResult};
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::orders::OrderService;

/// GET /api/orders/:id/storno-eligibility - Read-only eligibility check
pub async fn get_storno_eligibility(
    State(order_service): State<Arc<OrderService>>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<EligibilityResult>> {
    let order = order_service
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_id)))?;

    if !user.is_admin() && order.customer_id != user.actor_id {
        return Err(ApiError::Forbidden(
            "Only the ordering customer may check eligibility".to_string(),
        ));
    }

    Ok(Json(eligibility::evaluate(&order, Utc::now())))
}
