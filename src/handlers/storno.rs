//! Storno request API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::{AdminUser, AuthenticatedUser};
use crate::storno::{
    CreateStornoRequest, CreateStornoResponse, DecisionRequest, DecisionResponse,
    ListStornoQuery, ListStornoResponse, ReconciliationReport, StornoRequest, StornoService,
};

/// POST /api/storno-requests - Submit a cancellation request
pub async fn submit_storno_request(
    State(storno_service): State<Arc<StornoService>>,
    user: AuthenticatedUser,
    Json(request): Json<CreateStornoRequest>,
) -> ApiResult<(StatusCode, Json<CreateStornoResponse>)> {
    let created = storno_service
        .submit(user.actor_id, user.is_admin(), request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateStornoResponse {
            id: created.id,
            status: created.status,
        }),
    ))
}

/// GET /api/storno-requests - Admin review queue with aggregate stats
pub async fn list_storno_requests(
    State(storno_service): State<Arc<StornoService>>,
    _admin: AdminUser,
    Query(query): Query<ListStornoQuery>,
) -> ApiResult<Json<ListStornoResponse>> {
    let response = storno_service.list_requests(query).await?;
    Ok(Json(response))
}

/// GET /api/storno-requests/:id - Full request detail for admins
pub async fn get_storno_request(
    State(storno_service): State<Arc<StornoService>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StornoRequest>> {
    let request = storno_service.get_request(id).await?;
    Ok(Json(request))
}

/// POST /api/storno-requests/:id/review - Open a pending request for review
pub async fn open_storno_request_for_review(
    State(storno_service): State<Arc<StornoService>>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StornoRequest>> {
    let request = storno_service.open_for_review(id, admin.admin_id).await?;
    Ok(Json(request))
}

/// POST /api/storno-requests/:id/decision - Approve or reject an open request
pub async fn decide_storno_request(
    State(storno_service): State<Arc<StornoService>>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(decision): Json<DecisionRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    let response = storno_service.decide(id, admin.admin_id, decision).await?;
    Ok(Json(response))
}

/// POST /api/storno-requests/reconcile - Idempotent reconciliation pass
pub async fn reconcile_storno_requests(
    State(storno_service): State<Arc<StornoService>>,
    _admin: AdminUser,
) -> ApiResult<Json<ReconciliationReport>> {
    let report = storno_service.reconcile().await?;
    Ok(Json(report))
}
