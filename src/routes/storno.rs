//! Storno route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    decide_storno_request, get_storno_request, list_storno_requests,
    open_storno_request_for_review, reconcile_storno_requests, submit_storno_request,
};
use crate::state::AppState;

pub fn storno_routes() -> Router<AppState> {
    Router::new()
        .route("/api/storno-requests", post(submit_storno_request))
        .route("/api/storno-requests", get(list_storno_requests))
        .route(
            "/api/storno-requests/reconcile",
            post(reconcile_storno_requests),
        )
        .route("/api/storno-requests/:id", get(get_storno_request))
        .route(
            "/api/storno-requests/:id/review",
            post(open_storno_request_for_review),
        )
        .route(
            "/api/storno-requests/:id/decision",
            post(decide_storno_request),
        )
}
