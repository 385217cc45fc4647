//! Order-facing route definitions

use axum::{routing::get, Router};

use crate::handlers::get_storno_eligibility;
use crate::state::AppState;

pub fn order_routes() -> Router<AppState> {
    Router::new().route(
        "/api/orders/:id/storno-eligibility",
        get(get_storno_eligibility),
    )
}
