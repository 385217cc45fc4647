//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::db::Database;
use crate::middleware::AuthVerifier;
use crate::orders::OrderService;
use crate::provider::ProviderScoreService;
use crate::storno::StornoService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storno_service: Arc<StornoService>,
    pub order_service: Arc<OrderService>,
    pub provider_service: Arc<ProviderScoreService>,
    pub auth: AuthVerifier,
    pub db: Database,
}

impl AppState {
    pub fn new(
        storno_service: Arc<StornoService>,
        order_service: Arc<OrderService>,
        provider_service: Arc<ProviderScoreService>,
        auth: AuthVerifier,
        db: Database,
    ) -> Self {
        Self {
            storno_service,
            order_service,
            provider_service,
            auth,
            db,
        }
    }
}

impl FromRef<AppState> for Arc<StornoService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.storno_service.clone()
    }
}

impl FromRef<AppState> for Arc<OrderService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.order_service.clone()
    }
}

impl FromRef<AppState> for Arc<ProviderScoreService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.provider_service.clone()
    }
}

impl FromRef<AppState> for AuthVerifier {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.db.clone()
    }
}
