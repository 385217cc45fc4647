//! Provider reliability score models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Composite reliability score per provider, embedded in the provider's
/// profile record. `overall_score` is always derived from the weighted
/// sub-metrics and never written directly.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ProviderScore {
    pub provider_id: Uuid,
    pub total_orders: i64,
    pub approved_stornos: i64,
    pub storno_rate: f64,
    pub delivery_delays: f64,
    pub customer_satisfaction: f64,
    pub response_time: f64,
    pub overall_score: f64,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}
