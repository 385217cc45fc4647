//! Shared data models for the storno pipeline

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Order model. Orders are owned by the marketplace; this pipeline reads a
/// snapshot at submission time and writes only the terminal cancellation
/// fields on resolution.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub total_amount: i64, // Minor currency units (cents)
    pub payment_reference: Option<String>,
    pub status: OrderStatus,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub storno_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Order lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    PaymentCleared,
    Active,
    Accepted,
    ProviderCompleted,
    Completed,
    CancelledByAdmin,
    CancelledByCustomer,
}

impl OrderStatus {
    /// Statuses from which a customer may request a voluntary (non-overdue)
    /// cancellation.
    pub fn allows_voluntary_storno(&self) -> bool {
        matches!(
            self,
            OrderStatus::PaymentCleared
                | OrderStatus::Active
                | OrderStatus::Accepted
                | OrderStatus::ProviderCompleted
        )
    }

    /// Terminal cancellation states
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            OrderStatus::CancelledByAdmin | OrderStatus::CancelledByCustomer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::PaymentCleared => "payment_cleared",
            OrderStatus::Active => "active",
            OrderStatus::Accepted => "accepted",
            OrderStatus::ProviderCompleted => "provider_completed",
            OrderStatus::Completed => "completed",
            OrderStatus::CancelledByAdmin => "cancelled_by_admin",
            OrderStatus::CancelledByCustomer => "cancelled_by_customer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voluntary_storno_statuses() {
        assert!(OrderStatus::Active.allows_voluntary_storno());
        assert!(OrderStatus::PaymentCleared.allows_voluntary_storno());
        assert!(OrderStatus::Accepted.allows_voluntary_storno());
        assert!(OrderStatus::ProviderCompleted.allows_voluntary_storno());

        assert!(!OrderStatus::PendingPayment.allows_voluntary_storno());
        assert!(!OrderStatus::Completed.allows_voluntary_storno());
        assert!(!OrderStatus::CancelledByAdmin.allows_voluntary_storno());
    }

    #[test]
    fn test_cancelled_statuses() {
        assert!(OrderStatus::CancelledByAdmin.is_cancelled());
        assert!(OrderStatus::CancelledByCustomer.is_cancelled());
        assert!(!OrderStatus::Active.is_cancelled());
    }
}
