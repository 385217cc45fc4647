//! Storno request models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Storno request model. Created once at submission, resolved at most once
/// by an admin decision, read thereafter for audit. Never deleted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StornoRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,

    // Order snapshot captured at submission time, so refund computation is
    // insulated from concurrent order edits.
    pub order_amount: i64, // Minor currency units (cents)
    pub payment_reference: Option<String>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,

    pub reason: String,
    pub storno_type: StornoType,
    pub status: StornoStatus,

    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,

    pub refund_amount: Option<i64>,
    pub refund_reference: Option<String>,
    pub refund_reason: Option<String>,

    pub rejection_reason: Option<String>,
    pub score_applied: bool,

    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

/// Storno request state machine
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "storno_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StornoStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl StornoStatus {
    /// Open states are the only legal starting points for a decision.
    pub fn is_open(&self) -> bool {
        matches!(self, StornoStatus::Pending | StornoStatus::UnderReview)
    }

    /// Terminal states are immutable except for audit reads.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StornoStatus::Pending => "pending",
            StornoStatus::UnderReview => "under_review",
            StornoStatus::Approved => "approved",
            StornoStatus::Rejected => "rejected",
        }
    }
}

/// Cancellation entitlement class; drives the fee policy.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "storno_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StornoType {
    /// Voluntary cancellation; a processing fee applies.
    Normal,
    /// Lieferverzug: the provider missed the delivery deadline, granting an
    /// unconditional right with a full refund.
    Overdue,
}

/// Request DTO for submitting a storno request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateStornoRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "reason must not be empty"))]
    pub reason: String,
}

/// Response DTO for submission
#[derive(Debug, Serialize)]
pub struct CreateStornoResponse {
    pub id: Uuid,
    pub status: StornoStatus,
}

/// Admin decision on an open request
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub action: DecisionAction,
    pub admin_id: Option<Uuid>,
    pub admin_notes: Option<String>,
    pub refund_amount: Option<i64>,
    pub refund_reason: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

/// Refund outcome reported back to the deciding admin
#[derive(Debug, Serialize)]
pub struct RefundSummary {
    pub refund_amount: i64,
    pub refund_reference: String,
}

/// Response DTO for a decision
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub request: StornoRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundSummary>,
}

/// Query parameters for the admin review queue
#[derive(Debug, Default, Deserialize)]
pub struct ListStornoQuery {
    pub status: Option<StornoStatus>,
    pub limit: Option<i64>,
}

/// Aggregate counts over the review queue
#[derive(Debug, Serialize, PartialEq)]
pub struct StornoStats {
    pub pending: i64,
    pub under_review: i64,
    pub approved: i64,
    pub rejected: i64,
    pub total: i64,
    pub approval_rate: f64,
}

/// Approval rate over resolved requests, as a percentage. Zero when nothing
/// has been resolved yet.
pub fn approval_rate(approved: i64, rejected: i64) -> f64 {
    let resolved = approved + rejected;
    if resolved == 0 {
        0.0
    } else {
        approved as f64 / resolved as f64 * 100.0
    }
}

/// List response combining the filtered page and the aggregate stats
#[derive(Debug, Serialize)]
pub struct ListStornoResponse {
    pub items: Vec<StornoRequest>,
    pub stats: StornoStats,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Serialize)]
pub struct ReconciliationReport {
    /// Requests with a recorded refund that were still open and have now
    /// been completed as approved
    pub recovered_approvals: Vec<Uuid>,
    /// Approved requests whose provider score update was re-run
    pub reapplied_scores: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_terminal_states() {
        assert!(StornoStatus::Pending.is_open());
        assert!(StornoStatus::UnderReview.is_open());
        assert!(!StornoStatus::Approved.is_open());
        assert!(!StornoStatus::Rejected.is_open());

        assert!(StornoStatus::Approved.is_terminal());
        assert!(StornoStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_approval_rate_zero_denominator() {
        assert_eq!(approval_rate(0, 0), 0.0);
    }

    #[test]
    fn test_approval_rate() {
        assert_eq!(approval_rate(3, 1), 75.0);
        assert_eq!(approval_rate(0, 5), 0.0);
        assert_eq!(approval_rate(5, 0), 100.0);
    }

    #[test]
    fn test_create_request_validation() {
        let valid = CreateStornoRequest {
            order_id: Uuid::new_v4(),
            reason: "Provider never showed up".to_string(),
        };
        assert!(valid.validate().is_ok());

        let invalid = CreateStornoRequest {
            order_id: Uuid::new_v4(),
            reason: String::new(),
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_status_serde_labels() {
        assert_eq!(
            serde_json::to_string(&StornoStatus::UnderReview).unwrap(),
            r#""under_review""#
        );
        assert_eq!(
            serde_json::to_string(&StornoType::Overdue).unwrap(),
            r#""overdue""#
        );
    }

    #[test]
    fn test_decision_action_deserializes() {
        let action: DecisionAction = serde_json::from_str(r#""approve""#).unwrap();
        assert_eq!(action, DecisionAction::Approve);
        let action: DecisionAction = serde_json::from_str(r#""reject""#).unwrap();
        assert_eq!(action, DecisionAction::Reject);
    }
}
