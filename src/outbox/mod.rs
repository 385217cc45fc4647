//! Outbound notification events
//!
//! Decision outcomes are handed to the notification collaborator through an
//! append-only outbox table instead of an inline call, so a notification
//! failure can never affect the financial transition that produced it. The
//! collaborator drains rows and stamps `dispatched_at`.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Events emitted when a storno request resolves
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StornoEvent {
    CancellationApproved {
        request_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
        refund_amount: i64,
        refund_reference: String,
    },
    CancellationRejected {
        request_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
        rejection_reason: String,
    },
}

impl StornoEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StornoEvent::CancellationApproved { .. } => "cancellation.approved",
            StornoEvent::CancellationRejected { .. } => "cancellation.rejected",
        }
    }

    fn request_id(&self) -> Uuid {
        match self {
            StornoEvent::CancellationApproved { request_id, .. } => *request_id,
            StornoEvent::CancellationRejected { request_id, .. } => *request_id,
        }
    }

    fn order_id(&self) -> Uuid {
        match self {
            StornoEvent::CancellationApproved { order_id, .. } => *order_id,
            StornoEvent::CancellationRejected { order_id, .. } => *order_id,
        }
    }
}

/// Outbox writer over the shared pool
#[derive(Clone)]
pub struct OutboxService {
    db_pool: PgPool,
}

impl OutboxService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Append an event to the outbox. Best effort: failures are logged and
    /// swallowed, never propagated to the caller.
    pub async fn publish(&self, event: StornoEvent) {
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize outbox event");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO storno_outbox (id, event_type, request_id, order_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.event_type())
        .bind(event.request_id())
        .bind(event.order_id())
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    event_type = event.event_type(),
                    request_id = %event.request_id(),
                    "Outbox event enqueued"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = event.event_type(),
                    request_id = %event.request_id(),
                    "Failed to enqueue outbox event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let approved = StornoEvent::CancellationApproved {
            request_id: Uuid::nil(),
            order_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            provider_id: Uuid::nil(),
            refund_amount: 100,
            refund_reference: "re_1".to_string(),
        };
        assert_eq!(approved.event_type(), "cancellation.approved");

        let rejected = StornoEvent::CancellationRejected {
            request_id: Uuid::nil(),
            order_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            rejection_reason: "out of policy".to_string(),
        };
        assert_eq!(rejected.event_type(), "cancellation.rejected");
    }

    #[test]
    fn test_event_payload_shape() {
        let event = StornoEvent::CancellationApproved {
            request_id: Uuid::nil(),
            order_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            provider_id: Uuid::nil(),
            refund_amount: 4_500,
            refund_reference: "re_9".to_string(),
        };

        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["type"], "cancellation_approved");
        assert_eq!(payload["refund_amount"], 4_500);
    }
}
