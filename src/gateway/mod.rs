//! Payment gateway client
//!
//! The refund operation is the only genuinely irreversible step in the
//! pipeline, so the client is an explicitly constructed, injected dependency
//! behind a trait. Every call carries an idempotency key (the storno request
//! id) so operator retries cannot double-refund.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;

/// Gateway call failures. A timeout is an unknown outcome: the request state
/// must not change and the caller may safely retry with the same idempotency
/// key.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request timed out (outcome unknown, safe to retry)")]
    Timeout,

    #[error("Refund declined by gateway: {0}")]
    Declined(String),

    #[error("Gateway returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Gateway transport error: {0}")]
    Transport(String),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::GatewayError(err.to_string())
    }
}

/// Refund instruction sent to the gateway
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub transaction_reference: String,
    pub amount: i64,
    pub idempotency_key: String,
    pub metadata: RefundMetadata,
}

/// Idempotency metadata attached to every refund call
#[derive(Debug, Clone, Serialize)]
pub struct RefundMetadata {
    pub request_id: Uuid,
    pub order_id: Uuid,
}

/// Gateway response to a refund call
#[derive(Debug, Clone, Deserialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub status: RefundStatus,
}

/// Refund processing state reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Succeeded,
    Pending,
    Failed,
}

/// Abstract payment gateway. Production uses the HTTP implementation below;
/// tests inject a fake.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Execute a partial refund against a payment transaction reference.
    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError>;
}

/// HTTP payment gateway client
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Build a client with the configured bounded timeout.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.gateway_api_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let url = format!("{}/v1/refunds", self.base_url);

        tracing::info!(
            transaction_reference = %request.transaction_reference,
            amount = request.amount,
            idempotency_key = %request.idempotency_key,
            "Submitting refund to payment gateway"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let outcome: RefundOutcome = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if outcome.status == RefundStatus::Failed {
            return Err(GatewayError::Declined(format!(
                "refund {} reported failed",
                outcome.refund_id
            )));
        }

        tracing::info!(
            refund_id = %outcome.refund_id,
            status = ?outcome.status,
            "Gateway accepted refund"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_maps_to_bad_gateway() {
        let api_err: ApiError = GatewayError::Timeout.into();
        assert_eq!(api_err.error_code(), "GATEWAY_ERROR");
    }

    #[test]
    fn test_refund_status_serde() {
        let outcome: RefundOutcome =
            serde_json::from_str(r#"{"refund_id":"re_42","status":"succeeded"}"#).unwrap();
        assert_eq!(outcome.refund_id, "re_42");
        assert_eq!(outcome.status, RefundStatus::Succeeded);
    }

    #[test]
    fn test_refund_request_serializes_metadata() {
        let request = RefundRequest {
            transaction_reference: "pay_1".to_string(),
            amount: 1_500,
            idempotency_key: "sr_1".to_string(),
            metadata: RefundMetadata {
                request_id: Uuid::nil(),
                order_id: Uuid::nil(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["amount"], 1_500);
        assert!(json["metadata"]["request_id"].is_string());
    }
}
