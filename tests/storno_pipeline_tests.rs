//! End-to-end consistency tests for the storno decision pipeline
//!
//! The gateway is replaced by an in-memory fake that honors idempotency keys
//! and counts actual refund executions, so the exactly-once contract is
//! observable. Tests that need a PostgreSQL instance are `#[ignore]`d and
//! run against TEST_DATABASE_URL.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use taskilo_storno::error::ApiError;
use taskilo_storno::gateway::{
    GatewayError, PaymentGateway, RefundOutcome, RefundRequest, RefundStatus,
};
use taskilo_storno::models::OrderStatus;
use taskilo_storno::orders::OrderService;
use taskilo_storno::outbox::OutboxService;
use taskilo_storno::provider::ProviderScoreService;
use taskilo_storno::storno::{
    CreateStornoRequest, DecisionAction, DecisionRequest, ListStornoQuery, StornoService,
    StornoStatus, StornoType,
};

// ============================================================================
// Fake gateway
// ============================================================================

/// In-memory gateway. A repeated idempotency key returns the recorded
/// outcome without executing a second refund, mirroring the dedup contract
/// of the real gateway.
struct FakeGateway {
    executed: AtomicUsize,
    by_key: Mutex<HashMap<String, RefundOutcome>>,
    fail_next: AtomicUsize,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            executed: AtomicUsize::new(0),
            by_key: Mutex::new(HashMap::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    fn executed_refunds(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn fail_next_call(&self) {
        self.fail_next.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, GatewayError> {
        if self.fail_next.swap(0, Ordering::SeqCst) == 1 {
            return Err(GatewayError::Timeout);
        }

        let mut by_key = self.by_key.lock().unwrap();
        if let Some(existing) = by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        self.executed.fetch_add(1, Ordering::SeqCst);
        let outcome = RefundOutcome {
            refund_id: format!("re_{}", Uuid::new_v4().simple()),
            status: RefundStatus::Succeeded,
        };
        by_key.insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }
}

// ============================================================================
// Test fixtures
// ============================================================================

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/taskilo_storno_test".to_string());

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

struct TestHarness {
    pool: PgPool,
    gateway: Arc<FakeGateway>,
    storno: StornoService,
    providers: Arc<ProviderScoreService>,
}

fn build_harness(pool: PgPool) -> TestHarness {
    let gateway = Arc::new(FakeGateway::new());
    let orders = Arc::new(OrderService::new(pool.clone()));
    let providers = Arc::new(ProviderScoreService::new(pool.clone()));
    let outbox = OutboxService::new(pool.clone());
    let storno = StornoService::new(
        pool.clone(),
        gateway.clone() as Arc<dyn PaymentGateway>,
        orders,
        providers.clone(),
        outbox,
    );

    TestHarness {
        pool,
        gateway,
        storno,
        providers,
    }
}

/// Insert an order in the given status with a delivery window ending
/// `window_end_offset_days` from now, and a matching provider score row.
async fn seed_order(
    pool: &PgPool,
    status: OrderStatus,
    window_end_offset_days: i64,
) -> (Uuid, Uuid, Uuid) {
    let order_id = Uuid::new_v4();
    let customer_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO orders (
            id, customer_id, provider_id, total_amount, payment_reference,
            status, delivery_window_start, delivery_window_end,
            created_at, last_updated_at
        )
        VALUES ($1, $2, $3, 50000, $4, $5, $6, $7, $8, $8)
        "#,
    )
    .bind(order_id)
    .bind(customer_id)
    .bind(provider_id)
    .bind(format!("pay_{}", order_id.simple()))
    .bind(status)
    .bind(now + Duration::days(window_end_offset_days) - Duration::days(2))
    .bind(now + Duration::days(window_end_offset_days))
    .bind(now)
    .execute(pool)
    .await
    .expect("Failed to seed order");

    sqlx::query(
        r#"
        INSERT INTO provider_scores (
            provider_id, total_orders, approved_stornos, storno_rate,
            delivery_delays, customer_satisfaction, response_time,
            overall_score, blocked, last_updated
        )
        VALUES ($1, 10, 2, 20, 90, 80, 70, 85, false, $2)
        "#,
    )
    .bind(provider_id)
    .bind(now)
    .execute(pool)
    .await
    .expect("Failed to seed provider score");

    (order_id, customer_id, provider_id)
}

fn approve_decision() -> DecisionRequest {
    DecisionRequest {
        action: DecisionAction::Approve,
        admin_id: None,
        admin_notes: Some("verified with customer".to_string()),
        refund_amount: None,
        refund_reason: None,
        rejection_reason: None,
    }
}

fn reject_decision() -> DecisionRequest {
    DecisionRequest {
        action: DecisionAction::Reject,
        admin_id: None,
        admin_notes: None,
        refund_amount: None,
        refund_reason: None,
        rejection_reason: Some("service was already delivered".to_string()),
    }
}

// ============================================================================
// Submission tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires database setup
async fn test_submit_creates_pending_request() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;

    let created = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Changed my mind".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    assert_eq!(created.status, StornoStatus::Pending);
    assert_eq!(created.storno_type, StornoType::Normal);
    assert_eq!(created.order_amount, 50_000);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_submit_overdue_order_grants_unconditional_right() {
    let harness = build_harness(setup_test_db().await);
    // Window ended ten days ago
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, -10).await;

    let created = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Provider missed the deadline".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    assert_eq!(created.storno_type, StornoType::Overdue);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_duplicate_open_request_conflicts() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;

    harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "First request".to_string(),
            },
        )
        .await
        .expect("First submission should succeed");

    let second = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Second request".to_string(),
            },
        )
        .await;

    assert!(matches!(second, Err(ApiError::Conflict(_))));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_resubmission_allowed_after_rejection() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let first = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "First request".to_string(),
            },
        )
        .await
        .expect("First submission should succeed");

    harness
        .storno
        .decide(first.id, admin_id, reject_decision())
        .await
        .expect("Rejection should succeed");

    let second = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Trying again".to_string(),
            },
        )
        .await;

    assert!(second.is_ok(), "Resubmission after rejection must succeed");
}

// ============================================================================
// Decision tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires database setup
async fn test_approval_refunds_exactly_once_sequentially() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let request = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "No longer needed".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    let first = harness
        .storno
        .decide(request.id, admin_id, approve_decision())
        .await
        .expect("First approval should succeed");

    assert!(first.refund.is_some());
    assert_eq!(harness.gateway.executed_refunds(), 1);

    let second = harness
        .storno
        .decide(request.id, admin_id, approve_decision())
        .await;

    assert!(matches!(second, Err(ApiError::Conflict(_))));
    assert_eq!(harness.gateway.executed_refunds(), 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_concurrent_approvals_yield_one_refund() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let request = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Race test".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    let (a, b) = futures_util::join!(
        harness.storno.decide(request.id, admin_id, approve_decision()),
        harness.storno.decide(request.id, admin_id, approve_decision()),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "Exactly one approval must win");
    assert!(
        matches!(a, Err(ApiError::Conflict(_))) || matches!(b, Err(ApiError::Conflict(_))),
        "The losing approval must observe a conflict"
    );
    // The idempotency key guarantees a single executed refund even when both
    // calls reach the gateway before the conditional status write.
    assert_eq!(harness.gateway.executed_refunds(), 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_gateway_failure_leaves_request_open() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, _) = seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let request = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Gateway failure test".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    harness.gateway.fail_next_call();

    let failed = harness
        .storno
        .decide(request.id, admin_id, approve_decision())
        .await;
    assert!(matches!(failed, Err(ApiError::GatewayError(_))));

    // The request stays open and a retry succeeds.
    let reloaded = harness.storno.get_request(request.id).await.unwrap();
    assert_eq!(reloaded.status, StornoStatus::Pending);

    let retried = harness
        .storno
        .decide(request.id, admin_id, approve_decision())
        .await;
    assert!(retried.is_ok());
    assert_eq!(harness.gateway.executed_refunds(), 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_approval_updates_provider_score() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, provider_id) =
        seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let request = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Score test".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    harness
        .storno
        .decide(request.id, admin_id, approve_decision())
        .await
        .expect("Approval should succeed");

    let score = harness
        .providers
        .get_score(provider_id)
        .await
        .unwrap()
        .expect("Provider score must exist");

    // Seeded with 10 orders and 2 approved stornos; one more approval makes
    // rate 30, rate score 70, overall 70*0.4 + 90*0.3 + 80*0.2 + 70*0.1 = 78.
    assert_eq!(score.approved_stornos, 3);
    assert!((score.storno_rate - 30.0).abs() < 1e-9);
    assert!((score.overall_score - 78.0).abs() < 1e-9);
    assert!(!score.blocked);

    // The order reached its terminal status.
    let (status,): (OrderStatus,) =
        sqlx::query_as("SELECT status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&harness.pool)
            .await
            .unwrap();
    assert_eq!(status, OrderStatus::CancelledByAdmin);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_rejection_touches_only_the_request() {
    let harness = build_harness(setup_test_db().await);
    let (order_id, customer_id, provider_id) =
        seed_order(&harness.pool, OrderStatus::Active, 30).await;
    let admin_id = Uuid::new_v4();

    let request = harness
        .storno
        .submit(
            customer_id,
            false,
            CreateStornoRequest {
                order_id,
                reason: "Rejection test".to_string(),
            },
        )
        .await
        .expect("Submission should succeed");

    let response = harness
        .storno
        .decide(request.id, admin_id, reject_decision())
        .await
        .expect("Rejection should succeed");

    assert_eq!(response.request.status, StornoStatus::Rejected);
    assert!(response.refund.is_none());
    assert!(response.request.rejection_reason.is_some());
    assert_eq!(harness.gateway.executed_refunds(), 0);

    // No order status change, no score movement.
    let (status,): (OrderStatus,) =
        sqlx::query_as("SELECT status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&harness.pool)
            .await
            .unwrap();
    assert_eq!(status, OrderStatus::Active);

    let score = harness
        .providers
        .get_score(provider_id)
        .await
        .unwrap()
        .expect("Provider score must exist");
    assert_eq!(score.approved_stornos, 2);
}

// ============================================================================
// Review queue tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires database setup
async fn test_list_defaults_to_pending_and_tolerates_empty() {
    let harness = build_harness(setup_test_db().await);

    let response = harness
        .storno
        .list_requests(ListStornoQuery::default())
        .await
        .expect("Listing should succeed on an empty queue");

    assert!(response.stats.approval_rate >= 0.0);
    assert!(!response.stats.approval_rate.is_nan());
    assert!(response.stats.total >= response.items.len() as i64);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_reconcile_is_idempotent() {
    let harness = build_harness(setup_test_db().await);

    let first = harness.storno.reconcile().await.expect("First pass");
    let second = harness.storno.reconcile().await.expect("Second pass");

    // A second pass over the same state finds nothing new to repair.
    assert!(second.recovered_approvals.len() <= first.recovered_approvals.len()
        || second.recovered_approvals.is_empty());
    assert!(second.reapplied_scores.is_empty());
}

// ============================================================================
// Pure fake-gateway behavior (no database required)
// ============================================================================

#[tokio::test]
async fn test_fake_gateway_honors_idempotency_keys() {
    let gateway = FakeGateway::new();

    let request = RefundRequest {
        transaction_reference: "pay_1".to_string(),
        amount: 5_000,
        idempotency_key: "sr_1".to_string(),
        metadata: taskilo_storno::gateway::RefundMetadata {
            request_id: Uuid::nil(),
            order_id: Uuid::nil(),
        },
    };

    let first = gateway.refund(request.clone()).await.unwrap();
    let second = gateway.refund(request).await.unwrap();

    assert_eq!(first.refund_id, second.refund_id);
    assert_eq!(gateway.executed_refunds(), 1);
}

#[tokio::test]
async fn test_fake_gateway_timeout_does_not_record_outcome() {
    let gateway = FakeGateway::new();
    gateway.fail_next_call();

    let request = RefundRequest {
        transaction_reference: "pay_2".to_string(),
        amount: 5_000,
        idempotency_key: "sr_2".to_string(),
        metadata: taskilo_storno::gateway::RefundMetadata {
            request_id: Uuid::nil(),
            order_id: Uuid::nil(),
        },
    };

    let failed = gateway.refund(request.clone()).await;
    assert!(matches!(failed, Err(GatewayError::Timeout)));
    assert_eq!(gateway.executed_refunds(), 0);

    // A retry with the same key executes exactly once.
    let retried = gateway.refund(request).await;
    assert!(retried.is_ok());
    assert_eq!(gateway.executed_refunds(), 1);
}
