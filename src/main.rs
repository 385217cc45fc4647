//! Taskilo Storno Pipeline Server
//!
//! HTTP server for the order cancellation ("Storno") and provider-reliability
//! pipeline: customer eligibility checks, request submission, the admin
//! review workflow, refund execution against the payment gateway, and the
//! provider reputation score.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use taskilo_storno::config::Config;
use taskilo_storno::db::{self, Database};
use taskilo_storno::gateway::{HttpPaymentGateway, PaymentGateway};
use taskilo_storno::middleware::{self, AuthVerifier, RateLimiter};
use taskilo_storno::orders::OrderService;
use taskilo_storno::outbox::OutboxService;
use taskilo_storno::provider::ProviderScoreService;
use taskilo_storno::routes;
use taskilo_storno::state::AppState;
use taskilo_storno::storno::StornoService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting storno pipeline server"
    );

    // Database pool and migrations
    let db_pool = db::create_pool(&config)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;

    // Explicitly constructed, injected gateway client
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(&config).context("Failed to build payment gateway client")?,
    );

    // Services
    let order_service = Arc::new(OrderService::new(db_pool.clone()));
    let provider_service = Arc::new(ProviderScoreService::new(db_pool.clone()));
    let outbox = OutboxService::new(db_pool.clone());
    let storno_service = Arc::new(StornoService::new(
        db_pool.clone(),
        gateway,
        order_service.clone(),
        provider_service.clone(),
        outbox,
    ));

    let app_state = AppState::new(
        storno_service,
        order_service,
        provider_service,
        AuthVerifier::new(&config.jwt_secret),
        Database::new(db_pool),
    );

    let rate_limiter = RateLimiter::new(config.rate_limit_rps);

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(routes::storno_routes())
        .merge(routes::order_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(axum::middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            middleware::rate_limit_layer(limiter)(req, next)
        }))
        .layer(configure_cors(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(
    axum::extract::State(db): axum::extract::State<Database>,
) -> Json<HealthResponse> {
    let healthy = db.is_healthy().await;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: if healthy { "connected" } else { "error" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(config: &taskilo_storno::config::Config) -> CorsLayer {
    let allowed_origins = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
