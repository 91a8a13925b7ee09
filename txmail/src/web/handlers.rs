//! HTTP endpoint handlers.
//!
//! Handlers hold no mutable state: configuration and the notification
//! strategy are shared read-only through [`AppState`].

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::notify::NotificationStrategy;
use crate::transaction::{TransactionRequest, TransactionResponse};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub strategy: Arc<dyn NotificationStrategy>,
}

impl AppState {
    pub fn new(config: Config, strategy: Arc<dyn NotificationStrategy>) -> Self {
        Self {
            config: Arc::new(config),
            strategy,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub version: String,
}

/// `GET /`: static liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Amazon SES API Server is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Transactions
// =============================================================================

/// `POST /transactions`: validate, then notify through the active strategy.
///
/// - 400 on an unparseable body or a failed validation rule
/// - 500 when the email provider or broker fails (the transaction stands)
/// - 200 otherwise
pub async fn create_transaction(
    State(state): State<AppState>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "transaction_body_invalid");
            return (
                StatusCode::BAD_REQUEST,
                Json(TransactionResponse::error("Invalid request body")),
            );
        }
    };

    if let Err(rule) = request.validate() {
        warn!(email = %request.email, reason = %rule, "transaction_validation_failed");
        return (
            StatusCode::BAD_REQUEST,
            Json(TransactionResponse::error(rule.to_string())),
        );
    }

    info!(
        email = %request.email,
        amount = request.amount,
        strategy = state.strategy.name(),
        "transaction_received"
    );

    match state.strategy.notify(&request).await {
        Ok(outcome) => {
            info!(email = %request.email, outcome = ?outcome, "transaction_notified");
            (
                StatusCode::OK,
                Json(TransactionResponse::success(outcome.message())),
            )
        }
        Err(e) => {
            error!(
                email = %request.email,
                strategy = state.strategy.name(),
                error = %e,
                "transaction_notification_failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TransactionResponse::error(e.public_message())),
            )
        }
    }
}
