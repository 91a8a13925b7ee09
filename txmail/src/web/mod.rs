//! Web server module for the transaction API.
//!
//! Routes:
//! - `GET /`: health check
//! - `POST /transactions`: validate and notify
//!
//! [`serve`] runs the router until the shutdown token fires, then stops
//! accepting connections and gives in-flight requests `drain_timeout` to
//! finish. Requests still running after that are answered with 503.

pub mod handlers;

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::transaction::TransactionResponse;

pub use handlers::{create_transaction, health, AppState, HealthResponse};

/// Time after the drain deadline for cut-off responses to be written.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/transactions", post(create_transaction))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Clone)]
struct DrainDeadline {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl DrainDeadline {
    async fn passed(&self) {
        self.token.cancelled().await;
        tokio::time::sleep(self.drain_timeout).await;
    }
}

async fn cut_off_after_drain(
    State(deadline): State<DrainDeadline>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    tokio::select! {
        response = next.run(request) => response,
        _ = deadline.passed() => {
            warn!(path = %path, "api_request_cut_off");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(TransactionResponse::error("Server is shutting down")),
            )
                .into_response()
        }
    }
}

/// Serve `app` on `listener` until `token` is cancelled, then drain.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    token: CancellationToken,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = DrainDeadline {
        token: token.clone(),
        drain_timeout,
    };
    let app = app.layer(from_fn_with_state(deadline.clone(), cut_off_after_drain));

    let stop = token.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop.cancelled().await;
            info!("api_server_shutting_down");
        })
        .into_future();

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = async {
            deadline.passed().await;
            tokio::time::sleep(CLOSE_GRACE).await;
        } => {
            warn!(timeout_secs = drain_timeout.as_secs(), "api_server_drain_timeout");
        }
    }

    Ok(())
}
