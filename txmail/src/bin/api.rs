//! txmail API Server - transaction submission endpoint.
//!
//! This binary:
//! - Serves `GET /` (health) and `POST /transactions`
//! - Validates each transaction
//! - Either sends the notification directly or enqueues it for the worker,
//!   depending on `NOTIFICATION_MODE`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use txmail::email::build_sender;
use txmail::web::{router, serve, AppState};
use txmail::{shutdown, telemetry};
use txmail::{Config, DirectDispatch, NotificationMode, NotificationStrategy, Publisher, QueuedDispatch};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    info!("api_server_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        notification_mode = ?config.notification_mode,
        email_backend = ?config.email_backend,
        broker_url_length = config.broker_url.len(),
        "config_loaded"
    );

    // Exactly one strategy per deployment
    let mut publisher = None;
    let strategy: Arc<dyn NotificationStrategy> = match config.notification_mode {
        NotificationMode::Queued => {
            let p = Publisher::new(config.broker_url.clone(), config.retry_policy());
            info!("rabbitmq_publisher_created");
            publisher = Some(p.clone());
            Arc::new(QueuedDispatch::new(config.sender_email.clone(), Arc::new(p)))
        }
        NotificationMode::Direct => {
            let mailer = build_sender(&config).await;
            Arc::new(DirectDispatch::new(config.sender_email.clone(), mailer))
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let drain_timeout = config.shutdown_timeout;
    let app = router(AppState::new(config, strategy));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "api_server_listening");

    let token = shutdown::install();
    serve(listener, app, token, drain_timeout).await?;

    if let Some(publisher) = publisher {
        publisher.close().await;
    }

    info!("api_server_shutdown_complete");

    Ok(())
}
