//! txmail Worker - RabbitMQ consumer that sends transaction notification emails.
//!
//! This worker consumes `email:notification` tasks from the weighted queue
//! set, renders the email and sends it through the configured provider.
//! Failed sends wait in the broker's retry queue and come back after the
//! retry delay; malformed tasks are dead-lettered immediately.

mod consumer;

use anyhow::{Context, Result};
use tracing::info;

use txmail::email::build_sender;
use txmail::{shutdown, telemetry, Config};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    info!("worker_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        broker_url_length = config.broker_url.len(),
        email_backend = ?config.email_backend,
        concurrency = config.worker_concurrency,
        queues = ?config.queue_priorities,
        max_retries = config.task_max_retry,
        retry_delay_secs = config.task_retry_delay.as_secs(),
        "config_loaded"
    );

    let sender = build_sender(&config).await;
    let token = shutdown::install();

    consumer::run(config, sender, token).await?;

    Ok(())
}
