//! RabbitMQ consumer pool using lapin.
//!
//! One channel and consumer per configured queue, each with a prefetch
//! proportional to the queue's weight, merged into a single delivery
//! stream. A semaphore caps the number of handlers running at once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{stream, stream::BoxStream, Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use txmail::config::{QueueWeight, DEFAULT_QUEUE};
use txmail::queue::topology::{self, retry_count};
use txmail::queue::{process_task, TaskError, DEAD_LETTER_EXCHANGE};
use txmail::{Config, EmailSender};

/// A consumed queue and the channel its deliveries arrive on.
struct Source {
    queue: String,
    channel: Channel,
}

/// What to tell the broker about a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    /// Park in the retry queue until the retry delay expires.
    Retry,
    DeadLetter,
}

fn settlement(result: &Result<(), TaskError>, retries: u32, max_retries: u32) -> Settlement {
    match result {
        Ok(()) => Settlement::Ack,
        Err(e) if e.is_retryable() && retries < max_retries => Settlement::Retry,
        Err(_) => Settlement::DeadLetter,
    }
}

/// Split the worker's concurrency across queues by weight. Every queue gets
/// at least one prefetch slot so low-weight queues are never starved.
fn prefetch_allocation(queues: &[QueueWeight], concurrency: usize) -> Vec<u16> {
    let total = queues
        .iter()
        .map(|q| u64::from(q.weight))
        .sum::<u64>()
        .max(1);

    queues
        .iter()
        .map(|q| {
            let share = (concurrency as u64).saturating_mul(u64::from(q.weight)) / total;
            u16::try_from(share.max(1)).unwrap_or(u16::MAX)
        })
        .collect()
}

/// Tag every item with `key` and yield `(key, None)` once the stream ends,
/// so a merged stream can tell which member closed.
fn with_close_marker<K, S>(key: K, inner: S) -> BoxStream<'static, (K, Option<S::Item>)>
where
    K: Clone + Send + 'static,
    S: Stream + Send + 'static,
    S::Item: Send,
{
    inner
        .map(Some)
        .chain(stream::once(async { None }))
        .map(move |item| (key.clone(), item))
        .boxed()
}

/// Close the tracker and wait up to `timeout` for tracked handlers.
/// Returns `false` if some were still running.
async fn drain(tracker: &TaskTracker, timeout: Duration) -> bool {
    tracker.close();
    info!(in_flight = tracker.len(), "worker_draining");

    if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
        warn!(
            in_flight = tracker.len(),
            timeout_secs = timeout.as_secs(),
            "worker_drain_timeout"
        );
        return false;
    }
    true
}

/// Run the consumer pool until `token` is cancelled.
///
/// This function:
/// 1. Connects to RabbitMQ and declares the topology
/// 2. Starts one weighted consumer per queue
/// 3. Spawns a tracked handler per delivery, bounded by the semaphore
/// 4. On shutdown, cancels consumers and drains in-flight handlers
///
/// Any single consumer closing ends the pool with an error.
pub async fn run(config: Config, sender: Arc<dyn EmailSender>, token: CancellationToken) -> Result<()> {
    info!(url_length = config.broker_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.broker_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let queue_names: Vec<&str> = config
        .queue_priorities
        .iter()
        .map(|q| q.name.as_str())
        .collect();

    if !queue_names.contains(&DEFAULT_QUEUE) {
        warn!(queue = DEFAULT_QUEUE, "worker_not_consuming_default_queue");
    }

    let retry = config.retry_policy();
    let setup = conn
        .create_channel()
        .await
        .context("Failed to create channel")?;
    topology::declare(&setup, &queue_names, &retry).await?;

    let prefetch = prefetch_allocation(&config.queue_priorities, config.worker_concurrency);
    let mut consumers = Vec::with_capacity(queue_names.len());
    let mut streams = Vec::with_capacity(queue_names.len());

    for (queue, prefetch_count) in config.queue_priorities.iter().zip(prefetch) {
        let channel = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .context("Failed to set QoS")?;

        // Dead-letter copies are published on this channel.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        let consumer_tag = format!("txmail-worker-{}", queue.name);
        let consumer = channel
            .basic_consume(
                &queue.name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to start consumer on {}", queue.name))?;

        info!(
            queue = %queue.name,
            weight = queue.weight,
            prefetch_count = prefetch_count,
            "rabbitmq_consumer_started"
        );

        let source = Arc::new(Source {
            queue: queue.name.clone(),
            channel: channel.clone(),
        });
        streams.push(with_close_marker(source, consumer));
        consumers.push((channel, consumer_tag));
    }

    let mut deliveries = stream::select_all(streams);
    let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
    let tracker = TaskTracker::new();

    info!(
        concurrency = config.worker_concurrency,
        max_retries = retry.max_retries,
        retry_delay_secs = retry.delay.as_secs(),
        "worker_ready"
    );

    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("worker_stopping");
                break Ok(());
            }
            next = deliveries.next() => {
                match next {
                    Some((source, Some(Ok(delivery)))) => {
                        let permit = tokio::select! {
                            permit = Arc::clone(&semaphore).acquire_owned() => {
                                permit.context("Worker semaphore closed")?
                            }
                            _ = token.cancelled() => {
                                // Unacked; the broker redelivers it.
                                info!("worker_stopping");
                                break Ok(());
                            }
                        };

                        let sender = Arc::clone(&sender);
                        let max_retries = retry.max_retries;
                        tracker.spawn(async move {
                            let _permit = permit;
                            handle_delivery(&source, delivery, sender.as_ref(), max_retries).await;
                        });
                    }
                    Some((source, Some(Err(e)))) => {
                        error!(queue = %source.queue, error = %e, "rabbitmq_delivery_error");
                    }
                    Some((source, None)) => {
                        error!(queue = %source.queue, "rabbitmq_consumer_closed");
                        break Err(anyhow!("consumer for {} closed", source.queue));
                    }
                    None => {
                        warn!("rabbitmq_consumers_closed");
                        break Err(anyhow!("All RabbitMQ consumers closed"));
                    }
                }
            }
        }
    };

    for (channel, consumer_tag) in &consumers {
        if let Err(e) = channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(consumer_tag = %consumer_tag, error = %e, "rabbitmq_cancel_failed");
        }
    }
    drop(deliveries);

    drain(&tracker, config.shutdown_timeout).await;

    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }

    info!("worker_shutdown_complete");
    outcome
}

/// Copy a delivery to the dead-letter exchange and wait for the confirm.
async fn publish_dead_letter(source: &Source, delivery: &Delivery) -> Result<()> {
    let confirmation = source
        .channel
        .basic_publish(
            DEAD_LETTER_EXCHANGE,
            &source.queue,
            BasicPublishOptions::default(),
            &delivery.data,
            delivery.properties.clone(),
        )
        .await?
        .await?;

    if confirmation.is_nack() {
        bail!("dead-letter publish nacked");
    }
    Ok(())
}

/// Process one delivery and settle it with the broker.
async fn handle_delivery(source: &Source, delivery: Delivery, sender: &dyn EmailSender, max_retries: u32) {
    let queue = source.queue.as_str();
    let task_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let kind = delivery.properties.kind().as_ref().map(|k| k.as_str());
    let retries = retry_count(delivery.properties.headers().as_ref(), queue);

    info!(
        queue = queue,
        task_id = %task_id,
        task_type = kind.unwrap_or("none"),
        retries = retries,
        redelivered = delivery.redelivered,
        "task_claimed"
    );

    let result = process_task(kind, &delivery.data, sender).await;

    let settled = match settlement(&result, retries, max_retries) {
        Settlement::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        Settlement::Retry => {
            if let Err(e) = &result {
                warn!(queue = queue, task_id = %task_id, retries = retries, error = %e, "task_failed_retryable");
            }
            // The queue's dead-letter exchange is the retry exchange.
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
        }
        Settlement::DeadLetter => {
            if let Err(e) = &result {
                error!(
                    queue = queue,
                    task_id = %task_id,
                    retries = retries,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &delivery.data[..delivery.data.len().min(500)]
                    ),
                    "task_failed_permanent"
                );
            }
            match publish_dead_letter(source, &delivery).await {
                Ok(()) => delivery.acker.ack(BasicAckOptions::default()).await,
                Err(e) => {
                    // Goes round the retry queue and is dead-lettered next time.
                    warn!(task_id = %task_id, error = %e, "rabbitmq_dead_letter_publish_failed");
                    delivery
                        .acker
                        .reject(BasicRejectOptions { requeue: false })
                        .await
                }
            }
        }
    };

    match settled {
        Err(e) => error!(task_id = %task_id, error = %e, "rabbitmq_settle_failed"),
        Ok(()) if result.is_ok() => info!(queue = queue, task_id = %task_id, "task_completed"),
        Ok(()) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txmail::SendError;

    fn weights(pairs: &[(&str, u32)]) -> Vec<QueueWeight> {
        pairs
            .iter()
            .map(|(name, weight)| QueueWeight {
                name: name.to_string(),
                weight: *weight,
            })
            .collect()
    }

    #[test]
    fn test_prefetch_follows_weights() {
        let queues = weights(&[("critical", 6), ("default", 3), ("low", 1)]);
        assert_eq!(prefetch_allocation(&queues, 10), vec![6, 3, 1]);
        assert_eq!(prefetch_allocation(&queues, 100), vec![60, 30, 10]);
    }

    #[test]
    fn test_prefetch_never_zero() {
        let queues = weights(&[("critical", 1000), ("default", 100), ("low", 50)]);
        assert_eq!(prefetch_allocation(&queues, 10), vec![8, 1, 1]);
        assert_eq!(prefetch_allocation(&queues, 1), vec![1, 1, 1]);
    }

    #[test]
    fn test_prefetch_single_queue_takes_all() {
        let queues = weights(&[("default", 1)]);
        assert_eq!(prefetch_allocation(&queues, 25), vec![25]);
    }

    #[test]
    fn test_prefetch_saturates_at_u16() {
        let queues = weights(&[("default", 1)]);
        assert_eq!(prefetch_allocation(&queues, 1_000_000), vec![u16::MAX]);

        let queues = weights(&[("default", u32::MAX)]);
        assert_eq!(prefetch_allocation(&queues, usize::MAX), vec![u16::MAX]);
    }

    #[test]
    fn test_settlement_success_acks() {
        assert_eq!(settlement(&Ok(()), 0, 25), Settlement::Ack);
        assert_eq!(settlement(&Ok(()), 25, 25), Settlement::Ack);
    }

    #[test]
    fn test_settlement_send_failure_retries_until_exhausted() {
        let failed = Err(TaskError::Send(SendError::Provider("throttled".to_string())));

        assert_eq!(settlement(&failed, 0, 25), Settlement::Retry);
        assert_eq!(settlement(&failed, 24, 25), Settlement::Retry);
        assert_eq!(settlement(&failed, 25, 25), Settlement::DeadLetter);
        assert_eq!(settlement(&failed, 0, 0), Settlement::DeadLetter);
    }

    #[test]
    fn test_settlement_permanent_failure_dead_letters() {
        assert_eq!(
            settlement(&Err(TaskError::UnknownType(None)), 0, 25),
            Settlement::DeadLetter
        );

        let malformed = serde_json::from_slice::<serde_json::Value>(b"{oops").unwrap_err();
        assert_eq!(
            settlement(&Err(TaskError::Decode(malformed)), 0, 25),
            Settlement::DeadLetter
        );
    }

    #[tokio::test]
    async fn test_one_closed_consumer_is_reported() {
        let mut merged = stream::select_all(vec![
            with_close_marker("critical", stream::pending::<u32>().boxed()),
            with_close_marker("default", stream::iter(vec![1u32, 2])),
        ]);

        assert_eq!(merged.next().await, Some(("default", Some(1))));
        assert_eq!(merged.next().await, Some(("default", Some(2))));
        assert_eq!(merged.next().await, Some(("default", None)));
    }

    #[tokio::test]
    async fn test_drain_waits_for_handlers() {
        let tracker = TaskTracker::new();
        tracker.spawn(tokio::time::sleep(Duration::from_millis(20)));

        assert!(drain(&tracker, Duration::from_secs(5)).await);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let tracker = TaskTracker::new();
        tracker.spawn(std::future::pending::<()>());

        assert!(!drain(&tracker, Duration::from_millis(20)).await);
        assert_eq!(tracker.len(), 1);
    }
}
