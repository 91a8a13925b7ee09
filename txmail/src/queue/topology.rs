//! Broker topology shared by the publisher and the worker.
//!
//! Retry and archive behaviour is configured here, on the broker, rather
//! than in our code:
//! - task queues are quorum queues whose dead-letter exchange is `txmail.retry`
//! - `txmail.retry` holds a failed task for the retry delay, then dead-letters
//!   it back through the default exchange to the queue it came from
//! - the broker records every such hop in the `x-death` header, which is
//!   where the worker reads the attempt count from
//! - `txmail.dead-letter` archives tasks that will never succeed

use std::time::Duration;

use anyhow::{Context, Result};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, ExchangeKind,
};
use tracing::info;

use super::types::{DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, RETRY_EXCHANGE, RETRY_QUEUE};

/// How often and how slowly failed tasks are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

fn saturating_long(value: u128) -> AMQPValue {
    AMQPValue::LongInt(i32::try_from(value).unwrap_or(i32::MAX))
}

/// Declaration arguments for a task queue.
///
/// The delivery limit only catches tasks that are redelivered without being
/// settled (a worker crashing mid-task); those are routed to the retry queue
/// like any other failure.
pub fn task_queue_arguments(policy: &RetryPolicy) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args.insert(
        "x-delivery-limit".into(),
        saturating_long(u128::from(policy.max_retries.max(1))),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(RETRY_EXCHANGE.into()),
    );
    args
}

/// Declaration arguments for the retry queue. Expired messages go back to
/// the default exchange under their original routing key, i.e. their queue.
pub fn retry_queue_arguments(policy: &RetryPolicy) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-message-ttl".into(), saturating_long(policy.delay.as_millis()));
    args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
    args
}

/// Number of times a task has already failed on `queue`, from the
/// broker-maintained `x-death` header.
pub fn retry_count(headers: Option<&FieldTable>, queue: &str) -> u32 {
    let deaths = match headers.and_then(|h| h.inner().get(&ShortString::from("x-death"))) {
        Some(AMQPValue::FieldArray(deaths)) => deaths,
        _ => return 0,
    };
    let queue = LongString::from(queue);

    deaths
        .as_slice()
        .iter()
        .filter_map(|entry| match entry {
            AMQPValue::FieldTable(death) => Some(death.inner()),
            _ => None,
        })
        .filter(|death| {
            matches!(death.get(&ShortString::from("queue")), Some(AMQPValue::LongString(q)) if *q == queue)
        })
        .filter_map(|death| match death.get(&ShortString::from("count")) {
            Some(AMQPValue::LongLongInt(n)) => Some(*n),
            Some(AMQPValue::LongInt(n)) => Some(i64::from(*n)),
            _ => None,
        })
        .map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
        .fold(0, u32::saturating_add)
}

async fn declare_exchange(channel: &Channel, name: &str, kind: ExchangeKind) -> Result<()> {
    channel
        .exchange_declare(
            name,
            kind,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare exchange {name}"))
}

async fn declare_queue(channel: &Channel, name: &str, args: FieldTable) -> Result<()> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await
        .with_context(|| format!("Failed to declare queue {name}"))?;
    Ok(())
}

/// Declare the dead-letter pair, the retry pair and the given task queues.
/// Idempotent, as long as every caller passes the same policy.
pub async fn declare(channel: &Channel, queues: &[&str], policy: &RetryPolicy) -> Result<()> {
    declare_exchange(channel, DEAD_LETTER_EXCHANGE, ExchangeKind::Fanout).await?;
    declare_queue(channel, DEAD_LETTER_QUEUE, FieldTable::default()).await?;
    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to bind dead-letter queue")?;

    declare_exchange(channel, RETRY_EXCHANGE, ExchangeKind::Direct).await?;
    declare_queue(channel, RETRY_QUEUE, retry_queue_arguments(policy)).await?;

    for queue in queues {
        declare_queue(channel, queue, task_queue_arguments(policy)).await?;

        channel
            .queue_bind(
                RETRY_QUEUE,
                RETRY_EXCHANGE,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to bind retry queue for {queue}"))?;
    }

    info!(
        queues = ?queues,
        dead_letter_queue = DEAD_LETTER_QUEUE,
        retry_queue = RETRY_QUEUE,
        max_retries = policy.max_retries,
        retry_delay_secs = policy.delay.as_secs(),
        "rabbitmq_topology_declared"
    );

    Ok(())
}
