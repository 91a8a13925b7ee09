//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The `email:notification` task payload
//! - Async publisher for enqueueing tasks
//! - Broker topology (quorum queues, delayed retry, dead-letter)
//! - The worker-side task handler
//!
//! ## Architecture
//!
//! ```text
//! API → default queue ─┐
//!       critical queue ├→ Worker → SES
//!       low queue ─────┘     ├─(retryable)→ txmail.retry ─(ttl)→ origin queue
//!                            └─(permanent / exhausted)→ txmail.dead-letter
//! ```

pub mod handler;
pub mod publisher;
pub mod topology;
pub mod types;

use async_trait::async_trait;

pub use handler::{process_task, TaskError};
pub use publisher::Publisher;
pub use types::{
    EmailTask, EnqueueError, TaskInfo, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, RETRY_EXCHANGE,
    RETRY_QUEUE, TYPE_EMAIL_NOTIFICATION,
};

/// Producer side of the task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Hand a task to the broker. On success the broker owns it.
    async fn enqueue(&self, task: &EmailTask) -> Result<TaskInfo, EnqueueError>;
}

/// Enqueue an email notification built from its five fields.
pub async fn enqueue_email(
    queue: &dyn TaskQueue,
    sender: &str,
    recipient: &str,
    subject: &str,
    amount: f64,
    description: &str,
) -> Result<TaskInfo, EnqueueError> {
    let task = EmailTask::new(sender, recipient, subject, amount, description);
    queue.enqueue(&task).await
}
